//! Weighted accumulation of energy and gradient statistics.
//!
//! Each sample is reweighted by w = |ψ(s)|² / possibility. With O(s) the
//! log-derivative of the amplitude and E_L(s) the local energy:
//!
//!   E   = ⟨E_L⟩
//!   g_i = 2 (⟨conj(O_i) E_L⟩ - ⟨conj(O_i)⟩⟨E_L⟩)
//!
//! where ⟨·⟩ is the w-weighted mean over all ranks. `g` is the gradient of the
//! total energy and points uphill, for real and complex parameters alike.

use nalgebra::DVector;
use num_complex::Complex64;
use tracing::{trace, warn};

use crate::comm::Communicator;
use crate::error::{Result, VmcError};
use crate::sampling::{ConfigurationPool, Sample};
use crate::wavefunction::{LatticeTensors, VariationalState};
use super::natural::{conjugate_gradient, SampledMetric, DEFAULT_CG_TOLERANCE};

/// Which statistics an observer collects besides the energy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserverOptions {
    pub gradient: bool,
    pub natural_gradient: bool,
}

/// Finalized energy of one accumulation window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyStatistic {
    /// Energy per site
    pub mean: f64,
    /// Standard error of `mean`
    pub error: f64,
    pub total_weight: f64,
    pub sample_count: usize,
}

/// Everything an accumulation window produces after the collective finalize.
#[derive(Debug, Clone)]
pub struct ObserverResult {
    pub energy: EnergyStatistic,
    pub gradient: Option<LatticeTensors>,
    /// ⟨O⟩, kept for the metric
    mean_holes: Option<DVector<Complex64>>,
}

#[derive(Debug, Clone)]
struct PartialSums {
    count: f64,
    weight: f64,
    energy: Complex64,
    energy_square: f64,
    // Σ w conj(O)
    holes: DVector<Complex64>,
    // Σ w conj(O) E_L
    energy_holes: DVector<Complex64>,
}

impl PartialSums {
    fn zeros(parameters: usize) -> Self {
        Self {
            count: 0.0,
            weight: 0.0,
            energy: Complex64::new(0.0, 0.0),
            energy_square: 0.0,
            holes: DVector::zeros(parameters),
            energy_holes: DVector::zeros(parameters),
        }
    }

    fn pack(&self) -> Vec<f64> {
        let mut packed = vec![self.count, self.weight, self.energy.re, self.energy.im, self.energy_square];
        packed.extend(self.holes.iter().flat_map(|z| [z.re, z.im]));
        packed.extend(self.energy_holes.iter().flat_map(|z| [z.re, z.im]));
        packed
    }

    fn unpack(packed: &[f64], parameters: usize) -> Self {
        let complex_at = |offset: usize| {
            DVector::from_fn(parameters, |i, _| Complex64::new(packed[offset + 2 * i], packed[offset + 2 * i + 1]))
        };
        Self {
            count: packed[0],
            weight: packed[1],
            energy: Complex64::new(packed[2], packed[3]),
            energy_square: packed[4],
            holes: complex_at(5),
            energy_holes: complex_at(5 + 2 * parameters),
        }
    }
}

/// Accumulates weighted statistics over one window of samples.
///
/// Use [`Observer::accumulate`] (or `begin` / `finalize`). Results are only
/// available after the collective finalize of a window; partial sums are
/// never exposed.
pub struct Observer {
    options: ObserverOptions,
    layout: LatticeTensors,
    site_number: usize,
    sums: PartialSums,
    metric_samples: Vec<(f64, DVector<Complex64>)>,
    active: bool,
    begun: bool,
    result: Option<ObserverResult>,
}

impl Observer {
    /// The parameter layout is taken from `state` up front so that every rank
    /// reduces buffers of the same length, even a rank that saw no sample.
    pub fn new<S: VariationalState + ?Sized>(state: &S, options: ObserverOptions) -> Self {
        let layout = state.tensors().zeros_like();
        let parameters = layout.parameter_count();
        Self {
            options: ObserverOptions {
                gradient: options.gradient || options.natural_gradient,
                natural_gradient: options.natural_gradient,
            },
            layout,
            site_number: state.site_number(),
            sums: PartialSums::zeros(parameters),
            metric_samples: Vec::new(),
            active: false,
            begun: false,
            result: None,
        }
    }

    pub fn options(&self) -> ObserverOptions {
        self.options
    }

    /// Open a window: clear all running sums and the previous result.
    pub fn begin(&mut self) {
        self.sums = PartialSums::zeros(self.layout.parameter_count());
        self.metric_samples.clear();
        self.result = None;
        self.active = true;
        self.begun = true;
    }

    /// Record one sample. Only valid inside an open window.
    pub fn observe<S: VariationalState + ?Sized>(&mut self, state: &S, sample: &Sample) -> Result<()> {
        if !self.active {
            return Err(VmcError::Observer("observe called outside an accumulation window"));
        }
        let configuration = sample.configuration();
        let amplitude_square = configuration.amplitude().norm_sqr();
        self.sums.count += 1.0;
        if amplitude_square == 0.0 {
            return Ok(());
        }
        if sample.possibility() == 0.0 {
            return Err(VmcError::InvalidPossibility { possibility: 0.0 });
        }
        let weight = amplitude_square / sample.possibility();

        let energy = state.local_energy(configuration);
        self.sums.weight += weight;
        self.sums.energy += energy * weight;
        self.sums.energy_square += energy.re * energy.re * weight;

        if self.options.gradient {
            let holes = state.log_derivative(configuration).flatten();
            let conj_holes = holes.map(|o| o.conj());
            self.sums.energy_holes += &conj_holes * (energy * weight);
            self.sums.holes += conj_holes * Complex64::new(weight, 0.0);
            if self.options.natural_gradient {
                self.metric_samples.push((weight, holes));
            }
        }
        trace!(count = self.sums.count, "observed sample");
        Ok(())
    }

    /// Collective: reduce the window's partial sums over all ranks and
    /// normalize. Calling it again without new data gives the same result.
    pub fn finalize<C: Communicator>(&mut self, comm: &C) -> Result<&ObserverResult> {
        if !self.begun {
            return Err(VmcError::Observer("finalize called before any accumulation window"));
        }
        self.active = false;

        let parameters = self.layout.parameter_count();
        let mut packed = self.sums.pack();
        comm.all_reduce_sum(&mut packed);
        let total = PartialSums::unpack(&packed, parameters);
        if total.weight <= 0.0 {
            return Err(VmcError::ZeroWeight);
        }

        let sites = self.site_number as f64;
        let mean = total.energy / total.weight;
        let variance = (total.energy_square / total.weight - mean.re * mean.re).max(0.0);
        let energy = EnergyStatistic {
            mean: mean.re / sites,
            error: (variance / total.count).sqrt() / sites,
            total_weight: total.weight,
            sample_count: total.count as usize,
        };

        let (gradient, mean_holes) = if self.options.gradient {
            let inverse = Complex64::new(1.0 / total.weight, 0.0);
            let mean_conj_holes = total.holes * inverse;
            let flat = (total.energy_holes * inverse - &mean_conj_holes * mean) * Complex64::new(2.0, 0.0);
            let gradient = self.layout.unflatten_like(flat.as_slice())?;
            (Some(gradient), Some(mean_conj_holes.map(|o| o.conj())))
        } else {
            (None, None)
        };

        Ok(self.result.insert(ObserverResult { energy, gradient, mean_holes }))
    }

    /// Run `body` inside a window. The window is finalized on every exit
    /// path; an error from `body` is returned after the finalize.
    pub fn accumulate<C, T>(&mut self, comm: &C, body: impl FnOnce(&mut Self) -> Result<T>) -> Result<T>
    where
        C: Communicator,
    {
        self.begin();
        let outcome = body(self);
        let finalized = self.finalize(comm).map(|_| ());
        let value = outcome?;
        finalized?;
        Ok(value)
    }

    /// Re-evaluate pooled samples against the current parameters of `state`
    /// without drawing new ones. Collective.
    pub fn replay<C, S>(&mut self, comm: &C, state: &S, pool: &mut ConfigurationPool) -> Result<&ObserverResult>
    where
        C: Communicator,
        S: VariationalState + ?Sized,
    {
        pool.refresh_all(state);
        self.accumulate(comm, |observer| {
            for sample in pool.iter() {
                observer.observe(state, sample)?;
            }
            Ok(())
        })?;
        self.result().ok_or(VmcError::Observer("replay produced no result"))
    }

    pub fn result(&self) -> Option<&ObserverResult> {
        self.result.as_ref()
    }

    pub fn energy(&self) -> Option<EnergyStatistic> {
        self.result.as_ref().map(|result| result.energy)
    }

    pub fn gradient(&self) -> Option<&LatticeTensors> {
        self.result.as_ref().and_then(|result| result.gradient.as_ref())
    }

    /// Solve `(S + epsilon·I) x = g` by conjugate gradient. Collective.
    ///
    /// Stops after `max_steps` iterations and returns the current estimate if
    /// the solve has not converged by then.
    pub fn natural_gradient<C: Communicator>(&self, comm: &C, max_steps: usize, epsilon: f64) -> Result<LatticeTensors> {
        if !self.options.natural_gradient {
            return Err(VmcError::Observer("natural gradient not enabled"));
        }
        let result = self
            .result
            .as_ref()
            .ok_or(VmcError::Observer("natural gradient requested before finalize"))?;
        let (Some(gradient), Some(mean)) = (result.gradient.as_ref(), result.mean_holes.as_ref()) else {
            return Err(VmcError::Observer("gradient statistics missing"));
        };

        let metric = SampledMetric {
            comm,
            samples: &self.metric_samples,
            mean: mean.clone(),
            total_weight: result.energy.total_weight,
        };
        let outcome = conjugate_gradient(&metric, &gradient.flatten(), epsilon, max_steps, DEFAULT_CG_TOLERANCE);
        if !outcome.converged {
            warn!(
                iterations = outcome.iterations,
                residual = outcome.residual_norm,
                "conjugate gradient stopped before convergence, using current estimate"
            );
        }
        gradient.unflatten_like(outcome.solution.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{run_local, SingleProcess};
    use crate::sampling::{DirectSampling, ErgodicSampling, Sampler};
    use crate::wavefunction::{models, Configuration, Lattice, ProductState};
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn state(seed: u64) -> ProductState {
        let mut rng = StdRng::seed_from_u64(seed);
        let lattice = Lattice::new(2, 2);
        ProductState::random(lattice, 2, models::transverse_ising(lattice, 1.0, 0.7), false, 0.3, &mut rng).unwrap()
    }

    fn ergodic_result(state: &ProductState, options: ObserverOptions) -> (Observer, ObserverResult) {
        let comm = SingleProcess;
        let mut sampling = ErgodicSampling::new(state, 0, 1).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let mut observer = Observer::new(state, options);
        observer
            .accumulate(&comm, |observer| {
                for _ in 0..sampling.total_step().unwrap() {
                    let sample = sampling.next_sample(state, &mut rng)?;
                    observer.observe(state, &sample)?;
                }
                Ok(())
            })
            .unwrap();
        let result = observer.result().unwrap().clone();
        (observer, result)
    }

    /// ⟨ψ|H|ψ⟩ / ⟨ψ|ψ⟩ from the dense Hamiltonian.
    fn exact_energy(state: &ProductState) -> f64 {
        let n = state.site_number();
        let dim = 1 << n;
        let decode = |index: usize| (0..n).map(|site| (index >> (n - 1 - site)) & 1).collect::<Vec<_>>();
        let psi = DVector::from_fn(dim, |i, _| state.amplitude(&decode(i)));
        let mut hamiltonian = DMatrix::<Complex64>::zeros(dim, dim);
        for row in 0..dim {
            let states = decode(row);
            for term in state.hamiltonian() {
                let local_row = term.local_index(&states);
                for local_col in 0..term.matrix.ncols() {
                    let mut target = states.clone();
                    term.write_local(local_col, &mut target);
                    let col = target.iter().fold(0, |acc, &s| acc * 2 + s);
                    hamiltonian[(row, col)] += term.matrix[(local_row, local_col)];
                }
            }
        }
        psi.dotc(&(&hamiltonian * &psi)).re / psi.dotc(&psi).re
    }

    #[test]
    fn test_ergodic_energy_matches_dense_expectation() {
        let state = state(61);
        let (_, result) = ergodic_result(&state, ObserverOptions::default());
        assert_relative_eq!(result.energy.mean * 4.0, exact_energy(&state), epsilon = 1e-10);
        assert_eq!(result.energy.sample_count, 16);
        assert!(result.gradient.is_none());
    }

    #[test]
    fn test_ergodic_gradient_matches_finite_difference() {
        let state = state(62);
        let options = ObserverOptions { gradient: true, natural_gradient: false };
        let (_, result) = ergodic_result(&state, options);
        let gradient = result.gradient.unwrap();

        let h = 1e-6;
        for site in 0..4 {
            for k in 0..2 {
                let mut shifted = state.clone();
                let mut tensors = shifted.tensors().clone();
                tensors.site_mut(site)[k] += Complex64::new(h, 0.0);
                shifted.set_tensors(tensors).unwrap();
                let numerical = (exact_energy(&shifted) - exact_energy(&state)) / h;
                assert_relative_eq!(gradient.site(site)[k].re, numerical, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_finalize_twice_is_stable() {
        let state = state(63);
        let comm = SingleProcess;
        let mut rng = StdRng::seed_from_u64(1);
        let mut sampling = DirectSampling::new(2).unwrap();
        let mut observer = Observer::new(&state, ObserverOptions { gradient: true, natural_gradient: false });
        observer.begin();
        for _ in 0..50 {
            let sample = sampling.next_sample(&state, &mut rng).unwrap();
            observer.observe(&state, &sample).unwrap();
        }
        let first = observer.finalize(&comm).unwrap().clone();
        let second = observer.finalize(&comm).unwrap().clone();
        assert_eq!(first.energy, second.energy);
        assert_eq!(first.gradient, second.gradient);
    }

    #[test]
    fn test_replay_with_unchanged_state_reproduces_result() {
        let state = state(64);
        let comm = SingleProcess;
        let mut rng = StdRng::seed_from_u64(2);
        let mut sampling = DirectSampling::new(2).unwrap();
        let options = ObserverOptions { gradient: true, natural_gradient: false };
        let mut observer = Observer::new(&state, options);
        let mut pool = ConfigurationPool::new();
        observer
            .accumulate(&comm, |observer| {
                for _ in 0..200 {
                    let sample = sampling.next_sample(&state, &mut rng)?;
                    observer.observe(&state, &sample)?;
                    pool.push(sample);
                }
                Ok(())
            })
            .unwrap();
        let original = observer.result().unwrap().clone();

        let mut reweight = Observer::new(&state, options);
        let replayed = reweight.replay(&comm, &state, &mut pool).unwrap();
        assert_relative_eq!(replayed.energy.mean, original.energy.mean, epsilon = 1e-12);
        let (a, b) = (replayed.gradient.as_ref().unwrap(), original.gradient.as_ref().unwrap());
        assert_relative_eq!(a.flatten().metric_distance(&b.flatten()), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_observe_outside_window_fails() {
        let state = state(65);
        let mut observer = Observer::new(&state, ObserverOptions::default());
        let sample = Sample::new(1.0, Configuration::new(&state, vec![0, 0, 0, 0])).unwrap();
        assert!(observer.observe(&state, &sample).is_err());
        assert!(observer.finalize(&SingleProcess).is_err());
        assert!(observer.energy().is_none());
    }

    #[test]
    fn test_body_error_still_finalizes() {
        let state = state(66);
        let comm = SingleProcess;
        let mut observer = Observer::new(&state, ObserverOptions::default());
        let sample = Sample::new(1.0, Configuration::new(&state, vec![0, 1, 0, 1])).unwrap();
        let outcome: Result<()> = observer.accumulate(&comm, |observer| {
            observer.observe(&state, &sample)?;
            Err(VmcError::Observer("sampling failed"))
        });
        assert!(outcome.is_err());
        assert!(observer.energy().is_some());
        assert!(observer.observe(&state, &sample).is_err());
    }

    /// Ergodic accumulation with the configurations dealt round-robin over the ranks.
    fn split_observer<C: Communicator>(world: &C, state: &ProductState, options: ObserverOptions) -> Observer {
        let mut sampling = ErgodicSampling::new(state, world.rank(), world.size()).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let mut observer = Observer::new(state, options);
        let total = sampling.total_step().unwrap();
        observer
            .accumulate(world, |observer| {
                for step in 0..total {
                    if step % world.size() == world.rank() {
                        let sample = sampling.next_sample(state, &mut rng)?;
                        observer.observe(state, &sample)?;
                    }
                }
                Ok(())
            })
            .unwrap();
        observer
    }

    #[test]
    fn test_split_ranks_match_single_rank() {
        let state = state(67);
        let options = ObserverOptions { gradient: true, natural_gradient: false };
        let (_, single) = ergodic_result(&state, options);
        let results = run_local(3, |world| split_observer(&world, &state, options).result().unwrap().clone());
        for result in results {
            assert_relative_eq!(result.energy.mean, single.energy.mean, epsilon = 1e-12);
            let distance = result
                .gradient
                .unwrap()
                .flatten()
                .metric_distance(&single.gradient.clone().unwrap().flatten());
            assert!(distance < 1e-12);
        }
    }

    #[test]
    fn test_split_ranks_natural_gradient_matches_single_rank() {
        let state = state(69);
        let options = ObserverOptions { gradient: true, natural_gradient: true };
        let (observer, _) = ergodic_result(&state, options);
        let single = observer.natural_gradient(&SingleProcess, 100, 1e-2).unwrap().flatten();
        let results = run_local(3, |world| {
            let observer = split_observer(&world, &state, options);
            observer.natural_gradient(&world, 100, 1e-2).unwrap().flatten()
        });
        for natural in results {
            let distance = natural.metric_distance(&single);
            assert!(distance < 1e-8 * single.norm().max(1.0), "distance {distance}");
        }
    }

    #[test]
    fn test_natural_gradient_solves_dense_metric() {
        let state = state(68);
        let options = ObserverOptions { gradient: true, natural_gradient: true };
        let (observer, result) = ergodic_result(&state, options);
        let epsilon = 1e-2;
        let natural = observer.natural_gradient(&SingleProcess, 100, epsilon).unwrap().flatten();

        // Dense metric from the exact distribution.
        let p = state.total_parameter_count();
        let mut second = DMatrix::<Complex64>::zeros(p, p);
        let mut first = DVector::<Complex64>::zeros(p);
        let mut total = 0.0;
        for index in 0..16usize {
            let states: Vec<usize> = (0..4).map(|site| (index >> (3 - site)) & 1).collect();
            let configuration = Configuration::new(&state, states);
            let weight = configuration.amplitude().norm_sqr();
            let holes = state.log_derivative(&configuration).flatten();
            second += holes.map(|o| o.conj()) * holes.transpose() * Complex64::new(weight, 0.0);
            first += &holes * Complex64::new(weight, 0.0);
            total += weight;
        }
        let mean = first / Complex64::new(total, 0.0);
        let metric = second / Complex64::new(total, 0.0) - mean.map(|o| o.conj()) * mean.transpose();
        let shifted = metric + DMatrix::<Complex64>::identity(p, p) * Complex64::new(epsilon, 0.0);
        let gradient = result.gradient.unwrap().flatten();
        let residual = (&shifted * &natural - &gradient).norm();
        assert!(residual < 1e-6 * gradient.norm().max(1.0), "residual {residual}");
    }
}
