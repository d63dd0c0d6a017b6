//! The gradient-descent loop.
//!
//! Every iteration samples the rank's share of configurations with a
//! per-rank seed, reduces the energy and gradient over all ranks, moves the
//! parameters, re-synchronizes them from rank 0 and checks for an interrupt.

use tracing::{debug, info, trace};

use crate::comm::{agree, Communicator};
use crate::error::{Result, VmcError};
use crate::interrupt::InterruptCoordinator;
use crate::io::{append_energy_log, checkpoint_path, OptimizeConfig, StateWriter, YamlStateWriter};
use crate::observer::{EnergyStatistic, Observer, ObserverOptions};
use crate::sampling::{ConfigurationPool, Sampler, SamplingStrategy};
use crate::seed::SeedCoordinator;
use crate::wavefunction::VariationalState;
use super::gradient::{broadcast_state, descent_direction, NaturalGradientOptions};
use super::step_size::{DifferenceReport, StepMode, StepSizeSelector};

/// What a run produced.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Sampled energy of every completed iteration
    pub energies: Vec<EnergyStatistic>,
    pub steps_completed: usize,
    pub interrupted: bool,
    /// Step size in effect at the end of the run
    pub step_size: f64,
    /// Filled by the finite-difference check
    pub differences: Vec<DifferenceReport>,
}

impl RunSummary {
    pub fn last_energy(&self) -> Option<&EnergyStatistic> {
        self.energies.last()
    }
}

/// Runs variational optimization of one state on one rank.
///
/// All ranks of `comm` must drive their own `OptimizationDriver` with the same
/// configuration; the collectives inside `run` pair up across ranks.
pub struct OptimizationDriver<'c, C, S, W = YamlStateWriter> {
    comm: &'c C,
    config: OptimizeConfig,
    state: S,
    sampler: SamplingStrategy,
    seeds: SeedCoordinator,
    selector: StepSizeSelector,
    interrupt: InterruptCoordinator,
    writer: W,
}

impl<'c, C, S> OptimizationDriver<'c, C, S>
where
    C: Communicator,
    S: VariationalState,
{
    /// Validate `config`, align the initial parameters with rank 0 and build
    /// this rank's sampler. Collective.
    pub fn new(comm: &'c C, config: OptimizeConfig, state: S, root_seed: u64) -> Result<Self> {
        config.validate()?;
        let mut state = state;
        broadcast_state(comm, &mut state)?;
        let mut seeds = SeedCoordinator::new(comm, root_seed);

        let sampling = &config.sampling;
        let built = seeds.diversified(comm, |rng| {
            SamplingStrategy::build(sampling.method, sampling.cut_dimension, &state, comm.rank(), comm.size(), rng)
        });
        let sampler = agree(comm, built, "sampler construction")?;
        debug!(rank = comm.rank(), method = %sampler.method(), "sampler ready");

        let selector = StepSizeSelector::from_config(&config.gradient);
        Ok(Self {
            comm,
            config,
            state,
            sampler,
            seeds,
            selector,
            interrupt: InterruptCoordinator::new(),
            writer: YamlStateWriter,
        })
    }
}

impl<'c, C, S, W> OptimizationDriver<'c, C, S, W>
where
    C: Communicator,
    S: VariationalState,
    W: StateWriter<S>,
{
    pub fn with_writer<V: StateWriter<S>>(self, writer: V) -> OptimizationDriver<'c, C, S, V> {
        OptimizationDriver {
            comm: self.comm,
            config: self.config,
            state: self.state,
            sampler: self.sampler,
            seeds: self.seeds,
            selector: self.selector,
            interrupt: self.interrupt,
            writer,
        }
    }

    /// Use an interrupt coordinator whose flag is shared with a signal handler.
    pub fn with_interrupt(mut self, interrupt: InterruptCoordinator) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn config(&self) -> &OptimizeConfig {
        &self.config
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn into_state(self) -> S {
        self.state
    }

    /// Samples drawn per iteration, summed over ranks.
    pub fn sampling_total_step(&self) -> usize {
        self.sampler.total_step().unwrap_or(self.config.sampling.total_step)
    }

    /// Run all gradient iterations, or until every rank agrees to stop.
    /// Collective.
    pub fn run(&mut self) -> Result<RunSummary> {
        let comm = self.comm;
        let gradient = &self.config.gradient;
        let options = ObserverOptions {
            gradient: gradient.enabled,
            natural_gradient: gradient.enabled && gradient.natural.enabled,
        };
        let mut observer = Observer::new(&self.state, options);
        let mut reweight = Observer::new(&self.state, ObserverOptions { gradient: true, natural_gradient: false });
        let keep_pool = self.config.needs_reweight();
        let gradient_total_step = self.config.gradient_total_step();
        let sampling_total_step = self.sampling_total_step();

        info!(
            rank = comm.rank(),
            size = comm.size(),
            method = %self.sampler.method(),
            sampling_total_step,
            gradient_total_step,
            "starting optimization"
        );
        let mut summary = RunSummary::default();
        for step in 0..gradient_total_step {
            let mut pool = ConfigurationPool::new();
            let energy = self.sample(&mut observer, &mut pool, keep_pool, sampling_total_step)?;
            info!(step, energy = energy.mean, error = energy.error, "sampling done");
            summary.energies.push(energy);

            if self.config.gradient.enabled {
                self.gradient_step(step, gradient_total_step, &observer, &mut reweight, &mut pool, &mut summary)?;
            }
            summary.steps_completed = step + 1;

            if self.interrupt.should_stop(comm) {
                info!(step, "stopping after interrupt");
                summary.interrupted = true;
                break;
            }
        }
        summary.step_size = self.selector.step_size();
        Ok(summary)
    }

    /// Draw this rank's round-robin share of `total` samples inside a
    /// per-rank seed scope and one accumulation window.
    fn sample(
        &mut self,
        observer: &mut Observer,
        pool: &mut ConfigurationPool,
        keep_pool: bool,
        total: usize,
    ) -> Result<EnergyStatistic> {
        let comm = self.comm;
        let (rank, size) = (comm.rank(), comm.size());
        let Self { state, sampler, seeds, .. } = self;
        let state = &*state;

        let outcome = seeds.diversified(comm, |rng| {
            observer.accumulate(comm, |observer| {
                for step in (rank..total).step_by(size) {
                    let sample = sampler.next_sample(state, rng)?;
                    observer.observe(state, &sample)?;
                    trace!(step, total, "sampling");
                    if keep_pool {
                        pool.push(sample);
                    }
                }
                Ok(())
            })
        });
        agree(comm, outcome, "sampling")?;
        observer
            .energy()
            .ok_or(VmcError::Observer("sampling produced no energy"))
    }

    fn gradient_step(
        &mut self,
        step: usize,
        total: usize,
        observer: &Observer,
        reweight: &mut Observer,
        pool: &mut ConfigurationPool,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let comm = self.comm;
        let energy = observer
            .energy()
            .ok_or(VmcError::Observer("gradient step before sampling"))?;
        let logged = match (&self.config.output.log_file, comm.is_root()) {
            (Some(path), true) => append_energy_log(path, &energy),
            _ => Ok(()),
        };
        agree(comm, logged, "energy log")?;

        let natural = &self.config.gradient.natural;
        let natural = natural.enabled.then_some(NaturalGradientOptions {
            max_steps: natural.cg_max_step,
            epsilon: natural.epsilon,
        });
        match self.selector.mode() {
            StepMode::CheckDifference => {
                summary.differences =
                    self.selector
                        .check_difference_with(comm, &mut self.state, observer, reweight, pool)?;
            }
            StepMode::LineSearch => {
                let direction = descent_direction(comm, observer, natural)?;
                self.selector
                    .line_search_update(comm, &mut self.state, &direction, observer, reweight, pool)?;
            }
            StepMode::Fixed => {
                let direction = descent_direction(comm, observer, natural)?;
                self.selector.fixed_update(&mut self.state, &direction)?;
            }
        }
        info!(step, total, step_size = self.selector.step_size(), "gradient step done");

        broadcast_state(comm, &mut self.state)?;
        self.sampler.refresh_all(&self.state);

        let written = if comm.is_root() { self.write_checkpoint(step) } else { Ok(()) };
        agree(comm, written, "checkpoint")
    }

    fn write_checkpoint(&self, step: usize) -> Result<()> {
        let Some(path) = self
            .config
            .output
            .checkpoint
            .as_deref()
            .and_then(|template| checkpoint_path(template, step))
        else {
            return Ok(());
        };
        self.writer.write(&self.state, &path)?;
        debug!(path = %path.display(), "checkpoint written");
        Ok(())
    }
}
