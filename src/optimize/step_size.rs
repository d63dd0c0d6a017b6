//! Step-size selection: fixed step, line search along the descent direction,
//! and the finite-difference check of the analytic gradient.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::comm::{agree, Communicator};
use crate::error::{Result, VmcError};
use crate::io::GradientConfig;
use crate::observer::Observer;
use crate::sampling::ConfigurationPool;
use crate::wavefunction::{LatticeTensors, VariationalState};
use super::gradient::{apply_update, step_normalization};

pub const DEFAULT_LINE_SEARCH_TOLERANCE: f64 = 0.1;
pub const DEFAULT_LINE_SEARCH_GROWTH: f64 = 1.25;
pub const DEFAULT_DIFFERENCE_DELTA: f64 = 1e-8;

/// Bisection gives up after this many halvings and keeps the lower bound.
const MAX_BISECTIONS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepMode {
    Fixed,
    LineSearch,
    CheckDifference,
}

impl FromStr for StepMode {
    type Err = VmcError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "fixed" => Ok(Self::Fixed),
            "line_search" => Ok(Self::LineSearch),
            "check_difference" => Ok(Self::CheckDifference),
            other => Err(VmcError::UnknownStepMode(other.to_string())),
        }
    }
}

impl fmt::Display for StepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fixed => "fixed",
            Self::LineSearch => "line_search",
            Self::CheckDifference => "check_difference",
        };
        f.write_str(name)
    }
}

/// Result of one line search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSearchOutcome {
    /// Chosen step, before normalization
    pub step: f64,
    /// Final bracket `[begin, end]` around the sign change of the derivative
    pub begin: f64,
    pub end: f64,
    /// Number of derivative evaluations, excluding the one at zero
    pub evaluations: usize,
    /// The derivative at zero was not positive and the previous step was kept
    pub fell_back: bool,
}

/// Memoized directional derivative; each `eta` is evaluated at most once.
struct DerivativeCache<F> {
    evaluate: F,
    values: HashMap<u64, f64>,
    evaluations: usize,
}

impl<F: FnMut(f64) -> Result<f64>> DerivativeCache<F> {
    fn new(evaluate: F, at_zero: f64) -> Self {
        let mut values = HashMap::new();
        values.insert(0.0f64.to_bits(), at_zero);
        Self { evaluate, values, evaluations: 0 }
    }

    fn get(&mut self, eta: f64) -> Result<f64> {
        if let Some(&value) = self.values.get(&eta.to_bits()) {
            return Ok(value);
        }
        let value = (self.evaluate)(eta)?;
        self.evaluations += 1;
        self.values.insert(eta.to_bits(), value);
        Ok(value)
    }
}

/// Find a step along a descent direction where the directional derivative
/// `grad_dot(eta)` of the energy changes sign.
///
/// `grad_dot(eta)` is positive while the energy still decreases along the
/// direction. The first probe is `growth * step`; if the derivative is still
/// positive there, that step is taken. Otherwise `[0, growth * step]` is
/// bisected until its relative width drops below `tolerance` and the lower
/// bound is returned. A non-positive `at_zero` keeps `step` unchanged.
pub fn line_search<F>(step: f64, at_zero: f64, tolerance: f64, growth: f64, grad_dot: F) -> Result<LineSearchOutcome>
where
    F: FnMut(f64) -> Result<f64>,
{
    if !(at_zero > 0.0) {
        warn!(step, grad_dot = at_zero, "directional derivative at zero is not positive, keeping step size");
        return Ok(LineSearchOutcome { step, begin: 0.0, end: step, evaluations: 0, fell_back: true });
    }
    let mut cache = DerivativeCache::new(grad_dot, at_zero);
    let mut begin = 0.0;
    let mut end = step * growth;

    if cache.get(end)? > 0.0 {
        debug!(step = end, "derivative still positive at the grown step");
        return Ok(LineSearchOutcome {
            step: end,
            begin: end,
            end,
            evaluations: cache.evaluations,
            fell_back: false,
        });
    }
    for _ in 0..MAX_BISECTIONS {
        let middle = (begin + end) / 2.0;
        if cache.get(middle)? > 0.0 {
            begin = middle;
        } else {
            end = middle;
        }
        if (end - begin) / end < tolerance {
            debug!(step = begin, end, "bisection converged");
            return Ok(LineSearchOutcome {
                step: begin,
                begin,
                end,
                evaluations: cache.evaluations,
                fell_back: false,
            });
        }
    }
    warn!(begin, end, "line search did not narrow the bracket, using its lower bound");
    Ok(LineSearchOutcome { step: begin, begin, end, evaluations: cache.evaluations, fell_back: false })
}

/// Finite-difference derivative of one parameter next to its analytic value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferenceReport {
    pub site: usize,
    pub index: usize,
    /// `dE/dx + i dE/dy` from shifted energies; real states only have `dE/dx`
    pub difference: Complex64,
    pub analytic: Complex64,
}

/// Shift every parameter by `delta` (and by `i delta` for complex states),
/// evaluate the total energy with `total_energy` and compare the forward
/// difference with `analytic`. The state is restored afterwards.
pub fn check_difference<S, F>(
    state: &mut S,
    delta: f64,
    reference: f64,
    analytic: &LatticeTensors,
    mut total_energy: F,
) -> Result<Vec<DifferenceReport>>
where
    S: VariationalState + ?Sized,
    F: FnMut(&S) -> Result<f64>,
{
    let origin = state.tensors().clone();
    let mut shifts = vec![Complex64::new(delta, 0.0)];
    if state.is_complex() {
        shifts.push(Complex64::new(0.0, delta));
    }

    let mut reports = Vec::with_capacity(origin.parameter_count());
    for site in 0..state.site_number() {
        for index in 0..origin.site(site).len() {
            let mut components = [0.0; 2];
            for (component, shift) in components.iter_mut().zip(&shifts) {
                let mut shifted = origin.clone();
                shifted.site_mut(site)[index] += *shift;
                state.set_tensors(shifted)?;
                let energy = total_energy(&*state);
                state.set_tensors(origin.clone())?;
                *component = (energy? - reference) / delta;
            }
            let report = DifferenceReport {
                site,
                index,
                difference: Complex64::new(components[0], components[1]),
                analytic: analytic.site(site)[index],
            };
            info!(site, index, difference = %report.difference, analytic = %report.analytic, "difference check");
            reports.push(report);
        }
    }
    Ok(reports)
}

/// Chooses and applies the step of each gradient iteration.
///
/// The line-searched step size carries over to the next iteration as its
/// starting guess.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSizeSelector {
    mode: StepMode,
    step_size: f64,
    tolerance: f64,
    growth: f64,
    difference_delta: f64,
}

impl StepSizeSelector {
    pub fn new(mode: StepMode, step_size: f64) -> Self {
        Self {
            mode,
            step_size,
            tolerance: DEFAULT_LINE_SEARCH_TOLERANCE,
            growth: DEFAULT_LINE_SEARCH_GROWTH,
            difference_delta: DEFAULT_DIFFERENCE_DELTA,
        }
    }

    pub fn from_config(config: &GradientConfig) -> Self {
        Self::new(config.step_mode, config.step_size)
            .with_line_search(config.line_search.tolerance, config.line_search.growth)
            .with_difference_delta(config.difference_delta)
    }

    pub fn with_line_search(mut self, tolerance: f64, growth: f64) -> Self {
        self.tolerance = tolerance;
        self.growth = growth;
        self
    }

    pub fn with_difference_delta(mut self, delta: f64) -> Self {
        self.difference_delta = delta;
        self
    }

    pub fn mode(&self) -> StepMode {
        self.mode
    }

    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    /// Take `θ - step_size · direction`.
    pub fn fixed_update<S: VariationalState + ?Sized>(&self, state: &mut S, direction: &LatticeTensors) -> Result<()> {
        let origin = state.tensors().clone();
        apply_update(state, &origin, self.step_size, direction)
    }

    /// Line search along `direction` by replaying `pool` with `reweight`, then
    /// apply the chosen step. Collective.
    pub fn line_search_update<C, S>(
        &mut self,
        comm: &C,
        state: &mut S,
        direction: &LatticeTensors,
        sampled: &Observer,
        reweight: &mut Observer,
        pool: &mut ConfigurationPool,
    ) -> Result<LineSearchOutcome>
    where
        C: Communicator,
        S: VariationalState + ?Sized,
    {
        let origin = state.tensors().clone();
        let param = step_normalization(comm, &origin, direction);
        let gradient = sampled
            .gradient()
            .ok_or(VmcError::Observer("line search needs the sampled gradient"))?;
        let at_zero = comm.broadcast_scalar(direction.dot(gradient), 0);

        let outcome = line_search(self.step_size, at_zero, self.tolerance, self.growth, |eta| {
            apply_update(state, &origin, eta * param, direction)?;
            let replayed = reweight.replay(comm, &*state, pool).map(|result| result.gradient.clone());
            let gradient = agree(comm, replayed, "line search")?
                .ok_or(VmcError::Observer("replay produced no gradient"))?;
            let dot = comm.broadcast_scalar(direction.dot(&gradient), 0);
            debug!(eta, grad_dot = dot, "line search probe");
            Ok(dot)
        })?;

        self.step_size = outcome.step;
        info!(step_size = self.step_size, param, evaluations = outcome.evaluations, "line search done");
        apply_update(state, &origin, self.step_size * param, direction)?;
        Ok(outcome)
    }

    /// Compare the sampled gradient with forward differences of the replayed
    /// total energy. Leaves the state unchanged. Collective.
    pub fn check_difference_with<C, S>(
        &self,
        comm: &C,
        state: &mut S,
        sampled: &Observer,
        reweight: &mut Observer,
        pool: &mut ConfigurationPool,
    ) -> Result<Vec<DifferenceReport>>
    where
        C: Communicator,
        S: VariationalState + ?Sized,
    {
        let sites = state.site_number() as f64;
        let energy = sampled
            .energy()
            .ok_or(VmcError::Observer("difference check needs the sampled energy"))?;
        let analytic = sampled
            .gradient()
            .ok_or(VmcError::Observer("difference check needs the sampled gradient"))?;
        info!("checking difference");
        check_difference(state, self.difference_delta, energy.mean * sites, analytic, |state| {
            let replayed = reweight.replay(comm, state, pool).map(|result| result.energy.mean);
            Ok(agree(comm, replayed, "difference check")? * sites)
        })
    }
}
