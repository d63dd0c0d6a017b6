//! YAML run configuration.
//!
//! Example:
//!
//! ```yaml
//! sampling:
//!   method: sweep
//!   total_step: 2000
//!   cut_dimension: 4
//! gradient:
//!   enabled: true
//!   total_step: 50
//!   step_size: 0.05
//!   step_mode: line_search
//!   natural:
//!     enabled: true
//!     cg_max_step: 20
//!     epsilon: 0.001
//! output:
//!   checkpoint: "state_{step}.yaml"
//!   log_file: energy.log
//! model:
//!   kind: heisenberg
//!   l1: 2
//!   l2: 2
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VmcError};
use crate::optimize::StepMode;
use crate::sampling::SamplingMethod;
use crate::wavefunction::{models, HamiltonianTerm, Lattice, ProductState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub method: SamplingMethod,
    /// Samples per gradient step, summed over all workers. Ignored by ergodic
    /// sampling, which always visits the whole space.
    pub total_step: usize,
    pub cut_dimension: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            method: SamplingMethod::Direct,
            total_step: 1000,
            cut_dimension: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NaturalGradientConfig {
    pub enabled: bool,
    pub cg_max_step: usize,
    /// Diagonal shift added to the metric
    pub epsilon: f64,
}

impl Default for NaturalGradientConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cg_max_step: 20,
            epsilon: 1e-3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSearchConfig {
    /// Relative bracket width at which bisection stops
    pub tolerance: f64,
    /// First probe is `growth × step_size`
    pub growth: f64,
}

impl Default for LineSearchConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.1,
            growth: 1.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientConfig {
    pub enabled: bool,
    pub total_step: usize,
    pub step_size: f64,
    pub step_mode: StepMode,
    pub natural: NaturalGradientConfig,
    pub line_search: LineSearchConfig,
    /// Parameter shift of the finite-difference check
    pub difference_delta: f64,
}

impl Default for GradientConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            total_step: 1,
            step_size: 0.01,
            step_mode: StepMode::Fixed,
            natural: NaturalGradientConfig::default(),
            line_search: LineSearchConfig::default(),
            difference_delta: 1e-8,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Checkpoint path per gradient step; `{step}` is replaced by the step index.
    pub checkpoint: Option<String>,
    /// Energy log appended after every gradient step
    pub log_file: Option<PathBuf>,
    /// Checkpoint to start from instead of a fresh random state
    pub resume: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Heisenberg,
    TransverseIsing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub kind: ModelKind,
    pub l1: usize,
    pub l2: usize,
    pub coupling: f64,
    /// Transverse field, only used by the Ising model
    pub field: f64,
    pub complex: bool,
    /// Spread of the random initial parameters around 1
    pub noise: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            kind: ModelKind::Heisenberg,
            l1: 2,
            l2: 2,
            coupling: 1.0,
            field: 1.0,
            complex: false,
            noise: 0.1,
        }
    }
}

impl ModelConfig {
    pub fn lattice(&self) -> Lattice {
        Lattice::new(self.l1, self.l2)
    }

    pub fn hamiltonian(&self) -> Vec<HamiltonianTerm> {
        match self.kind {
            ModelKind::Heisenberg => models::heisenberg(self.lattice(), self.coupling),
            ModelKind::TransverseIsing => models::transverse_ising(self.lattice(), self.coupling, self.field),
        }
    }

    /// Fresh spin-1/2 product state with random parameters.
    pub fn random_state<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Result<ProductState> {
        ProductState::random(self.lattice(), 2, self.hamiltonian(), self.complex, self.noise, rng)
    }
}

/// Complete configuration of one optimization run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeConfig {
    pub sampling: SamplingConfig,
    pub gradient: GradientConfig,
    pub output: OutputConfig,
    pub model: ModelConfig,
    /// Root seed; a random one is used when absent
    pub seed: Option<u64>,
}

impl OptimizeConfig {
    /// Reject values that would only fail once sampling has started.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| Err(VmcError::Config(message.to_string()));
        if self.sampling.method != SamplingMethod::Ergodic && self.sampling.total_step == 0 {
            return invalid("sampling.total_step must be positive");
        }
        if self.sampling.cut_dimension == 0 {
            return invalid("sampling.cut_dimension must be positive");
        }
        if self.model.l1 == 0 || self.model.l2 == 0 {
            return invalid("model lattice must have at least one site");
        }
        if !(self.model.noise.is_finite() && self.model.noise >= 0.0) {
            return invalid("model.noise must be finite and non-negative");
        }
        if self.gradient.enabled {
            let gradient = &self.gradient;
            if !(gradient.step_size.is_finite() && gradient.step_size > 0.0) {
                return invalid("gradient.step_size must be positive");
            }
            if gradient.total_step == 0 {
                return invalid("gradient.total_step must be positive");
            }
            if !(gradient.natural.epsilon.is_finite() && gradient.natural.epsilon >= 0.0) {
                return invalid("gradient.natural.epsilon must be non-negative");
            }
            if !(gradient.line_search.tolerance > 0.0 && gradient.line_search.tolerance < 1.0) {
                return invalid("gradient.line_search.tolerance must lie in (0, 1)");
            }
            if !(gradient.line_search.growth > 1.0) {
                return invalid("gradient.line_search.growth must exceed 1");
            }
            if !(gradient.difference_delta.is_finite() && gradient.difference_delta > 0.0) {
                return invalid("gradient.difference_delta must be positive");
            }
        }
        Ok(())
    }

    /// Number of gradient steps the driver performs.
    pub fn gradient_total_step(&self) -> usize {
        if !self.gradient.enabled || self.gradient.step_mode == StepMode::CheckDifference {
            1
        } else {
            self.gradient.total_step
        }
    }

    /// Replay pools are only kept when something re-evaluates the samples.
    pub fn needs_reweight(&self) -> bool {
        self.gradient.enabled && self.gradient.step_mode != StepMode::Fixed
    }
}

/// Parse and validate a configuration from YAML text.
pub fn parse_config(text: &str) -> Result<OptimizeConfig> {
    let config: OptimizeConfig = serde_yaml::from_str(text)?;
    config.validate()?;
    Ok(config)
}

/// Read and validate a configuration file.
pub fn read_config<P: AsRef<Path>>(path: P) -> Result<OptimizeConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}
