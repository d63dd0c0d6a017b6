//! Traits and data shared by the samplers.

use rand::Rng;

use crate::error::{Result, VmcError};
use crate::wavefunction::{Configuration, VariationalState};

/// A configuration together with the possibility it was drawn with.
///
/// The possibility only needs to be proportional to the true sampling
/// probability; observers reweight by `|ψ(s)|² / possibility`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    possibility: f64,
    configuration: Configuration,
}

impl Sample {
    pub fn new(possibility: f64, configuration: Configuration) -> Result<Self> {
        if !possibility.is_finite() || possibility < 0.0 {
            return Err(VmcError::InvalidPossibility { possibility });
        }
        Ok(Self { possibility, configuration })
    }

    pub fn possibility(&self) -> f64 {
        self.possibility
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn configuration_mut(&mut self) -> &mut Configuration {
        &mut self.configuration
    }
}

/// Samples kept for one gradient step so they can be replayed against
/// modified parameters.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationPool {
    samples: Vec<Sample>,
}

impl ConfigurationPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Recompute the cached amplitudes of every pooled configuration.
    pub fn refresh_all<S: VariationalState + ?Sized>(&mut self, state: &S) {
        for sample in self.samples.iter_mut() {
            sample.configuration_mut().refresh_all(state);
        }
    }
}

/// Trait for producers of weighted configurations.
pub trait Sampler {
    /// Produce the next sample, advancing any internal chain or cursor.
    fn next_sample<S, R>(&mut self, state: &S, rng: &mut R) -> Result<Sample>
    where
        S: VariationalState + ?Sized,
        R: Rng + ?Sized;

    /// Invalidate cached amplitude data after `state` changed, keeping the
    /// sampler's own position.
    fn refresh_all<S: VariationalState + ?Sized>(&mut self, state: &S);

    /// Exact number of samples when the sampler enumerates a finite space.
    fn total_step(&self) -> Option<usize> {
        None
    }
}
