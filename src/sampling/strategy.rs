//! Selection of the sampling strategy from configuration.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VmcError};
use crate::wavefunction::VariationalState;
use super::direct::DirectSampling;
use super::ergodic::ErgodicSampling;
use super::sweep::SweepSampling;
use super::traits::{Sample, Sampler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMethod {
    Direct,
    Sweep,
    Ergodic,
}

impl FromStr for SamplingMethod {
    type Err = VmcError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "direct" => Ok(Self::Direct),
            "sweep" => Ok(Self::Sweep),
            "ergodic" => Ok(Self::Ergodic),
            other => Err(VmcError::UnknownSamplingMethod(other.to_string())),
        }
    }
}

impl fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Direct => "direct",
            Self::Sweep => "sweep",
            Self::Ergodic => "ergodic",
        };
        f.write_str(name)
    }
}

/// One of the three samplers, behind a uniform interface.
#[derive(Debug, Clone)]
pub enum SamplingStrategy {
    Direct(DirectSampling),
    Sweep(SweepSampling),
    Ergodic(ErgodicSampling),
}

impl SamplingStrategy {
    /// Build the sampler of `method` for this rank. A sweep chain is started
    /// from one direct sample drawn with `rng`.
    pub fn build<S, R>(
        method: SamplingMethod,
        cut_dimension: usize,
        state: &S,
        rank: usize,
        size: usize,
        rng: &mut R,
    ) -> Result<Self>
    where
        S: VariationalState + ?Sized,
        R: Rng + ?Sized,
    {
        Ok(match method {
            SamplingMethod::Direct => Self::Direct(DirectSampling::new(cut_dimension)?),
            SamplingMethod::Sweep => {
                let direct = DirectSampling::new(cut_dimension)?;
                Self::Sweep(SweepSampling::from_direct(state, &direct, rng)?)
            }
            SamplingMethod::Ergodic => Self::Ergodic(ErgodicSampling::new(state, rank, size)?),
        })
    }

    pub fn method(&self) -> SamplingMethod {
        match self {
            Self::Direct(_) => SamplingMethod::Direct,
            Self::Sweep(_) => SamplingMethod::Sweep,
            Self::Ergodic(_) => SamplingMethod::Ergodic,
        }
    }
}

impl Sampler for SamplingStrategy {
    fn next_sample<S, R>(&mut self, state: &S, rng: &mut R) -> Result<Sample>
    where
        S: VariationalState + ?Sized,
        R: Rng + ?Sized,
    {
        match self {
            Self::Direct(sampling) => sampling.next_sample(state, rng),
            Self::Sweep(sampling) => sampling.next_sample(state, rng),
            Self::Ergodic(sampling) => sampling.next_sample(state, rng),
        }
    }

    fn refresh_all<S: VariationalState + ?Sized>(&mut self, state: &S) {
        match self {
            Self::Direct(sampling) => sampling.refresh_all(state),
            Self::Sweep(sampling) => sampling.refresh_all(state),
            Self::Ergodic(sampling) => sampling.refresh_all(state),
        }
    }

    fn total_step(&self) -> Option<usize> {
        match self {
            Self::Direct(sampling) => sampling.total_step(),
            Self::Sweep(sampling) => sampling.total_step(),
            Self::Ergodic(sampling) => sampling.total_step(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wavefunction::{models, Lattice, ProductState};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_unknown_method_is_rejected() {
        let err = "metropolis".parse::<SamplingMethod>().unwrap_err();
        assert!(matches!(err, VmcError::UnknownSamplingMethod(name) if name == "metropolis"));
        assert_eq!("sweep".parse::<SamplingMethod>().unwrap(), SamplingMethod::Sweep);
    }

    #[test]
    fn test_build_each_variant() {
        let mut rng = StdRng::seed_from_u64(41);
        let lattice = Lattice::new(2, 2);
        let state =
            ProductState::random(lattice, 2, models::transverse_ising(lattice, 1.0, 1.0), false, 0.2, &mut rng).unwrap();
        for method in [SamplingMethod::Direct, SamplingMethod::Sweep, SamplingMethod::Ergodic] {
            let mut strategy = SamplingStrategy::build(method, 2, &state, 0, 1, &mut rng).unwrap();
            assert_eq!(strategy.method(), method);
            let sample = strategy.next_sample(&state, &mut rng).unwrap();
            assert_eq!(sample.configuration().states().len(), 4);
        }
    }
}
