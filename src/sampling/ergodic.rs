//! Exhaustive enumeration of a small configuration space.

use rand::Rng;

use crate::error::{Result, VmcError};
use crate::wavefunction::{Configuration, VariationalState};
use super::traits::{Sample, Sampler};

/// Visits every configuration exactly once across all ranks: rank `r` starts
/// at index `r` and advances by the world size.
///
/// Each configuration is reported with possibility 1, so the observer's
/// reweight is the exact |ψ(s)|².
#[derive(Debug, Clone)]
pub struct ErgodicSampling {
    dims: Vec<usize>,
    total_step: usize,
    cursor: usize,
    stride: usize,
    configuration: Option<Configuration>,
}

impl ErgodicSampling {
    pub fn new<S: VariationalState + ?Sized>(state: &S, rank: usize, size: usize) -> Result<Self> {
        let dims: Vec<usize> = (0..state.site_number()).map(|site| state.physics_dimension(site)).collect();
        let total_step = dims
            .iter()
            .try_fold(1usize, |total, &dim| total.checked_mul(dim))
            .ok_or_else(|| VmcError::Config("configuration space too large for ergodic sampling".into()))?;
        if total_step == 0 {
            return Err(VmcError::Config("empty configuration space".into()));
        }
        Ok(Self {
            dims,
            total_step,
            cursor: rank % total_step,
            stride: size.max(1),
            configuration: None,
        })
    }

    /// Local states of configuration number `index`, last site fastest.
    fn decode(&self, mut index: usize) -> Vec<usize> {
        let mut states = vec![0; self.dims.len()];
        for (value, &dim) in states.iter_mut().zip(&self.dims).rev() {
            *value = index % dim;
            index /= dim;
        }
        states
    }
}

impl Sampler for ErgodicSampling {
    fn next_sample<S, R>(&mut self, state: &S, _rng: &mut R) -> Result<Sample>
    where
        S: VariationalState + ?Sized,
        R: Rng + ?Sized,
    {
        let configuration = Configuration::new(state, self.decode(self.cursor));
        self.cursor = (self.cursor + self.stride) % self.total_step;
        self.configuration = Some(configuration.clone());
        Sample::new(1.0, configuration)
    }

    fn refresh_all<S: VariationalState + ?Sized>(&mut self, state: &S) {
        if let Some(configuration) = self.configuration.as_mut() {
            configuration.refresh_all(state);
        }
    }

    fn total_step(&self) -> Option<usize> {
        Some(self.total_step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wavefunction::{Lattice, ProductState};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    #[test]
    fn test_ranks_cover_space_exactly_once() {
        let mut rng = StdRng::seed_from_u64(31);
        let state = ProductState::random(Lattice::new(2, 2), 2, vec![], false, 0.1, &mut rng).unwrap();
        let size = 3;
        let mut seen = Vec::new();
        for rank in 0..size {
            let mut sampling = ErgodicSampling::new(&state, rank, size).unwrap();
            let total = sampling.total_step().unwrap();
            assert_eq!(total, 16);
            for step in 0..total {
                if step % size == rank {
                    let sample = sampling.next_sample(&state, &mut rng).unwrap();
                    assert_eq!(sample.possibility(), 1.0);
                    seen.push(sample.configuration().states().to_vec());
                }
            }
        }
        let distinct: HashSet<Vec<usize>> = seen.iter().cloned().collect();
        assert_eq!(seen.len(), 16);
        assert_eq!(distinct.len(), 16);
    }
}
