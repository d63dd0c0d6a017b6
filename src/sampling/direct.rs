//! Direct sampling: independent draws from |ψ|², site by site.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::error::{Result, VmcError};
use crate::wavefunction::{Configuration, VariationalState};
use super::traits::{Sample, Sampler};

/// Draws every configuration independently by fixing sites in order, each
/// from its conditional distribution given the sites already fixed.
#[derive(Debug, Clone, Copy)]
pub struct DirectSampling {
    cut_dimension: usize,
}

impl DirectSampling {
    pub fn new(cut_dimension: usize) -> Result<Self> {
        if cut_dimension == 0 {
            return Err(VmcError::Config("direct sampling cut dimension must be positive".into()));
        }
        Ok(Self { cut_dimension })
    }

    pub fn cut_dimension(&self) -> usize {
        self.cut_dimension
    }

    /// Returns the local states and the probability of having drawn them.
    pub fn draw<S, R>(&self, state: &S, rng: &mut R) -> Result<(f64, Vec<usize>)>
    where
        S: VariationalState + ?Sized,
        R: Rng + ?Sized,
    {
        let site_number = state.site_number();
        let mut states = Vec::with_capacity(site_number);
        let mut possibility = 1.0;
        for site in 0..site_number {
            let weights = state.conditional_weights(&states, self.cut_dimension);
            let total: f64 = weights.iter().sum();
            let distribution =
                WeightedIndex::new(&weights).map_err(|_| VmcError::ZeroMarginal { site })?;
            let chosen = distribution.sample(rng);
            possibility *= weights[chosen] / total;
            states.push(chosen);
        }
        Ok((possibility, states))
    }
}

impl Sampler for DirectSampling {
    fn next_sample<S, R>(&mut self, state: &S, rng: &mut R) -> Result<Sample>
    where
        S: VariationalState + ?Sized,
        R: Rng + ?Sized,
    {
        let (possibility, states) = self.draw(state, rng)?;
        Sample::new(possibility, Configuration::new(state, states))
    }

    // Nothing is carried between draws.
    fn refresh_all<S: VariationalState + ?Sized>(&mut self, _state: &S) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wavefunction::{models, Lattice, ProductState};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_zero_cut_dimension_rejected() {
        assert!(DirectSampling::new(0).is_err());
    }

    #[test]
    fn test_possibility_is_normalized_amplitude() {
        let mut rng = StdRng::seed_from_u64(11);
        let lattice = Lattice::new(2, 2);
        let state = ProductState::random(lattice, 2, models::heisenberg(lattice, 1.0), false, 0.4, &mut rng).unwrap();
        let norm: f64 = state
            .tensors()
            .iter()
            .map(|t| t.iter().map(|a| a.norm_sqr()).sum::<f64>())
            .product();

        let mut sampling = DirectSampling::new(4).unwrap();
        for _ in 0..20 {
            let sample = sampling.next_sample(&state, &mut rng).unwrap();
            let exact = sample.configuration().amplitude().norm_sqr() / norm;
            assert_relative_eq!(sample.possibility(), exact, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_site_frequencies_follow_weights() {
        let mut rng = StdRng::seed_from_u64(12);
        let lattice = Lattice::new(1, 1);
        let mut state = ProductState::random(lattice, 2, vec![], false, 0.0, &mut rng).unwrap();
        let mut tensors = state.tensors().clone();
        tensors.site_mut(0)[1] = num_complex::Complex64::new(2.0, 0.0);
        state.set_tensors(tensors).unwrap();

        let sampling = DirectSampling::new(1).unwrap();
        let n = 20000;
        let ones = (0..n)
            .filter(|_| sampling.draw(&state, &mut rng).unwrap().1[0] == 1)
            .count();
        // P(1) = 4 / 5
        assert_relative_eq!(ones as f64 / n as f64, 0.8, epsilon = 0.02);
    }
}
