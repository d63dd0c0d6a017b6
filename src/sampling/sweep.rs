//! Markov-chain sampling driven by the hopping terms of the Hamiltonian.

use rand::Rng;
use tracing::debug;

use crate::error::Result;
use crate::wavefunction::{Configuration, VariationalState};
use super::direct::DirectSampling;
use super::traits::{Sample, Sampler};

/// Single Metropolis chain. One call performs one sweep over every
/// Hamiltonian term and returns the resulting configuration.
#[derive(Debug, Clone)]
pub struct SweepSampling {
    configuration: Configuration,
    proposed: usize,
    accepted: usize,
}

impl SweepSampling {
    pub fn new(configuration: Configuration) -> Self {
        Self { configuration, proposed: 0, accepted: 0 }
    }

    /// Start the chain from one direct sample, which is already distributed
    /// close to |ψ|².
    pub fn from_direct<S, R>(state: &S, direct: &DirectSampling, rng: &mut R) -> Result<Self>
    where
        S: VariationalState + ?Sized,
        R: Rng + ?Sized,
    {
        let (_, states) = direct.draw(state, rng)?;
        Ok(Self::new(Configuration::new(state, states)))
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn acceptance_rate(&self) -> f64 {
        if self.proposed == 0 {
            return 0.0;
        }
        self.accepted as f64 / self.proposed as f64
    }

    fn sweep<S, R>(&mut self, state: &S, rng: &mut R)
    where
        S: VariationalState + ?Sized,
        R: Rng + ?Sized,
    {
        let mut proposal = self.configuration.states().to_vec();
        for term in state.hamiltonian() {
            let row = term.local_index(self.configuration.states());
            let targets = term.hopping_targets(row);
            if targets.is_empty() {
                continue;
            }
            let col = targets[rng.gen_range(0..targets.len())];
            let reverse = term.hopping_targets(col).len();
            if reverse == 0 {
                continue;
            }

            term.write_local(col, &mut proposal);
            let amplitude = state.amplitude(&proposal);
            // Proposal asymmetry: forward picks 1/|targets|, backward 1/|reverse|.
            let ratio = amplitude.norm_sqr() / self.configuration.amplitude().norm_sqr()
                * targets.len() as f64
                / reverse as f64;
            self.proposed += 1;
            if rng.gen::<f64>() < ratio {
                self.configuration.assign(&term.sites, &term.decode(col), amplitude);
                self.accepted += 1;
            } else {
                term.write_local(row, &mut proposal);
            }
        }
    }
}

impl Sampler for SweepSampling {
    fn next_sample<S, R>(&mut self, state: &S, rng: &mut R) -> Result<Sample>
    where
        S: VariationalState + ?Sized,
        R: Rng + ?Sized,
    {
        self.sweep(state, rng);
        Sample::new(self.configuration.amplitude().norm_sqr(), self.configuration.clone())
    }

    fn refresh_all<S: VariationalState + ?Sized>(&mut self, state: &S) {
        debug!(acceptance = self.acceptance_rate(), "sweep chain refreshed");
        self.configuration.refresh_all(state);
    }
}
