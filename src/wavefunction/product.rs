//! Product-state ansatz: ψ(s) = Π_i a_i[s_i].
//!
//! This is the bond-dimension-one limit of a lattice tensor network. Its
//! marginals factorize, so direct sampling is exact whatever the cut dimension.

use nalgebra::DVector;
use num_complex::Complex64;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VmcError};
use super::lattice::{Configuration, Lattice, LatticeTensors};
use super::traits::{HamiltonianTerm, VariationalState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductState {
    tensors: LatticeTensors,
    hamiltonian: Vec<HamiltonianTerm>,
    complex: bool,
}

impl ProductState {
    pub fn new(tensors: LatticeTensors, hamiltonian: Vec<HamiltonianTerm>, complex: bool) -> Self {
        Self { tensors, hamiltonian, complex }
    }

    /// Random state with entries `1 + noise · N(0, 1)` (imaginary parts only
    /// when `complex`).
    pub fn random<R: Rng + ?Sized>(
        lattice: Lattice,
        physics_dimension: usize,
        hamiltonian: Vec<HamiltonianTerm>,
        complex: bool,
        noise: f64,
        rng: &mut R,
    ) -> Result<Self> {
        let normal = Normal::new(0.0, noise.abs())
            .map_err(|e| VmcError::Config(format!("initial noise: {e}")))?;
        let tensors = (0..lattice.site_number())
            .map(|_| {
                DVector::from_fn(physics_dimension, |_, _| {
                    let im = if complex { normal.sample(rng) } else { 0.0 };
                    Complex64::new(1.0 + normal.sample(rng), im)
                })
            })
            .collect();
        Ok(Self::new(LatticeTensors::new(lattice, tensors)?, hamiltonian, complex))
    }
}

impl VariationalState for ProductState {
    fn lattice(&self) -> Lattice {
        self.tensors.lattice()
    }

    fn physics_dimension(&self, site: usize) -> usize {
        self.tensors.site(site).len()
    }

    fn tensors(&self) -> &LatticeTensors {
        &self.tensors
    }

    fn set_tensors(&mut self, tensors: LatticeTensors) -> Result<()> {
        let expected = self.tensors.parameter_count();
        if tensors.lattice() != self.tensors.lattice() || tensors.parameter_count() != expected {
            return Err(VmcError::DimensionMismatch {
                expected,
                actual: tensors.parameter_count(),
            });
        }
        self.tensors = tensors;
        Ok(())
    }

    fn is_complex(&self) -> bool {
        self.complex
    }

    fn amplitude(&self, states: &[usize]) -> Complex64 {
        states
            .iter()
            .enumerate()
            .map(|(site, &s)| self.tensors.site(site)[s])
            .product()
    }

    fn hamiltonian(&self) -> &[HamiltonianTerm] {
        &self.hamiltonian
    }

    fn log_derivative(&self, configuration: &Configuration) -> LatticeTensors {
        let mut holes = self.tensors.zeros_like();
        for (site, &s) in configuration.states().iter().enumerate() {
            let entry = self.tensors.site(site)[s];
            if entry != Complex64::new(0.0, 0.0) {
                holes.site_mut(site)[s] = entry.inv();
            }
        }
        holes
    }

    fn conditional_weights(&self, prefix: &[usize], _cut_dimension: usize) -> Vec<f64> {
        self.tensors.site(prefix.len()).iter().map(|a| a.norm_sqr()).collect()
    }
}
