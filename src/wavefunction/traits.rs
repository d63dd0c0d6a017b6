//! The variational-state contract consumed by samplers and observers.
//!
//! The optimizer never looks inside the tensors: it only needs amplitudes,
//! log-derivatives and the Hamiltonian terms to build local energies.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use super::lattice::{Configuration, Lattice, LatticeTensors};

/// A term of the Hamiltonian acting on a few sites.
///
/// Rows and columns of `matrix` enumerate the local states of `sites` in
/// mixed radix, the first site being the most significant digit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HamiltonianTerm {
    pub sites: Vec<usize>,
    pub dims: Vec<usize>,
    pub matrix: DMatrix<Complex64>,
}

impl HamiltonianTerm {
    pub fn new(sites: Vec<usize>, dims: Vec<usize>, matrix: DMatrix<Complex64>) -> Self {
        Self { sites, dims, matrix }
    }

    /// Local index of the current states of `self.sites`.
    pub fn local_index(&self, states: &[usize]) -> usize {
        self.sites
            .iter()
            .zip(&self.dims)
            .fold(0, |index, (&site, &dim)| index * dim + states[site])
    }

    /// Write the local states encoded by `index` into `states`.
    pub fn write_local(&self, mut index: usize, states: &mut [usize]) {
        for (&site, &dim) in self.sites.iter().zip(&self.dims).rev() {
            states[site] = index % dim;
            index /= dim;
        }
    }

    pub fn decode(&self, mut index: usize) -> Vec<usize> {
        let mut values = vec![0; self.sites.len()];
        for (value, &dim) in values.iter_mut().zip(&self.dims).rev() {
            *value = index % dim;
            index /= dim;
        }
        values
    }

    /// Off-diagonal columns reachable from `row`.
    pub fn hopping_targets(&self, row: usize) -> Vec<usize> {
        (0..self.matrix.ncols())
            .filter(|&col| col != row && self.matrix[(row, col)] != Complex64::new(0.0, 0.0))
            .collect()
    }
}

/// Trait for variational wavefunctions defined on a lattice.
pub trait VariationalState {
    fn lattice(&self) -> Lattice;

    /// Number of local states at `site`.
    fn physics_dimension(&self, site: usize) -> usize;

    /// Current variational parameters, one tensor per site.
    fn tensors(&self) -> &LatticeTensors;

    /// Replace all parameters. Shapes must match the current ones.
    fn set_tensors(&mut self, tensors: LatticeTensors) -> Result<()>;

    /// Whether parameters carry imaginary parts that should be varied.
    fn is_complex(&self) -> bool;

    /// Amplitude ψ(s) of one configuration.
    fn amplitude(&self, states: &[usize]) -> Complex64;

    fn hamiltonian(&self) -> &[HamiltonianTerm];

    /// O(s) = ∂ψ(s)/∂θ / ψ(s), shaped like the parameters.
    fn log_derivative(&self, configuration: &Configuration) -> LatticeTensors;

    /// Non-negative weights of every local state of site `prefix.len()`, given
    /// the states already fixed on the preceding sites. `cut_dimension` bounds
    /// the cost of the marginalization over the remaining sites.
    fn conditional_weights(&self, prefix: &[usize], cut_dimension: usize) -> Vec<f64>;

    fn site_number(&self) -> usize {
        self.lattice().site_number()
    }

    fn site_tensor(&self, site: usize) -> &DVector<Complex64> {
        self.tensors().site(site)
    }

    fn total_parameter_count(&self) -> usize {
        self.tensors().parameter_count()
    }

    /// E_L(s) = Σ_s' ⟨s|H|s'⟩ ψ(s') / ψ(s)
    fn local_energy(&self, configuration: &Configuration) -> Complex64 {
        let zero = Complex64::new(0.0, 0.0);
        let psi = configuration.amplitude();
        if psi == zero {
            return zero;
        }
        let mut energy = zero;
        let mut scratch = configuration.states().to_vec();
        for term in self.hamiltonian() {
            let row = term.local_index(configuration.states());
            for col in 0..term.matrix.ncols() {
                let element = term.matrix[(row, col)];
                if element == zero {
                    continue;
                }
                if col == row {
                    energy += element;
                    continue;
                }
                term.write_local(col, &mut scratch);
                energy += element * self.amplitude(&scratch) / psi;
                term.write_local(row, &mut scratch);
            }
        }
        energy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term() -> HamiltonianTerm {
        let mut matrix = DMatrix::zeros(6, 6);
        matrix[(1, 3)] = Complex64::new(1.0, 0.0);
        HamiltonianTerm::new(vec![2, 0], vec![2, 3], matrix)
    }

    #[test]
    fn test_local_index_round_trip() {
        let term = term();
        let states = vec![2, 9, 1];
        let index = term.local_index(&states);
        // site 2 is the most significant digit: 1 * 3 + 2
        assert_eq!(index, 5);
        let mut scratch = vec![0, 9, 0];
        term.write_local(index, &mut scratch);
        assert_eq!(scratch, states);
        assert_eq!(term.decode(index), vec![1, 2]);
    }

    #[test]
    fn test_hopping_targets_skip_diagonal() {
        let mut term = term();
        term.matrix[(1, 1)] = Complex64::new(5.0, 0.0);
        assert_eq!(term.hopping_targets(1), vec![3]);
        assert!(term.hopping_targets(0).is_empty());
    }
}
