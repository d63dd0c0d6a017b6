//! Lattice layout, configurations and per-site tensor collections.

use nalgebra::DVector;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VmcError};
use super::traits::VariationalState;

/// Rectangular `l1 × l2` lattice. Sites are indexed row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lattice {
    pub l1: usize,
    pub l2: usize,
}

impl Lattice {
    pub fn new(l1: usize, l2: usize) -> Self {
        Self { l1, l2 }
    }

    pub fn site_number(&self) -> usize {
        self.l1 * self.l2
    }

    pub fn index(&self, x: usize, y: usize) -> usize {
        x * self.l2 + y
    }

    pub fn coordinates(&self, site: usize) -> (usize, usize) {
        (site / self.l2, site % self.l2)
    }

    pub fn sites(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.site_number()).map(move |site| self.coordinates(site))
    }

    /// Nearest-neighbour bonds with open boundaries.
    pub fn bonds(&self) -> Vec<(usize, usize)> {
        let mut bonds = Vec::new();
        for (x, y) in self.sites() {
            if x + 1 < self.l1 {
                bonds.push((self.index(x, y), self.index(x + 1, y)));
            }
            if y + 1 < self.l2 {
                bonds.push((self.index(x, y), self.index(x, y + 1)));
            }
        }
        bonds
    }
}

/// One complex vector per lattice site.
///
/// Used both for the variational parameters of a state and for quantities
/// shaped like them (gradients, log-derivatives).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatticeTensors {
    lattice: Lattice,
    tensors: Vec<DVector<Complex64>>,
}

impl LatticeTensors {
    pub fn new(lattice: Lattice, tensors: Vec<DVector<Complex64>>) -> Result<Self> {
        if tensors.len() != lattice.site_number() {
            return Err(VmcError::DimensionMismatch {
                expected: lattice.site_number(),
                actual: tensors.len(),
            });
        }
        Ok(Self { lattice, tensors })
    }

    /// Zero tensors with the same shapes as `self`.
    pub fn zeros_like(&self) -> Self {
        Self {
            lattice: self.lattice,
            tensors: self.tensors.iter().map(|t| DVector::zeros(t.len())).collect(),
        }
    }

    pub fn lattice(&self) -> Lattice {
        self.lattice
    }

    pub fn site(&self, site: usize) -> &DVector<Complex64> {
        &self.tensors[site]
    }

    pub fn site_mut(&mut self, site: usize) -> &mut DVector<Complex64> {
        &mut self.tensors[site]
    }

    pub fn iter(&self) -> impl Iterator<Item = &DVector<Complex64>> {
        self.tensors.iter()
    }

    pub fn parameter_count(&self) -> usize {
        self.tensors.iter().map(|t| t.len()).sum()
    }

    /// Concatenate all site tensors in site order.
    pub fn flatten(&self) -> DVector<Complex64> {
        DVector::from_iterator(
            self.parameter_count(),
            self.tensors.iter().flat_map(|t| t.iter().copied()),
        )
    }

    /// Split `flat` into tensors shaped like `self`.
    pub fn unflatten_like(&self, flat: &[Complex64]) -> Result<Self> {
        if flat.len() != self.parameter_count() {
            return Err(VmcError::DimensionMismatch {
                expected: self.parameter_count(),
                actual: flat.len(),
            });
        }
        let mut offset = 0;
        let tensors = self
            .tensors
            .iter()
            .map(|t| {
                let piece = DVector::from_column_slice(&flat[offset..offset + t.len()]);
                offset += t.len();
                piece
            })
            .collect();
        Ok(Self { lattice: self.lattice, tensors })
    }

    /// Real part of `Σ conj(self) · other` over every parameter.
    pub fn dot(&self, other: &Self) -> f64 {
        self.tensors
            .iter()
            .zip(other.tensors.iter())
            .map(|(a, b)| a.dotc(b).re)
            .sum()
    }

    pub fn norm_squared(&self) -> f64 {
        self.dot(self)
    }

    /// `self - eta * direction`
    pub fn sub_scaled(&self, eta: f64, direction: &Self) -> Self {
        let tensors = self
            .tensors
            .iter()
            .zip(direction.tensors.iter())
            .map(|(a, d)| a - d * Complex64::new(eta, 0.0))
            .collect();
        Self { lattice: self.lattice, tensors }
    }
}

/// One local state per site, with the state's amplitude cached.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    states: Vec<usize>,
    amplitude: Complex64,
}

impl Configuration {
    pub fn new<S: VariationalState + ?Sized>(state: &S, states: Vec<usize>) -> Self {
        let amplitude = state.amplitude(&states);
        Self { states, amplitude }
    }

    pub fn states(&self) -> &[usize] {
        &self.states
    }

    pub fn amplitude(&self) -> Complex64 {
        self.amplitude
    }

    /// Recompute cached amplitude data against the current parameters.
    pub fn refresh_all<S: VariationalState + ?Sized>(&mut self, state: &S) {
        self.amplitude = state.amplitude(&self.states);
    }

    /// Overwrite the local states of `sites` when the caller already knows the
    /// new amplitude.
    pub(crate) fn assign(&mut self, sites: &[usize], values: &[usize], amplitude: Complex64) {
        for (&site, &value) in sites.iter().zip(values) {
            self.states[site] = value;
        }
        self.amplitude = amplitude;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tensors(values: &[&[f64]]) -> LatticeTensors {
        let lattice = Lattice::new(1, values.len());
        let tensors = values
            .iter()
            .map(|v| DVector::from_iterator(v.len(), v.iter().map(|&x| Complex64::new(x, 0.0))))
            .collect();
        LatticeTensors::new(lattice, tensors).unwrap()
    }

    #[test]
    fn test_bonds_of_2x3() {
        let lattice = Lattice::new(2, 3);
        let bonds = lattice.bonds();
        // 3 vertical + 2 * 2 horizontal
        assert_eq!(bonds.len(), 7);
        assert!(bonds.contains(&(0, 3)));
        assert!(bonds.contains(&(4, 5)));
        assert_eq!(lattice.coordinates(4), (1, 1));
    }

    #[test]
    fn test_flatten_unflatten() {
        let t = tensors(&[&[1.0, 2.0], &[3.0, 4.0, 5.0]]);
        let flat = t.flatten();
        assert_eq!(flat.len(), 5);
        let back = t.unflatten_like(flat.as_slice()).unwrap();
        assert_eq!(back, t);
        assert!(t.unflatten_like(&flat.as_slice()[..4]).is_err());
    }

    #[test]
    fn test_dot_and_sub_scaled() {
        let a = tensors(&[&[1.0, 2.0], &[3.0]]);
        let d = tensors(&[&[1.0, 0.0], &[1.0]]);
        assert_relative_eq!(a.dot(&d), 4.0);
        let b = a.sub_scaled(0.5, &d);
        assert_relative_eq!(b.site(0)[0].re, 0.5);
        assert_relative_eq!(b.site(1)[0].re, 2.5);
        assert_relative_eq!(a.norm_squared(), 14.0);
    }
}
