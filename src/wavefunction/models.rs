//! Spin-1/2 lattice Hamiltonians.

use nalgebra::DMatrix;
use num_complex::Complex64;

use super::lattice::Lattice;
use super::traits::HamiltonianTerm;

fn real_matrix(n: usize, values: &[f64]) -> DMatrix<Complex64> {
    DMatrix::from_row_iterator(n, n, values.iter().map(|&x| Complex64::new(x, 0.0)))
}

/// J Σ_<ij> S_i · S_j on nearest-neighbour bonds.
pub fn heisenberg(lattice: Lattice, coupling: f64) -> Vec<HamiltonianTerm> {
    let j = coupling / 4.0;
    #[rustfmt::skip]
    let matrix = real_matrix(4, &[
        j,   0.0,       0.0,       0.0,
        0.0, -j,        2.0 * j,   0.0,
        0.0, 2.0 * j,   -j,        0.0,
        0.0, 0.0,       0.0,       j,
    ]);
    lattice
        .bonds()
        .into_iter()
        .map(|(a, b)| HamiltonianTerm::new(vec![a, b], vec![2, 2], matrix.clone()))
        .collect()
}

/// -J Σ_<ij> σz_i σz_j - h Σ_i σx_i
pub fn transverse_ising(lattice: Lattice, coupling: f64, field: f64) -> Vec<HamiltonianTerm> {
    let j = coupling;
    #[rustfmt::skip]
    let bond = real_matrix(4, &[
        -j,  0.0, 0.0, 0.0,
        0.0, j,   0.0, 0.0,
        0.0, 0.0, j,   0.0,
        0.0, 0.0, 0.0, -j,
    ]);
    let flip = real_matrix(2, &[0.0, -field, -field, 0.0]);

    let mut terms: Vec<HamiltonianTerm> = lattice
        .bonds()
        .into_iter()
        .map(|(a, b)| HamiltonianTerm::new(vec![a, b], vec![2, 2], bond.clone()))
        .collect();
    terms.extend((0..lattice.site_number()).map(|site| HamiltonianTerm::new(vec![site], vec![2], flip.clone())));
    terms
}
