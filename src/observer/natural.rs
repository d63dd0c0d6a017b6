//! Conjugate-gradient solve for the natural gradient.
//!
//! The stochastic-reconfiguration metric
//!
//!   S_ij = ⟨conj(O_i) O_j⟩ - ⟨conj(O_i)⟩⟨O_j⟩
//!
//! is never formed: each application sums over the locally stored samples and
//! reduces across ranks, so memory stays linear in the parameter count.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

use crate::comm::Communicator;

/// Relative residual at which the solve stops early.
pub const DEFAULT_CG_TOLERANCE: f64 = 1e-10;

/// A Hermitian positive semi-definite linear map.
pub trait LinearOperator {
    fn dim(&self) -> usize;

    fn apply(&self, v: &DVector<Complex64>) -> DVector<Complex64>;
}

/// Explicit matrix, for small problems.
#[derive(Debug, Clone)]
pub struct DenseOperator(pub DMatrix<Complex64>);

impl LinearOperator for DenseOperator {
    fn dim(&self) -> usize {
        self.0.nrows()
    }

    fn apply(&self, v: &DVector<Complex64>) -> DVector<Complex64> {
        &self.0 * v
    }
}

/// Metric estimated from the weighted log-derivatives held by this rank.
/// Every application is collective.
pub struct SampledMetric<'a, C: Communicator> {
    pub(crate) comm: &'a C,
    pub(crate) samples: &'a [(f64, DVector<Complex64>)],
    /// ⟨O⟩ over all ranks
    pub(crate) mean: DVector<Complex64>,
    pub(crate) total_weight: f64,
}

impl<C: Communicator> LinearOperator for SampledMetric<'_, C> {
    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn apply(&self, v: &DVector<Complex64>) -> DVector<Complex64> {
        let mut local = DVector::zeros(self.dim());
        for (weight, holes) in self.samples {
            let coefficient = holes.dot(v) * *weight;
            local += holes.map(|o| o.conj()) * coefficient;
        }
        self.comm.all_reduce_sum_complex(local.as_mut_slice());
        local / Complex64::new(self.total_weight, 0.0) - self.mean.map(|o| o.conj()) * self.mean.dot(v)
    }
}

#[derive(Debug, Clone)]
pub struct CgOutcome {
    pub solution: DVector<Complex64>,
    pub iterations: usize,
    pub residual_norm: f64,
    pub converged: bool,
}

/// Solve `(A + epsilon·I) x = b` with at most `max_steps` iterations.
///
/// Returns the current iterate when the cap is reached; non-convergence is
/// reported through `converged`, never as an error.
pub fn conjugate_gradient<A: LinearOperator + ?Sized>(
    operator: &A,
    b: &DVector<Complex64>,
    epsilon: f64,
    max_steps: usize,
    tolerance: f64,
) -> CgOutcome {
    let shift = Complex64::new(epsilon, 0.0);
    let b_norm = b.norm();
    let mut x = DVector::zeros(b.len());
    let mut r = b.clone();
    let mut p = r.clone();
    let mut rs = r.dotc(&r).re;
    let mut iterations = 0;

    while iterations < max_steps && rs.sqrt() > tolerance * b_norm {
        let ap = operator.apply(&p) + &p * shift;
        let pap = p.dotc(&ap).re;
        if pap <= 0.0 {
            break;
        }
        let alpha = Complex64::new(rs / pap, 0.0);
        x += &p * alpha;
        r -= &ap * alpha;
        let rs_next = r.dotc(&r).re;
        p = &r + &p * Complex64::new(rs_next / rs, 0.0);
        rs = rs_next;
        iterations += 1;
    }

    let residual_norm = rs.sqrt();
    CgOutcome {
        solution: x,
        iterations,
        residual_norm,
        converged: residual_norm <= tolerance * b_norm,
    }
}
