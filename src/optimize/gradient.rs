//! Descent directions and parameter updates.

use num_complex::Complex64;
use tracing::debug;

use crate::comm::Communicator;
use crate::error::{Result, VmcError};
use crate::observer::Observer;
use crate::wavefunction::{LatticeTensors, VariationalState};

/// Conjugate-gradient settings of the natural gradient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NaturalGradientOptions {
    pub max_steps: usize,
    pub epsilon: f64,
}

/// Direction of steepest ascent for one step: the plain energy gradient, or
/// the metric-preconditioned one when `natural` is set. Collective.
pub fn descent_direction<C: Communicator>(
    comm: &C,
    observer: &Observer,
    natural: Option<NaturalGradientOptions>,
) -> Result<LatticeTensors> {
    match natural {
        Some(options) => {
            debug!(max_steps = options.max_steps, epsilon = options.epsilon, "calculating natural gradient");
            observer.natural_gradient(comm, options.max_steps, options.epsilon)
        }
        None => observer
            .gradient()
            .cloned()
            .ok_or(VmcError::Observer("gradient was not collected")),
    }
}

/// `sqrt(⟨θ,θ⟩ / ⟨d,d⟩)`, taken from rank 0 so every rank scales identically.
///
/// A vanishing direction gives 0, which turns the update into a no-op.
pub fn step_normalization<C: Communicator>(comm: &C, parameters: &LatticeTensors, direction: &LatticeTensors) -> f64 {
    let direction_norm = direction.norm_squared();
    let local = if direction_norm > 0.0 {
        (parameters.norm_squared() / direction_norm).sqrt()
    } else {
        0.0
    };
    comm.broadcast_scalar(local, 0)
}

/// Set the state to `origin - eta * direction`. Real states keep real entries.
pub fn apply_update<S: VariationalState + ?Sized>(
    state: &mut S,
    origin: &LatticeTensors,
    eta: f64,
    direction: &LatticeTensors,
) -> Result<()> {
    let mut next = origin.sub_scaled(eta, direction);
    if !state.is_complex() {
        let real: Vec<Complex64> = next.flatten().iter().map(|z| Complex64::new(z.re, 0.0)).collect();
        next = next.unflatten_like(&real)?;
    }
    state.set_tensors(next)
}

/// Overwrite the parameters of every rank with those of rank 0.
pub fn broadcast_state<C, S>(comm: &C, state: &mut S) -> Result<()>
where
    C: Communicator,
    S: VariationalState + ?Sized,
{
    let mut flat = state.tensors().flatten();
    comm.broadcast_complex(flat.as_mut_slice(), 0);
    let tensors = state.tensors().unflatten_like(flat.as_slice())?;
    state.set_tensors(tensors)
}
