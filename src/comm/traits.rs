//! The collective-communication substrate consumed by the driver.

use num_complex::Complex64;

use crate::error::{Result, VmcError};

/// Collective operations over a fixed group of workers.
///
/// Every method is a synchronization point: all ranks of the group must call
/// the same sequence of collectives, otherwise the run deadlocks.
pub trait Communicator {
    /// Index of this worker in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of workers in the group.
    fn size(&self) -> usize;

    /// Overwrite `data` on every rank with the contents held by `root`.
    fn broadcast(&self, data: &mut [f64], root: usize);

    /// Replace `data` on every rank with the element-wise sum over all ranks.
    fn all_reduce_sum(&self, data: &mut [f64]);

    /// Logical OR of `flag` over all ranks.
    fn all_reduce_or(&self, flag: bool) -> bool {
        let mut value = [if flag { 1.0 } else { 0.0 }];
        self.all_reduce_sum(&mut value);
        value[0] > 0.0
    }

    fn is_root(&self) -> bool {
        self.rank() == 0
    }

    /// Sum of a single scalar over all ranks.
    fn all_reduce_scalar(&self, value: f64) -> f64 {
        let mut buffer = [value];
        self.all_reduce_sum(&mut buffer);
        buffer[0]
    }

    /// Broadcast a single scalar from `root`.
    fn broadcast_scalar(&self, value: f64, root: usize) -> f64 {
        let mut buffer = [value];
        self.broadcast(&mut buffer, root);
        buffer[0]
    }

    /// Element-wise complex sum, packed as interleaved real/imaginary parts.
    fn all_reduce_sum_complex(&self, data: &mut [Complex64]) {
        let mut packed = pack_complex(data);
        self.all_reduce_sum(&mut packed);
        unpack_complex(&packed, data);
    }

    fn broadcast_complex(&self, data: &mut [Complex64], root: usize) {
        let mut packed = pack_complex(data);
        self.broadcast(&mut packed, root);
        unpack_complex(&packed, data);
    }
}

/// Turn a rank-local outcome into a collective one. Every rank fails when any
/// rank failed; ranks that succeeded report [`VmcError::PeerFailure`].
pub fn agree<C: Communicator + ?Sized, T>(comm: &C, local: Result<T>, phase: &'static str) -> Result<T> {
    let failed = comm.all_reduce_or(local.is_err());
    match local {
        Ok(_) if failed => Err(VmcError::PeerFailure(phase)),
        other => other,
    }
}

fn pack_complex(data: &[Complex64]) -> Vec<f64> {
    data.iter().flat_map(|z| [z.re, z.im]).collect()
}

fn unpack_complex(packed: &[f64], data: &mut [Complex64]) {
    for (z, pair) in data.iter_mut().zip(packed.chunks_exact(2)) {
        *z = Complex64::new(pair[0], pair[1]);
    }
}
