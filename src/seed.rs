//! Random seed coordination across workers.
//!
//! Outside of sampling every worker must take identical random decisions, so
//! the generator is kept *synchronized*. While sampling, each worker needs an
//! independent stream, so the generator is temporarily *diversified* by mixing
//! the rank into a shared draw.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::comm::Communicator;

/// Seeds are drawn from `0..MAX_SEED`.
pub const MAX_SEED: u64 = 1 << 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedRegime {
    Synchronized,
    Diversified,
}

/// Seed of `rank` derived from a draw shared by all workers.
pub fn diversified_seed(shared_draw: u64, rank: usize) -> u64 {
    (shared_draw + rank as u64) % MAX_SEED
}

/// Owner of the worker's random generator and of its seeding regime.
pub struct SeedCoordinator {
    rng: StdRng,
    regime: SeedRegime,
}

impl SeedCoordinator {
    /// Create the coordinator in the synchronized regime.
    ///
    /// `root_seed` may differ between workers; the initial synchronization
    /// averages it away.
    pub fn new<C: Communicator>(comm: &C, root_seed: u64) -> Self {
        let mut coordinator = Self {
            rng: StdRng::seed_from_u64(root_seed),
            regime: SeedRegime::Diversified,
        };
        coordinator.enter_synchronized(comm);
        coordinator
    }

    pub fn regime(&self) -> SeedRegime {
        self.regime
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Reseed with a per-worker seed. Must be called from the synchronized regime
    /// so that the shared draw agrees on every rank.
    pub fn enter_diversified<C: Communicator>(&mut self, comm: &C) -> u64 {
        let draw = self.rng.gen_range(0..MAX_SEED);
        let seed = diversified_seed(draw, comm.rank());
        trace!(rank = comm.rank(), seed, "diversified seed");
        self.rng = StdRng::seed_from_u64(seed);
        self.regime = SeedRegime::Diversified;
        seed
    }

    /// Reseed with one seed shared by every worker. Collective.
    pub fn enter_synchronized<C: Communicator>(&mut self, comm: &C) -> u64 {
        let draw = self.rng.gen_range(0..MAX_SEED);
        let share = (draw / comm.size() as u64) as f64;
        // Shares are below 2^31, so their sum is exact in f64.
        let seed = comm.all_reduce_scalar(share) as u64;
        trace!(rank = comm.rank(), seed, "synchronized seed");
        self.rng = StdRng::seed_from_u64(seed);
        self.regime = SeedRegime::Synchronized;
        seed
    }

    /// Run `body` with a per-worker generator, then return to the synchronized
    /// regime whatever `body` produced.
    pub fn diversified<C, R>(&mut self, comm: &C, body: impl FnOnce(&mut StdRng) -> R) -> R
    where
        C: Communicator,
    {
        self.enter_diversified(comm);
        let result = body(&mut self.rng);
        self.enter_synchronized(comm);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{run_local, SingleProcess};
    use crate::error::{Result, VmcError};
    use std::collections::HashSet;

    #[test]
    fn test_diversified_seeds_are_pairwise_distinct() {
        let draw = MAX_SEED - 3;
        let seeds: HashSet<u64> = (0..16).map(|rank| diversified_seed(draw, rank)).collect();
        assert_eq!(seeds.len(), 16);
        assert!(seeds.iter().all(|&seed| seed < MAX_SEED));
    }

    #[test]
    fn test_synchronized_seed_is_shared() {
        let seeds = run_local(4, |world| {
            // Deliberately different root seeds per rank.
            let mut seeds = SeedCoordinator::new(&world, 17 + world.rank() as u64);
            seeds.enter_synchronized(&world)
        });
        assert!(seeds.iter().all(|&seed| seed == seeds[0]));
    }

    #[test]
    fn test_diversified_regime_differs_across_ranks() {
        let seeds = run_local(4, |world| {
            let mut seeds = SeedCoordinator::new(&world, 5);
            let seed = seeds.enter_diversified(&world);
            seeds.enter_synchronized(&world);
            seed
        });
        let distinct: HashSet<u64> = seeds.iter().copied().collect();
        assert_eq!(distinct.len(), 4);
    }

    #[test]
    fn test_scope_restores_synchronized_on_error() {
        let comm = SingleProcess;
        let mut seeds = SeedCoordinator::new(&comm, 1);
        let result: Result<()> = seeds.diversified(&comm, |_| Err(VmcError::ZeroWeight));
        assert!(result.is_err());
        assert_eq!(seeds.regime(), SeedRegime::Synchronized);
    }

    #[test]
    fn test_same_root_reproduces_stream() {
        let comm = SingleProcess;
        let mut a = SeedCoordinator::new(&comm, 99);
        let mut b = SeedCoordinator::new(&comm, 99);
        let xa: f64 = a.diversified(&comm, |rng| rng.gen());
        let xb: f64 = b.diversified(&comm, |rng| rng.gen());
        assert_eq!(xa, xb);
    }
}
