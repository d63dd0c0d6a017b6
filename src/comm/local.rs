//! In-process communicators.
//!
//! `SingleProcess` is the trivial group of one worker. `LocalWorld` emulates a
//! group of N workers, one per thread, with barrier-synchronized collectives;
//! each worker still runs strictly single-threaded code.
//!
//! A worker that panics poisons the group: peers waiting in a collective panic
//! too instead of blocking forever, and `run_local` re-raises the first panic.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use super::traits::Communicator;

/// A group containing only the calling worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast(&self, _data: &mut [f64], _root: usize) {}

    fn all_reduce_sum(&self, _data: &mut [f64]) {}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
struct RendezvousState {
    arrived: usize,
    generation: u64,
    /// Rank of the first worker that panicked.
    poisoned_by: Option<usize>,
}

/// A reusable barrier that can be poisoned.
struct Rendezvous {
    size: usize,
    state: Mutex<RendezvousState>,
    released: Condvar,
}

impl Rendezvous {
    fn new(size: usize) -> Self {
        Rendezvous { size, state: Mutex::new(RendezvousState::default()), released: Condvar::new() }
    }

    fn wait(&self) {
        let mut state = lock(&self.state);
        if let Some(rank) = state.poisoned_by {
            drop(state);
            panic!("worker {rank} panicked, abandoning collective");
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.size {
            state.arrived = 0;
            state.generation += 1;
            self.released.notify_all();
            return;
        }
        while state.generation == generation && state.poisoned_by.is_none() {
            state = self.released.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        if let Some(rank) = state.poisoned_by.filter(|_| state.generation == generation) {
            drop(state);
            panic!("worker {rank} panicked, abandoning collective");
        }
    }

    fn poison(&self, rank: usize) {
        let mut state = lock(&self.state);
        state.poisoned_by.get_or_insert(rank);
        self.released.notify_all();
    }

    fn poisoned_by(&self) -> Option<usize> {
        lock(&self.state).poisoned_by
    }
}

struct Shared {
    size: usize,
    barrier: Rendezvous,
    slots: Mutex<Vec<Vec<f64>>>,
}

/// One rank of a thread-backed worker group.
pub struct LocalWorld {
    rank: usize,
    shared: Arc<Shared>,
}

impl LocalWorld {
    /// Create the handles of a group of `size` ranks, indexed by rank.
    pub fn create(size: usize) -> Vec<LocalWorld> {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            size,
            barrier: Rendezvous::new(size),
            slots: Mutex::new(vec![Vec::new(); size]),
        });
        (0..size)
            .map(|rank| LocalWorld { rank, shared: Arc::clone(&shared) })
            .collect()
    }

    fn with_slots<R>(&self, f: impl FnOnce(&mut Vec<Vec<f64>>) -> R) -> R {
        f(&mut lock(&self.shared.slots))
    }
}

impl Communicator for LocalWorld {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn broadcast(&self, data: &mut [f64], root: usize) {
        if self.rank == root {
            self.with_slots(|slots| slots[root] = data.to_vec());
        }
        self.shared.barrier.wait();
        if self.rank != root {
            self.with_slots(|slots| data.copy_from_slice(&slots[root]));
        }
        // Nobody may overwrite the root slot before every rank has read it.
        self.shared.barrier.wait();
    }

    fn all_reduce_sum(&self, data: &mut [f64]) {
        self.with_slots(|slots| slots[self.rank] = data.to_vec());
        self.shared.barrier.wait();
        self.with_slots(|slots| {
            // Summing in rank order keeps the result bitwise identical on every rank.
            for (i, value) in data.iter_mut().enumerate() {
                *value = slots.iter().map(|contribution| contribution[i]).sum();
            }
        });
        self.shared.barrier.wait();
    }
}

/// Run `worker` once per rank of a fresh `LocalWorld`, each on its own thread,
/// and collect the results in rank order.
///
/// If a worker panics the whole group is torn down and the first panic is
/// propagated to the caller.
pub fn run_local<F, R>(size: usize, worker: F) -> Vec<R>
where
    F: Fn(LocalWorld) -> R + Sync,
    R: Send,
{
    let worlds = LocalWorld::create(size);
    let shared = Arc::clone(&worlds[0].shared);
    let outcomes: Vec<std::thread::Result<R>> = std::thread::scope(|scope| {
        let handles: Vec<_> = worlds
            .into_iter()
            .map(|world| {
                let worker = &worker;
                scope.spawn(move || {
                    let rank = world.rank;
                    let shared = Arc::clone(&world.shared);
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker(world)));
                    if outcome.is_err() {
                        shared.barrier.poison(rank);
                    }
                    outcome
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().and_then(|outcome| outcome)).collect()
    });

    let first = shared.barrier.poisoned_by();
    let mut results = Vec::with_capacity(outcomes.len());
    let mut payloads = Vec::new();
    for (rank, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(result) => results.push(result),
            Err(payload) => payloads.push((rank, payload)),
        }
    }
    if !payloads.is_empty() {
        let index = payloads.iter().position(|(rank, _)| Some(*rank) == first).unwrap_or(0);
        let (_, payload) = payloads.swap_remove(index);
        panic::resume_unwind(payload);
    }
    results
}
