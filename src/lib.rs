//! tn_vmc - distributed variational Monte Carlo optimization of lattice
//! wavefunctions
//!
//! A group of cooperating workers samples lattice configurations, reduces the
//! energy and its gradient with collectives, and moves the variational
//! parameters by plain or natural gradient descent with a fixed step, a line
//! search, or a finite-difference check of the gradient.

pub mod comm;
pub mod error;
pub mod interrupt;
pub mod io;
pub mod observer;
pub mod optimize;
pub mod sampling;
pub mod seed;
pub mod wavefunction;

// Re-export commonly used types at crate root
pub use comm::{run_local, Communicator, LocalWorld, SingleProcess};
pub use error::{Result, VmcError};
pub use interrupt::{InterruptCoordinator, InterruptFlag, SignalOutcome};
pub use io::{read_config, read_state, OptimizeConfig, StateWriter, YamlStateWriter};
pub use observer::{EnergyStatistic, Observer, ObserverOptions};
pub use optimize::{OptimizationDriver, RunSummary, StepMode, StepSizeSelector};
pub use sampling::{Sampler, SamplingMethod, SamplingStrategy};
pub use seed::SeedCoordinator;
pub use wavefunction::{Configuration, Lattice, LatticeTensors, ProductState, VariationalState};
