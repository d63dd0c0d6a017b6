//! Collective communication between cooperating workers.

mod traits;
mod local;

pub use traits::{agree, Communicator};
pub use local::{run_local, LocalWorld, SingleProcess};
