//! Wavefunction module - lattice states consumed by the optimizer.

mod traits;
mod lattice;
mod product;
pub mod models;

pub use traits::{HamiltonianTerm, VariationalState};
pub use lattice::{Configuration, Lattice, LatticeTensors};
pub use product::ProductState;
