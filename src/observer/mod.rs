//! Observer module - weighted statistics and the natural-gradient solve.

mod accumulate;
mod natural;

pub use accumulate::{EnergyStatistic, Observer, ObserverOptions, ObserverResult};
pub use natural::{conjugate_gradient, CgOutcome, DenseOperator, LinearOperator, SampledMetric, DEFAULT_CG_TOLERANCE};
