//! Optimization module - descent directions, step sizes and the driver loop.

mod gradient;
mod step_size;
mod driver;

pub use gradient::{apply_update, broadcast_state, descent_direction, step_normalization, NaturalGradientOptions};
pub use step_size::{
    check_difference, line_search, DifferenceReport, LineSearchOutcome, StepMode, StepSizeSelector,
    DEFAULT_DIFFERENCE_DELTA, DEFAULT_LINE_SEARCH_GROWTH, DEFAULT_LINE_SEARCH_TOLERANCE,
};
pub use driver::{OptimizationDriver, RunSummary};
