//! Error types for the optimization driver.

use thiserror::Error;

/// Errors raised while configuring or running a variational optimization.
#[derive(Error, Debug)]
pub enum VmcError {
    /// Sampling method name not recognized
    #[error("unknown sampling method `{0}`, expected one of direct, sweep, ergodic")]
    UnknownSamplingMethod(String),

    /// Step-size mode name not recognized
    #[error("unknown step size mode `{0}`, expected one of fixed, line_search, check_difference")]
    UnknownStepMode(String),

    /// Any other invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A sampler reported a negative or non-finite possibility
    #[error("invalid sample possibility {possibility}")]
    InvalidPossibility { possibility: f64 },

    /// Direct sampling hit a site whose conditional weights are all zero
    #[error("conditional weights vanish at site {site}")]
    ZeroMarginal { site: usize },

    /// A flattened vector did not match the lattice layout
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Observer used out of order (e.g. finalize before begin)
    #[error("observer misuse: {0}")]
    Observer(&'static str),

    /// Every sample in an accumulation window carried zero weight
    #[error("accumulation window has zero total weight")]
    ZeroWeight,

    /// Another worker failed inside a collective phase
    #[error("a peer worker failed during {0}")]
    PeerFailure(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for optimization operations
pub type Result<T> = std::result::Result<T, VmcError>;
