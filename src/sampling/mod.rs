//! Sampling module - producers of weighted configurations.

mod traits;
mod direct;
mod sweep;
mod ergodic;
mod strategy;

pub use traits::{ConfigurationPool, Sample, Sampler};
pub use direct::DirectSampling;
pub use sweep::SweepSampling;
pub use ergodic::ErgodicSampling;
pub use strategy::{SamplingMethod, SamplingStrategy};
