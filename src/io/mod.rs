//! IO module - run configuration, checkpoints and the energy log.

mod config;
mod checkpoint;

pub use config::{
    parse_config, read_config, GradientConfig, LineSearchConfig, ModelConfig, ModelKind, NaturalGradientConfig,
    OptimizeConfig, OutputConfig, SamplingConfig,
};
pub use checkpoint::{append_energy_log, checkpoint_path, read_state, StateWriter, YamlStateWriter};
