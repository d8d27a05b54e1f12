//! KDL configuration parsing for mlstack.
//!
//! This crate handles parsing of:
//! - Stack configuration (mlstack.kdl): components, secrets and stacks
//! - Run configuration: per-step parameters for a pipeline run
//! - Variable interpolation

pub mod error;
mod nodes;
pub mod run;
pub mod stack;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use run::{RunConfig, load_run_config, parse_run_config};
pub use stack::{
    ComponentConfig, ConfigWarning, DEFAULT_CONFIG_FILE, SecretConfig, StackConfig, StackDefinition,
    known_flavors, load_stack_config, parse_stack_config,
};
pub use variables::{VariableContext, VariableContextBuilder};
