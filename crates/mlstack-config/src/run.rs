//! Run configuration parsing.
//!
//! ```kdl
//! run "continuous_deployment_pipeline" {
//!     step "trainer" { epochs 5; lr 0.003; }
//!     step "deployment_trigger" { min_accuracy 0.8; }
//! }
//! ```

use kdl::KdlDocument;
use mlstack_core::params::RawConfig;
use std::collections::BTreeMap;
use std::path::Path;

use crate::nodes::{get_first_string_arg, param_children};
use crate::{ConfigError, ConfigResult, VariableContext};

/// Step parameters for one pipeline, keyed by step name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunConfig {
    pub pipeline: String,
    pub steps: BTreeMap<String, RawConfig>,
}

impl RunConfig {
    pub fn step(&self, name: &str) -> Option<&RawConfig> {
        self.steps.get(name)
    }
}

/// Parse a run configuration from KDL text.
pub fn parse_run_config(kdl: &str, vars: &VariableContext) -> ConfigResult<RunConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut runs = doc.nodes().iter().filter(|n| n.name().value() == "run");
    let node = runs
        .next()
        .ok_or_else(|| ConfigError::MissingField("run".to_string()))?;
    if runs.next().is_some() {
        return Err(ConfigError::Duplicate("run".to_string()));
    }

    let pipeline = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("run pipeline name".to_string()))?;

    let mut steps = BTreeMap::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() != "step" {
                continue;
            }
            let step = get_first_string_arg(child)
                .ok_or_else(|| ConfigError::MissingField("step name".to_string()))?;
            let params = param_children(child, vars)?;
            if steps.insert(step.clone(), params).is_some() {
                return Err(ConfigError::Duplicate(format!("step `{step}`")));
            }
        }
    }

    Ok(RunConfig { pipeline, steps })
}

/// Read and parse a run configuration file.
pub fn load_run_config(path: impl AsRef<Path>) -> ConfigResult<RunConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_run_config(&text, &VariableContext::from_env())
}
