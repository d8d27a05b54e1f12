//! Step execution environment.

use serde::{Deserialize, Serialize};

use crate::ResourceId;

/// Identity of the step being executed, passed explicitly to every
/// invocation and to components that need it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEnvironment {
    pub pipeline_name: String,
    pub step_name: String,
    pub run_id: ResourceId,
}

impl StepEnvironment {
    pub fn new(
        pipeline_name: impl Into<String>,
        step_name: impl Into<String>,
        run_id: ResourceId,
    ) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            step_name: step_name.into(),
            run_id,
        }
    }
}
