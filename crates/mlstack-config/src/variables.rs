//! Variable interpolation for configuration values and step messages.
//!
//! Supports variables like:
//! - `${pipeline.name}` - Pipeline name
//! - `${run.id}` - Run ID
//! - `${step.name}` - Current step name
//! - `${env.VAR_NAME}` - Environment variable
//! - `${timestamp}` - Unix timestamp
//! - `${date}` - ISO date (YYYY-MM-DD)
//! - `${name}` - Custom variable
//!
//! Unknown variables are left in place.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Variables available for interpolation.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub pipeline_name: Option<String>,
    pub run_id: Option<String>,
    pub step_name: Option<String>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Custom variables defined by the caller
    pub custom: HashMap<String, String>,
}

static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}")
        .expect("variable pattern is valid")
});

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context holding the current process environment.
    pub fn from_env() -> Self {
        let mut ctx = Self::new();
        ctx.populate_env();
        ctx
    }

    pub fn populate_env(&mut self) {
        self.env.extend(std::env::vars());
    }

    /// Add a custom variable.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.custom.insert(name.to_string(), value.into());
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["pipeline", "name"] => self.pipeline_name.clone(),
            ["run", "id"] => self.run_id.clone(),
            ["step", "name"] => self.step_name.clone(),
            ["env", name] => self.env.get(*name).cloned(),
            ["timestamp"] => Some(chrono::Utc::now().timestamp().to_string()),
            ["date"] => Some(chrono::Utc::now().format("%Y-%m-%d").to_string()),
            [name] => self.custom.get(*name).cloned(),
            _ => None,
        }
    }

    /// Interpolate all `${...}` variables in a string.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }
}

/// Builder for creating VariableContext.
#[derive(Default)]
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pipeline(mut self, name: impl Into<String>) -> Self {
        self.ctx.pipeline_name = Some(name.into());
        self
    }

    pub fn with_run(mut self, id: impl Into<String>) -> Self {
        self.ctx.run_id = Some(id.into());
        self
    }

    pub fn with_step(mut self, name: impl Into<String>) -> Self {
        self.ctx.step_name = Some(name.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}
