//! Pipeline definitions.

use mlstack_config::RunConfig;
use mlstack_core::params::{ParamValue, RawConfig};
use mlstack_core::{Error, Result};
use mlstack_stack::Step;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// A step registered in a pipeline.
#[derive(Clone)]
pub struct StepSpec {
    pub name: String,
    pub step: Arc<dyn Step>,
    /// Input parameter name and the upstream step that produces it.
    pub inputs: Vec<(String, String)>,
    /// Steps that must finish first without passing an artifact.
    pub after: Vec<String>,
    pub config: RawConfig,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, step: impl Step + 'static) -> Self {
        Self::shared(name, Arc::new(step))
    }

    pub fn shared(name: impl Into<String>, step: Arc<dyn Step>) -> Self {
        Self {
            name: name.into(),
            step,
            inputs: Vec::new(),
            after: Vec::new(),
            config: RawConfig::new(),
        }
    }

    /// Feed the output of `upstream` into parameter `param`.
    pub fn input(mut self, param: impl Into<String>, upstream: impl Into<String>) -> Self {
        self.inputs.push((param.into(), upstream.into()));
        self
    }

    pub fn after(mut self, upstream: impl Into<String>) -> Self {
        self.after.push(upstream.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn config(mut self, config: RawConfig) -> Self {
        self.config.extend(config);
        self
    }

    /// Every step this one waits for, in declaration order.
    pub fn upstream(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .map(|(_, upstream)| upstream.as_str())
            .chain(self.after.iter().map(String::as_str))
    }
}

impl std::fmt::Debug for StepSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepSpec")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("after", &self.after)
            .field("config", &self.config)
            .finish()
    }
}

/// A validated pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    steps: Vec<StepSpec>,
    /// Indices into `steps` in execution order.
    order: Vec<usize>,
}

impl Pipeline {
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder {
            name: name.into(),
            steps: Vec::new(),
            run_config: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps in registration order.
    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    /// Steps in execution order.
    pub fn ordered_steps(&self) -> impl Iterator<Item = &StepSpec> {
        self.order.iter().map(|&i| &self.steps[i])
    }

    pub fn step(&self, name: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.name == name)
    }
}

pub struct PipelineBuilder {
    name: String,
    steps: Vec<StepSpec>,
    run_config: Option<RunConfig>,
}

impl PipelineBuilder {
    pub fn step(mut self, spec: StepSpec) -> Self {
        self.steps.push(spec);
        self
    }

    /// Overlay step parameters from a run configuration file.
    pub fn with_run_config(mut self, run_config: &RunConfig) -> Self {
        self.run_config = Some(run_config.clone());
        self
    }

    /// Check the step graph and every step's configuration.
    pub fn build(mut self) -> Result<Pipeline> {
        let invalid = |msg: String| Error::InvalidPipeline(format!("`{}`: {msg}", self.name));

        let mut seen = BTreeSet::new();
        for spec in &self.steps {
            if !seen.insert(spec.name.as_str()) {
                return Err(invalid(format!("duplicate step `{}`", spec.name)));
            }
        }
        for spec in &self.steps {
            if let Some(unknown) = spec.upstream().find(|u| !seen.contains(u)) {
                return Err(invalid(format!(
                    "step `{}` depends on unknown step `{unknown}`",
                    spec.name
                )));
            }
            let mut params = BTreeSet::new();
            if let Some((param, _)) = spec.inputs.iter().find(|(p, _)| !params.insert(p)) {
                return Err(invalid(format!(
                    "step `{}` wires input `{param}` twice",
                    spec.name
                )));
            }
        }

        if let Some(run_config) = &self.run_config {
            if run_config.pipeline != self.name {
                return Err(invalid(format!(
                    "run configuration is for pipeline `{}`",
                    run_config.pipeline
                )));
            }
            for (step, params) in &run_config.steps {
                let Some(spec) = self.steps.iter_mut().find(|s| &s.name == step) else {
                    return Err(invalid(format!(
                        "run configuration sets parameters for unknown step `{step}`"
                    )));
                };
                spec.config.extend(params.clone());
            }
        }

        let order = topological_order(&self.steps).map_err(invalid)?;

        for spec in &self.steps {
            spec.step.config_schema().validate(&spec.name, &spec.config)?;
        }

        Ok(Pipeline {
            name: self.name,
            steps: self.steps,
            order,
        })
    }
}

/// Kahn's algorithm; among ready steps the earliest registered runs first.
fn topological_order(steps: &[StepSpec]) -> std::result::Result<Vec<usize>, String> {
    let index: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();
    let deps: Vec<BTreeSet<usize>> = steps
        .iter()
        .map(|s| s.upstream().filter_map(|u| index.get(u).copied()).collect())
        .collect();

    let mut placed = vec![false; steps.len()];
    let mut order = Vec::with_capacity(steps.len());
    while order.len() < steps.len() {
        let next = (0..steps.len()).find(|&i| !placed[i] && deps[i].iter().all(|&d| placed[d]));
        match next {
            Some(i) => {
                placed[i] = true;
                order.push(i);
            }
            None => {
                let stuck: Vec<&str> = (0..steps.len())
                    .filter(|&i| !placed[i])
                    .map(|i| steps[i].name.as_str())
                    .collect();
                return Err(format!("dependency cycle among steps {stuck:?}"));
            }
        }
    }
    Ok(order)
}
