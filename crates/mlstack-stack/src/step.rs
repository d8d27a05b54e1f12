//! The step contract.

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use mlstack_core::artifact::{Artifact, ArtifactType, MaterializedArtifact};
use mlstack_core::params::{ConfigSchema, RawConfig, StepConfig};
use mlstack_core::{Error, Result, StepEnvironment};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::stack::Stack;

/// Materialized upstream outputs, keyed by the consuming step's parameter
/// name.
#[derive(Debug, Clone, Default)]
pub struct StepInputs {
    inputs: BTreeMap<String, MaterializedArtifact>,
}

impl StepInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, artifact: MaterializedArtifact) {
        self.inputs.insert(name.into(), artifact);
    }

    pub fn with(mut self, name: impl Into<String>, artifact: MaterializedArtifact) -> Self {
        self.insert(name, artifact);
        self
    }

    pub fn get(&self, name: &str) -> Option<&MaterializedArtifact> {
        self.inputs.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.inputs.keys().map(String::as_str)
    }

    /// Decode the required input `name`.
    pub fn require<T: ArtifactType>(&self, step: &str, name: &str) -> Result<T> {
        self.require_raw(step, name)?.decode()
    }

    pub fn require_raw(&self, step: &str, name: &str) -> Result<&MaterializedArtifact> {
        self.get(name).ok_or_else(|| {
            Error::InvalidPipeline(format!("step `{step}` is missing input `{name}`"))
        })
    }

    pub fn optional<T: ArtifactType>(&self, name: &str) -> Result<Option<T>> {
        self.get(name).map(MaterializedArtifact::decode).transpose()
    }
}

/// Everything a step invocation may use.
pub struct StepContext {
    pub env: StepEnvironment,
    pub config: StepConfig,
    pub inputs: StepInputs,
    pub stack: Arc<Stack>,
}

impl StepContext {
    pub fn step_name(&self) -> &str {
        &self.env.step_name
    }
}

/// A unit of pipeline work.
#[async_trait]
pub trait Step: Send + Sync {
    /// Parameters accepted by this step.
    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new()
    }

    async fn run(&self, ctx: StepContext) -> Result<Artifact>;
}

type StepFn = dyn Fn(StepContext) -> BoxFuture<'static, Result<Artifact>> + Send + Sync;

/// A step built from a closure.
pub struct FnStep {
    schema: ConfigSchema,
    func: Box<StepFn>,
}

impl FnStep {
    pub fn new<F, Fut>(schema: ConfigSchema, func: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Artifact>> + Send + 'static,
    {
        Self {
            schema,
            func: Box::new(move |ctx| func(ctx).boxed()),
        }
    }
}

#[async_trait]
impl Step for FnStep {
    fn config_schema(&self) -> ConfigSchema {
        self.schema.clone()
    }

    async fn run(&self, ctx: StepContext) -> Result<Artifact> {
        (self.func)(ctx).await
    }
}

/// Validate `raw` against the step's schema and run it.
///
/// `run` is never called when validation fails.
pub async fn invoke_step(
    step: &dyn Step,
    env: StepEnvironment,
    raw: &RawConfig,
    inputs: StepInputs,
    stack: Arc<Stack>,
) -> Result<Artifact> {
    let config = step.config_schema().validate(&env.step_name, raw)?;
    debug!(
        pipeline = %env.pipeline_name,
        step = %env.step_name,
        inputs = ?inputs.names().collect::<Vec<_>>(),
        "invoking step"
    );
    step.run(StepContext {
        env,
        config,
        inputs,
        stack,
    })
    .await
}
