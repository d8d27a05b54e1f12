use async_trait::async_trait;
use mlstack_core::artifact::Artifact;
use mlstack_core::deployer::{DeploymentOutcome, DeploymentSpec, ModelParameter, load_last_service};
use mlstack_core::params::{ConfigSchema, ParamSpec};
use mlstack_core::{Error, Result};
use tracing::info;

use crate::step::{Step, StepContext};

/// Decides whether a model is good enough to deploy: `accuracy >= min_accuracy`.
pub struct DeploymentTriggerStep;

pub fn deployment_trigger_step() -> DeploymentTriggerStep {
    DeploymentTriggerStep
}

#[async_trait]
impl Step for DeploymentTriggerStep {
    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new().param(ParamSpec::float("min_accuracy").required().min(0.0).max(1.0))
    }

    async fn run(&self, ctx: StepContext) -> Result<Artifact> {
        let step = ctx.step_name();
        let min_accuracy = ctx.config.require_float("min_accuracy")?;
        let accuracy: f64 = ctx.inputs.require(step, "accuracy")?;
        let decision = accuracy >= min_accuracy;
        info!(step, accuracy, min_accuracy, decision, "deployment decision");
        Artifact::new(&decision)
    }
}

/// Deploys the `model` input with the active model deployer when the
/// `deploy_decision` input is true.
///
/// When the decision is false nothing is deployed and the outcome carries the
/// service currently running for this step, if any.
pub struct ModelDeployerStep;

pub fn model_deployer_step() -> ModelDeployerStep {
    ModelDeployerStep
}

fn parse_parameters(step: &str, raw: Option<&str>) -> Result<Vec<ModelParameter>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    serde_json::from_str(raw)
        .map_err(|e| Error::configuration(step, format!("invalid `parameters` JSON: {e}")))
}

fn bounded<T: TryFrom<i64>>(step: &str, name: &str, value: i64) -> Result<T> {
    T::try_from(value)
        .map_err(|_| Error::configuration(step, format!("`{name}` value {value} is out of range")))
}

#[async_trait]
impl Step for ModelDeployerStep {
    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new()
            .param(ParamSpec::string("model_name").required())
            .param(
                ParamSpec::int("replicas")
                    .default_value(1_i64)
                    .min(1.0)
                    .max(f64::from(u32::MAX)),
            )
            .param(ParamSpec::string("implementation").default_value("SKLEARN_SERVER"))
            .param(ParamSpec::string("secret_name"))
            .param(ParamSpec::int("timeout").default_value(300_i64).min(0.0))
            .param(ParamSpec::string("parameters"))
    }

    async fn run(&self, ctx: StepContext) -> Result<Artifact> {
        let step = ctx.step_name();
        let parameters = parse_parameters(step, ctx.config.str("parameters"))?;
        let decision: bool = ctx.inputs.require(step, "deploy_decision")?;
        let model = ctx.inputs.require_raw(step, "model")?;
        let deployer = ctx.stack.model_deployer(step)?.as_deployer();
        let pipeline = &ctx.env.pipeline_name;

        if !decision {
            let service = load_last_service(deployer, pipeline, step, true).await?;
            info!(
                pipeline = %pipeline,
                step,
                running = service.is_some(),
                "model not deployed: deployment decision was negative"
            );
            return Artifact::new(&DeploymentOutcome {
                deployed: false,
                service,
            });
        }

        let model_uri = model.uri.clone().ok_or_else(|| {
            Error::Validation(format!(
                "step `{step}` needs a stored model, but the stack has no artifact store"
            ))
        })?;
        let spec = DeploymentSpec {
            pipeline_name: pipeline.clone(),
            step_name: step.to_string(),
            model_name: ctx.config.require_str("model_name")?.to_string(),
            model_uri,
            replicas: bounded(step, "replicas", ctx.config.require_int("replicas")?)?,
            implementation: ctx.config.require_str("implementation")?.to_string(),
            secret_name: ctx.config.str("secret_name").map(str::to_string),
            parameters,
            timeout_secs: bounded(step, "timeout", ctx.config.require_int("timeout")?)?,
        };

        let service = deployer.deploy(&spec).await?;
        info!(
            pipeline = %pipeline,
            step,
            service = %service.id,
            url = service.prediction_url.as_deref().unwrap_or("-"),
            "model deployed"
        );
        Artifact::new(&DeploymentOutcome {
            deployed: true,
            service: Some(service),
        })
    }
}

/// Looks up the service deployed by another pipeline's step.
pub struct PredictionServiceLoaderStep;

pub fn prediction_service_loader_step() -> PredictionServiceLoaderStep {
    PredictionServiceLoaderStep
}

#[async_trait]
impl Step for PredictionServiceLoaderStep {
    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new()
            .param(ParamSpec::string("pipeline_name").required())
            .param(ParamSpec::string("step_name").required())
            .param(ParamSpec::boolean("running").default_value(true))
    }

    async fn run(&self, ctx: StepContext) -> Result<Artifact> {
        let step = ctx.step_name();
        let pipeline_name = ctx.config.require_str("pipeline_name")?;
        let step_name = ctx.config.require_str("step_name")?;
        let running = ctx.config.require_bool("running")?;
        let deployer = ctx.stack.model_deployer(step)?.as_deployer();

        let service = load_last_service(deployer, pipeline_name, step_name, running)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "no {}service deployed by step `{step_name}` of pipeline `{pipeline_name}`",
                    if running { "running " } else { "" }
                ))
            })?;
        Artifact::new(&service)
    }
}
