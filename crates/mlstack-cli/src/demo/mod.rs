//! Example pipelines: a small logistic-regression model trained on synthetic
//! images, deployed with the active model deployer and queried for
//! predictions.

pub mod data;
pub mod model;
pub mod steps;

use mlstack_config::RunConfig;
use mlstack_core::Result;
use mlstack_core::params::{ParamValue, RawConfig};
use mlstack_scheduler::{Pipeline, PipelineBuilder, StepSpec};
use mlstack_stack::steps::{
    data_profiler_step, deployment_trigger_step, model_deployer_step,
    prediction_service_loader_step, slack_alerter_post_step,
};

use steps::{
    ModelFlavor, dynamic_importer_step, evaluator_step, importer_step, normalizer_step,
    predict_preprocessor_step, predictor_step, split_part_step,
};

pub const DEPLOYMENT_PIPELINE: &str = "continuous_deployment_pipeline";
pub const INFERENCE_PIPELINE: &str = "inference_pipeline";
pub const TRAINING_PIPELINE: &str = "training_pipeline";
pub const DEPLOYER_STEP: &str = "model_deployer";

const MODEL_NAME: &str = "mnist";
const SECRET_NAME: &str = "seldon-rclone-secret";
const DEPLOY_TIMEOUT_SECS: i64 = 120;
const SERVER_PARAMETERS: &str =
    r#"[{"name": "method", "type": "STRING", "value": "predict_proba"}]"#;

/// Settings shared by the pipelines that train a model.
#[derive(Debug, Clone)]
pub struct TrainingOptions {
    pub flavor: ModelFlavor,
    /// Trainer parameters; keys depend on the flavor.
    pub trainer: RawConfig,
    pub min_accuracy: f64,
    pub run_config: Option<RunConfig>,
}

fn deployer_spec(flavor: ModelFlavor) -> StepSpec {
    StepSpec::new(DEPLOYER_STEP, model_deployer_step())
        .input("deploy_decision", "deployment_trigger")
        .input("model", "trainer")
        .param("model_name", MODEL_NAME)
        .param("replicas", 1_i64)
        .param("implementation", flavor.implementation())
        .param("secret_name", SECRET_NAME)
        .param("timeout", DEPLOY_TIMEOUT_SECS)
        .param("parameters", SERVER_PARAMETERS)
}

fn trigger_spec(min_accuracy: f64) -> StepSpec {
    StepSpec::new("deployment_trigger", deployment_trigger_step())
        .input("accuracy", "evaluator")
        .param("min_accuracy", min_accuracy)
}

fn build(builder: PipelineBuilder, run_config: Option<&RunConfig>) -> Result<Pipeline> {
    match run_config {
        Some(run_config) => builder.with_run_config(run_config).build(),
        None => builder.build(),
    }
}

/// importer → normalizer → trainer → evaluator → deployment_trigger → model_deployer
pub fn deployment_pipeline(options: &TrainingOptions) -> Result<Pipeline> {
    let builder = Pipeline::builder(DEPLOYMENT_PIPELINE)
        .step(StepSpec::new("importer", importer_step()))
        .step(StepSpec::new("normalizer", normalizer_step()).input("split", "importer"))
        .step(
            StepSpec::new("trainer", options.flavor.trainer())
                .input("split", "normalizer")
                .config(options.trainer.clone()),
        )
        .step(
            StepSpec::new("evaluator", evaluator_step())
                .input("split", "normalizer")
                .input("model", "trainer"),
        )
        .step(trigger_spec(options.min_accuracy))
        .step(deployer_spec(options.flavor));
    build(builder, options.run_config.as_ref())
}

/// dynamic_importer → predict_preprocessor → prediction_service_loader → predictor
pub fn inference_pipeline() -> Result<Pipeline> {
    Pipeline::builder(INFERENCE_PIPELINE)
        .step(StepSpec::new("dynamic_importer", dynamic_importer_step()))
        .step(
            StepSpec::new("predict_preprocessor", predict_preprocessor_step())
                .input("dataset", "dynamic_importer"),
        )
        .step(
            StepSpec::new("prediction_service_loader", prediction_service_loader_step())
                .param("pipeline_name", DEPLOYMENT_PIPELINE)
                .param("step_name", DEPLOYER_STEP),
        )
        .step(
            StepSpec::new("predictor", predictor_step())
                .input("service", "prediction_service_loader")
                .input("data", "predict_preprocessor"),
        )
        .build()
}

/// Optional parts of the training pipeline.
#[derive(Debug, Clone, Default)]
pub struct TrainingExtras {
    /// Profile the train split against the test split.
    pub skew_comparison: bool,
    pub deploy: bool,
    /// Post this message through the alerter once evaluation is done.
    pub notify: Option<String>,
}

/// training_data_loader → (skew_comparison) → normalizer → trainer → evaluator
/// → (deployment_trigger → model_deployer) → (alert)
pub fn training_pipeline(options: &TrainingOptions, extras: &TrainingExtras) -> Result<Pipeline> {
    let mut builder = Pipeline::builder(TRAINING_PIPELINE)
        .step(StepSpec::new("training_data_loader", importer_step()))
        .step(
            StepSpec::new("normalizer", normalizer_step()).input("split", "training_data_loader"),
        )
        .step(
            StepSpec::new("trainer", options.flavor.trainer())
                .input("split", "normalizer")
                .config(options.trainer.clone()),
        )
        .step(
            StepSpec::new("evaluator", evaluator_step())
                .input("split", "normalizer")
                .input("model", "trainer"),
        );
    if extras.skew_comparison {
        builder = builder
            .step(
                StepSpec::new("train_data", split_part_step("train"))
                    .input("split", "training_data_loader"),
            )
            .step(
                StepSpec::new("test_data", split_part_step("test"))
                    .input("split", "training_data_loader"),
            )
            .step(
                StepSpec::new("skew_comparison", data_profiler_step())
                    .input("dataset", "train_data")
                    .input("comparison", "test_data")
                    .param("categories", "counts,drift"),
            );
    }
    if extras.deploy {
        builder = builder
            .step(trigger_spec(options.min_accuracy))
            .step(deployer_spec(options.flavor));
    }
    if let Some(message) = &extras.notify {
        builder = builder.step(
            StepSpec::new("alert", slack_alerter_post_step(message.clone())).after("evaluator"),
        );
    }
    build(builder, options.run_config.as_ref())
}

/// Trainer parameters for the tensorflow flavor.
pub fn tf_trainer_config(epochs: u32, lr: f64) -> RawConfig {
    RawConfig::from([
        ("epochs".to_string(), ParamValue::from(epochs)),
        ("lr".to_string(), ParamValue::from(lr)),
    ])
}

/// Trainer parameters for the sklearn flavor.
pub fn sklearn_trainer_config(solver: &str, penalty: &str, c: f64, tol: f64) -> RawConfig {
    RawConfig::from([
        ("solver".to_string(), ParamValue::from(solver)),
        ("penalty".to_string(), ParamValue::from(penalty)),
        ("C".to_string(), ParamValue::from(c)),
        ("tol".to_string(), ParamValue::from(tol)),
    ])
}
