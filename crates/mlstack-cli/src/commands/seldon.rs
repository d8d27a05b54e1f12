//! Continuous deployment example: train, deploy and query a model.

use anyhow::{Context, Result};
use clap::Args;
use mlstack_core::ComponentKind;
use mlstack_core::deployer::{ModelDeployer, Service, load_last_service};
use std::time::Duration;
use tracing::{info, warn};

use super::{activate, load_config, load_run, run_pipeline};
use crate::demo::model::Predictions;
use crate::demo::steps::{ModelFlavor, SOLVERS};
use crate::demo::{
    DEPLOYER_STEP, DEPLOYMENT_PIPELINE, TrainingOptions, deployment_pipeline, inference_pipeline,
    sklearn_trainer_config, tf_trainer_config,
};

/// How long `--stop-service` waits for the service to go away.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(100);

#[derive(Debug, Args)]
pub struct SeldonArgs {
    /// Run the deployment pipeline to train and deploy a model
    #[arg(short, long)]
    pub deploy: bool,

    /// Run the inference pipeline to send a prediction request to the
    /// deployed model
    #[arg(short, long)]
    pub predict: bool,

    /// Flavor of model being trained
    #[arg(long, value_enum, default_value = "tensorflow")]
    pub model_flavor: ModelFlavor,

    /// Number of epochs for training (tensorflow hyperparam)
    #[arg(long, default_value = "7")]
    pub epochs: u32,

    /// Learning rate for training (tensorflow hyperparam)
    #[arg(long, default_value = "0.002")]
    pub lr: f64,

    /// Algorithm to use in the optimization problem (sklearn hyperparam)
    #[arg(long, default_value = "saga", value_parser = SOLVERS)]
    pub solver: String,

    /// Regularization (penalty) norm (sklearn hyperparam)
    #[arg(long, default_value = "l1", value_parser = ["l1", "l2", "elasticnet", "none"])]
    pub penalty: String,

    /// Regularization (penalty) strength (sklearn hyperparam)
    #[arg(long, default_value = "1.0")]
    pub penalty_strength: f64,

    /// Tolerance for stopping criteria (sklearn hyperparam)
    #[arg(long, default_value = "0.1")]
    pub toleration: f64,

    /// Minimum accuracy required to deploy the model
    #[arg(long, default_value = "0.92")]
    pub min_accuracy: f64,

    /// Kubernetes context to use
    #[arg(long)]
    pub kubernetes_context: Option<String>,

    /// Kubernetes namespace to use
    #[arg(long)]
    pub namespace: Option<String>,

    /// Seldon Core ingress base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// Stop the prediction service and exit
    #[arg(long)]
    pub stop_service: bool,

    /// Run configuration file overlaying step parameters of the deployment
    /// pipeline
    #[arg(long)]
    pub run_config: Option<String>,
}

impl SeldonArgs {
    pub fn training_options(&self) -> Result<TrainingOptions> {
        let trainer = match self.model_flavor {
            ModelFlavor::Tensorflow => tf_trainer_config(self.epochs, self.lr),
            ModelFlavor::Sklearn => sklearn_trainer_config(
                &self.solver,
                &self.penalty,
                self.penalty_strength,
                self.toleration,
            ),
        };
        Ok(TrainingOptions {
            flavor: self.model_flavor,
            trainer,
            min_accuracy: self.min_accuracy,
            run_config: load_run(self.run_config.as_deref())?,
        })
    }

    fn deployer_overrides(&self) -> [(&'static str, Option<&String>); 3] {
        [
            ("kubernetes_context", self.kubernetes_context.as_ref()),
            ("namespace", self.namespace.as_ref()),
            ("base_url", self.base_url.as_ref()),
        ]
    }
}

/// Stop the running service deployed by `pipeline`/`step`, if there is one.
pub async fn stop_last_service(
    deployer: &dyn ModelDeployer,
    pipeline: &str,
    step: &str,
    timeout: Duration,
) -> mlstack_core::Result<Option<Service>> {
    let Some(service) = load_last_service(deployer, pipeline, step, true).await? else {
        return Ok(None);
    };
    deployer.stop(&service, timeout).await?;
    Ok(Some(service))
}

pub async fn run(config_path: &str, args: SeldonArgs) -> Result<()> {
    let mut config = load_config(config_path)?;
    for (key, value) in args.deployer_overrides() {
        if let Some(value) = value {
            if !config.override_setting(ComponentKind::ModelDeployer, key, value.as_str()) {
                warn!(setting = key, "no model deployer in the active stack; ignoring override");
            }
        }
    }
    let stack = activate(&config).await?;
    let deployer = stack
        .model_deployer("seldon")
        .context("The active stack cannot deploy models")?
        .as_deployer();

    if args.stop_service {
        match stop_last_service(deployer, DEPLOYMENT_PIPELINE, DEPLOYER_STEP, STOP_TIMEOUT).await? {
            Some(service) => println!("Stopped prediction service {}", service.id),
            None => info!("no running prediction service to stop"),
        }
        return Ok(());
    }

    if args.deploy {
        let pipeline = deployment_pipeline(&args.training_options()?)?;
        let result = run_pipeline(&stack, &pipeline).await?;
        if let Some(accuracy) = result.output::<f64>("evaluator")? {
            println!("Model accuracy: {accuracy:.4} (required: {})", args.min_accuracy);
        }
    }

    if args.predict {
        let result = run_pipeline(&stack, &inference_pipeline()?).await?;
        if let Some(predictions) = result.output::<Predictions>("predictor")? {
            println!("Predictions: {:?}", predictions.classes);
        }
    }

    match load_last_service(deployer, DEPLOYMENT_PIPELINE, DEPLOYER_STEP, true).await? {
        Some(service) => match &service.prediction_url {
            Some(url) => println!(
                "The prediction server is running remotely as a Kubernetes service and \
                 accepts inference requests at:\n    {url}\n\
                 To stop the service, re-run the same command and supply the \
                 `--stop-service` argument."
            ),
            None => println!(
                "The model is served by the '{}' deployer (service {}), which has no \
                 HTTP endpoint; predictions are answered from the stored model.\n\
                 To stop the service, re-run the same command and supply the \
                 `--stop-service` argument.",
                service.flavor, service.id
            ),
        },
        None => println!(
            "No prediction server is currently running. The deployment pipeline must \
             run first to train a model and deploy it. Execute the same command with \
             the `--deploy` argument to deploy a model."
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use mlstack_core::deployer::{DeploymentSpec, ServiceStatus};
    use mlstack_deployer::LocalModelDeployer;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: SeldonArgs,
    }

    fn spec() -> DeploymentSpec {
        DeploymentSpec {
            pipeline_name: DEPLOYMENT_PIPELINE.into(),
            step_name: DEPLOYER_STEP.into(),
            model_name: "mnist".into(),
            model_uri: "file:///models/1".into(),
            replicas: 1,
            implementation: "SKLEARN_SERVER".into(),
            secret_name: None,
            parameters: Vec::new(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_defaults() {
        let cli = TestCli::parse_from(["seldon", "-d", "-p"]);
        let args = cli.args;
        assert!(args.deploy && args.predict && !args.stop_service);
        assert_eq!(args.model_flavor, ModelFlavor::Tensorflow);
        assert_eq!(args.epochs, 7);
        assert_eq!(args.lr, 0.002);
        assert_eq!(args.solver, "saga");
        assert_eq!(args.penalty, "l1");
        assert_eq!(args.penalty_strength, 1.0);
        assert_eq!(args.toleration, 0.1);
        assert_eq!(args.min_accuracy, 0.92);

        let options = args.training_options().unwrap();
        assert_eq!(options.trainer.len(), 2);
    }

    #[test]
    fn test_rejects_unknown_solver() {
        assert!(TestCli::try_parse_from(["seldon", "--solver", "adam"]).is_err());
    }

    #[tokio::test]
    async fn test_stop_without_service_does_nothing() {
        let deployer = LocalModelDeployer::in_memory();
        let stopped = stop_last_service(&deployer, DEPLOYMENT_PIPELINE, DEPLOYER_STEP, STOP_TIMEOUT)
            .await
            .unwrap();
        assert!(stopped.is_none());
    }

    #[tokio::test]
    async fn test_stop_running_service() {
        let deployer = LocalModelDeployer::in_memory();
        let service = deployer.deploy(&spec()).await.unwrap();

        let stopped = stop_last_service(&deployer, DEPLOYMENT_PIPELINE, DEPLOYER_STEP, STOP_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(stopped.map(|s| s.id), Some(service.id));

        let remaining = load_last_service(&deployer, DEPLOYMENT_PIPELINE, DEPLOYER_STEP, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(remaining.status, ServiceStatus::Inactive);
        assert!(
            load_last_service(&deployer, DEPLOYMENT_PIPELINE, DEPLOYER_STEP, true)
                .await
                .unwrap()
                .is_none()
        );
    }
}
