//! Training pipeline with optional skew comparison, deployment and alerting.

use anyhow::{Result, bail};
use clap::Args;
use mlstack_core::ComponentKind;
use mlstack_core::profile::ProfileView;
use tracing::info;

use super::{activate, load_config, load_run, run_pipeline};
use crate::demo::steps::{ModelFlavor, SOLVERS};
use crate::demo::{
    TrainingExtras, TrainingOptions, sklearn_trainer_config, tf_trainer_config, training_pipeline,
};

#[derive(Debug, Args)]
pub struct TrainArgs {
    /// Flavor of model being trained
    #[arg(long, value_enum, default_value = "sklearn")]
    pub model_flavor: ModelFlavor,

    /// Number of epochs (tensorflow)
    #[arg(long, default_value = "7")]
    pub epochs: u32,

    /// Learning rate (tensorflow)
    #[arg(long, default_value = "0.002")]
    pub lr: f64,

    /// Solver (sklearn)
    #[arg(long, default_value = "saga", value_parser = SOLVERS)]
    pub solver: String,

    /// Regularization norm (sklearn)
    #[arg(long, default_value = "l1", value_parser = ["l1", "l2", "elasticnet", "none"])]
    pub penalty: String,

    /// Inverse regularization strength (sklearn)
    #[arg(long, default_value = "1.0")]
    pub penalty_strength: f64,

    /// Tolerance for stopping criteria (sklearn)
    #[arg(long, default_value = "0.1")]
    pub toleration: f64,

    /// Minimum accuracy required to deploy the model
    #[arg(long, default_value = "0.92")]
    pub min_accuracy: f64,

    /// Deploy the model when it is accurate enough
    #[arg(long)]
    pub deploy: bool,

    /// Post this message through the stack's alerter after evaluation
    #[arg(long)]
    pub notify: Option<String>,

    /// Run configuration file overlaying step parameters
    #[arg(long)]
    pub run_config: Option<String>,
}

impl TrainArgs {
    fn training_options(&self) -> Result<TrainingOptions> {
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
}

pub async fn run(config_path: &str, args: TrainArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let stack = activate(&config).await?;

    if args.deploy && !stack.has(ComponentKind::ModelDeployer) {
        bail!("--deploy needs a model deployer in stack '{}'", stack.name());
    }
    if args.notify.is_some() && !stack.has(ComponentKind::Alerter) {
        bail!("--notify needs an alerter in stack '{}'", stack.name());
    }
    let skew_comparison = stack.has(ComponentKind::DataValidator);
    if !skew_comparison {
        info!(stack = %stack.name(), "no data validator in the stack; skipping skew comparison");
    }

    let extras = TrainingExtras {
        skew_comparison,
        deploy: args.deploy,
        notify: args.notify.clone(),
    };
    let pipeline = training_pipeline(&args.training_options()?, &extras)?;
    let result = run_pipeline(&stack, &pipeline).await?;

    if let Some(accuracy) = result.output::<f64>("evaluator")? {
        println!("Model accuracy: {accuracy:.4}");
    }
    if let Some(profile) = result.output::<ProfileView>("skew_comparison")? {
        println!("Skew comparison ({} training rows):", profile.num_rows);
        for (column, drift) in profile.drift.iter().flatten() {
            match drift.mean_delta {
                Some(delta) => println!("  {column:<12} mean delta {delta:+.4}"),
                None => println!("  {column:<12} null ratio delta {:+.4}", drift.null_ratio_delta),
            }
        }
    }
    if args.deploy {
        match result.output::<bool>("deployment_trigger")? {
            Some(true) => println!("Model deployed"),
            _ => println!("Model not deployed: accuracy below {}", args.min_accuracy),
        }
    }
    Ok(())
}
