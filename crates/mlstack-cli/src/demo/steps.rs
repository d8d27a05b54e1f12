//! Steps of the example training and inference pipelines.

use mlstack_core::artifact::Artifact;
use mlstack_core::dataset::Dataset;
use mlstack_core::deployer::Service;
use mlstack_core::params::{ConfigSchema, ParamSpec};
use mlstack_core::{Error, Result};
use mlstack_stack::FnStep;
use serde_json::{Value, json};
use tracing::info;

use super::data::{TrainTestSplit, feature_rows, labels, normalize, synthetic_images};
use super::model::{LogisticModel, Optimizer, Penalty, Predictions};

pub const SOLVERS: [&str; 5] = ["newton-cg", "lbfgs", "liblinear", "sag", "saga"];

/// Model flavor chosen on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ModelFlavor {
    Tensorflow,
    Sklearn,
}

impl ModelFlavor {
    /// Seldon model server for this flavor.
    pub fn implementation(&self) -> &'static str {
        match self {
            ModelFlavor::Tensorflow => "TENSORFLOW_SERVER",
            ModelFlavor::Sklearn => "SKLEARN_SERVER",
        }
    }

    pub fn trainer(&self) -> FnStep {
        match self {
            ModelFlavor::Tensorflow => tf_trainer_step(),
            ModelFlavor::Sklearn => sklearn_trainer_step(),
        }
    }
}

/// Generates a labeled dataset and splits it. Output: [`TrainTestSplit`].
pub fn importer_step() -> FnStep {
    let schema = ConfigSchema::new()
        .param(ParamSpec::int("rows").default_value(1000_i64).min(10.0))
        .param(ParamSpec::int("seed").default_value(42_i64).min(0.0))
        .param(
            ParamSpec::float("test_fraction")
                .default_value(0.2)
                .min(0.05)
                .max(0.95),
        );
    FnStep::new(schema, |ctx| async move {
        let rows = ctx.config.require_int("rows")? as usize;
        let seed = ctx.config.require_int("seed")? as u64;
        let dataset = synthetic_images(rows, seed, true)?;
        let split = TrainTestSplit::new(&dataset, ctx.config.require_float("test_fraction")?);
        info!(
            train = split.train.num_rows(),
            test = split.test.num_rows(),
            "imported dataset"
        );
        Artifact::new(&split)
    })
}

/// Picks one half of the `split` input. Output: [`Dataset`].
pub fn split_part_step(part: &'static str) -> FnStep {
    FnStep::new(ConfigSchema::new(), move |ctx| async move {
        let split: TrainTestSplit = ctx.inputs.require(ctx.step_name(), "split")?;
        match part {
            "train" => Artifact::new(&split.train),
            _ => Artifact::new(&split.test),
        }
    })
}

/// Scales pixels of both halves of the `split` input to `[0, 1]`.
pub fn normalizer_step() -> FnStep {
    FnStep::new(ConfigSchema::new(), |ctx| async move {
        let split: TrainTestSplit = ctx.inputs.require(ctx.step_name(), "split")?;
        Artifact::new(&split.normalized()?)
    })
}

fn training_data(split: &TrainTestSplit) -> Result<(Vec<Vec<f64>>, Vec<f64>)> {
    Ok((feature_rows(&split.train)?, labels(&split.train)?))
}

/// Stochastic trainer with `epochs` and `lr`. Output: [`LogisticModel`].
pub fn tf_trainer_step() -> FnStep {
    let schema = ConfigSchema::new()
        .param(ParamSpec::int("epochs").default_value(7_i64).min(1.0))
        .param(ParamSpec::float("lr").default_value(0.002).min(0.0));
    FnStep::new(schema, |ctx| async move {
        let split: TrainTestSplit = ctx.inputs.require(ctx.step_name(), "split")?;
        let (rows, labels) = training_data(&split)?;
        let optimizer = Optimizer::Stochastic {
            epochs: ctx.config.require_int("epochs")? as usize,
            lr: ctx.config.require_float("lr")?,
        };
        let model = LogisticModel::fit("tensorflow", &rows, &labels, &optimizer)?;
        info!(step = %ctx.step_name(), ?optimizer, "trained model");
        Artifact::new(&model)
    })
}

/// Regularized batch trainer. Output: [`LogisticModel`].
pub fn sklearn_trainer_step() -> FnStep {
    let schema = ConfigSchema::new()
        .param(ParamSpec::choice("solver", &SOLVERS).default_value("saga"))
        .param(ParamSpec::choice("penalty", &Penalty::CHOICES).default_value("l1"))
        .param(ParamSpec::float("C").default_value(1.0).min(1e-9))
        .param(ParamSpec::float("tol").default_value(0.1).min(0.0))
        .param(ParamSpec::int("max_iter").default_value(100_i64).min(1.0));
    FnStep::new(schema, |ctx| async move {
        let split: TrainTestSplit = ctx.inputs.require(ctx.step_name(), "split")?;
        let (rows, labels) = training_data(&split)?;
        let solver = ctx.config.require_str("solver")?;
        let optimizer = Optimizer::Batch {
            penalty: ctx.config.require_str("penalty")?.parse()?,
            c: ctx.config.require_float("C")?,
            tol: ctx.config.require_float("tol")?,
            max_iter: ctx.config.require_int("max_iter")? as usize,
        };
        let model = LogisticModel::fit(format!("sklearn-{solver}"), &rows, &labels, &optimizer)?;
        info!(step = %ctx.step_name(), solver, ?optimizer, "trained model");
        Artifact::new(&model)
    })
}

/// Accuracy of the `model` input on the test half of `split`. Output: `f64`.
pub fn evaluator_step() -> FnStep {
    FnStep::new(ConfigSchema::new(), |ctx| async move {
        let step = ctx.step_name();
        let split: TrainTestSplit = ctx.inputs.require(step, "split")?;
        let model: LogisticModel = ctx.inputs.require(step, "model")?;
        let accuracy = model.accuracy(&feature_rows(&split.test)?, &labels(&split.test)?);
        info!(step, accuracy, "evaluated model");
        Artifact::new(&accuracy)
    })
}

/// Fresh unlabeled rows to predict on. Output: [`Dataset`].
pub fn dynamic_importer_step() -> FnStep {
    let schema = ConfigSchema::new()
        .param(ParamSpec::int("rows").default_value(4_i64).min(1.0))
        .param(ParamSpec::int("seed").default_value(7_i64).min(0.0));
    FnStep::new(schema, |ctx| async move {
        let rows = ctx.config.require_int("rows")? as usize;
        let seed = ctx.config.require_int("seed")? as u64;
        Artifact::new(&synthetic_images(rows, seed, false)?)
    })
}

/// Scales the `dataset` input the way the normalizer scaled training data.
pub fn predict_preprocessor_step() -> FnStep {
    FnStep::new(ConfigSchema::new(), |ctx| async move {
        let dataset: Dataset = ctx.inputs.require(ctx.step_name(), "dataset")?;
        Artifact::new(&normalize(&dataset)?)
    })
}

/// Classes from a Seldon `predict_proba` response.
fn parse_seldon_response(body: &Value) -> Result<Vec<u32>> {
    let rows = body["data"]["ndarray"].as_array().ok_or_else(|| {
        Error::ExecutionFailed(format!("prediction response has no data.ndarray: {body}"))
    })?;
    rows.iter()
        .map(|row| match row.as_array() {
            Some(probs) => Ok(probs
                .iter()
                .filter_map(Value::as_f64)
                .enumerate()
                .fold((0, f64::MIN), |best, (i, p)| if p > best.1 { (i, p) } else { best })
                .0 as u32),
            None => row
                .as_f64()
                .map(|p| u32::from(p >= 0.5))
                .ok_or_else(|| Error::ExecutionFailed(format!("unexpected prediction `{row}`"))),
        })
        .collect()
}

/// Sends the `data` input to the `service` input. Services with an HTTP
/// endpoint get a Seldon request; others are answered from the model in the
/// artifact store. Output: [`Predictions`].
pub fn predictor_step() -> FnStep {
    FnStep::new(ConfigSchema::new(), |ctx| async move {
        let step = ctx.step_name();
        let service: Service = ctx.inputs.require(step, "service")?;
        let data: Dataset = ctx.inputs.require(step, "data")?;
        let rows = feature_rows(&data)?;

        let classes = match &service.prediction_url {
            Some(url) => {
                let response = reqwest::Client::new()
                    .post(url)
                    .json(&json!({ "data": { "ndarray": rows } }))
                    .send()
                    .await
                    .map_err(Error::external)?;
                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(Error::ExecutionFailed(format!(
                        "prediction request to {url} failed ({status}): {text}"
                    )));
                }
                let body: Value = response.json().await.map_err(Error::external)?;
                parse_seldon_response(&body)?
            }
            None => {
                let store = ctx.stack.artifact_store(step)?.as_artifact_store();
                let bytes = store.get(&service.spec.model_uri).await?;
                let model: LogisticModel = Artifact::from_bytes(&bytes)?.decode()?;
                rows.iter().map(|row| model.predict(row)).collect()
            }
        };
        info!(step, service = %service.id, ?classes, "predicted");
        Artifact::new(&Predictions { classes })
    })
}
