//! Logistic regression used by the example trainers.

use mlstack_core::artifact::ArtifactType;
use mlstack_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Penalty {
    L1,
    L2,
    ElasticNet,
    None,
}

impl Penalty {
    pub const CHOICES: [&'static str; 4] = ["l1", "l2", "elasticnet", "none"];
}

impl FromStr for Penalty {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "l1" => Ok(Penalty::L1),
            "l2" => Ok(Penalty::L2),
            "elasticnet" => Ok(Penalty::ElasticNet),
            "none" => Ok(Penalty::None),
            other => Err(Error::Validation(format!("unknown penalty `{other}`"))),
        }
    }
}

/// How the weights are fitted.
#[derive(Debug, Clone, PartialEq)]
pub enum Optimizer {
    /// One update per row, a fixed number of passes.
    Stochastic { epochs: usize, lr: f64 },
    /// Full-batch gradient descent with a regularization term, stopping once
    /// the loss improves by less than `tol`.
    Batch {
        penalty: Penalty,
        /// Inverse regularization strength.
        c: f64,
        tol: f64,
        max_iter: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    /// Which trainer produced the model.
    pub flavor: String,
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl ArtifactType for LogisticModel {
    const TYPE_NAME: &'static str = "logistic_model";
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

const BATCH_LR: f64 = 0.5;

impl LogisticModel {
    pub fn fit(
        flavor: impl Into<String>,
        rows: &[Vec<f64>],
        labels: &[f64],
        optimizer: &Optimizer,
    ) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Err(Error::Validation("cannot train on an empty dataset".into()));
        };
        if rows.len() != labels.len() {
            return Err(Error::Validation(format!(
                "{} rows but {} labels",
                rows.len(),
                labels.len()
            )));
        }
        let mut model = Self {
            flavor: flavor.into(),
            weights: vec![0.0; first.len()],
            bias: 0.0,
        };

        match *optimizer {
            Optimizer::Stochastic { epochs, lr } => {
                for _ in 0..epochs {
                    for (row, &label) in rows.iter().zip(labels) {
                        let err = model.predict_proba(row) - label;
                        for (w, x) in model.weights.iter_mut().zip(row) {
                            *w -= lr * err * x;
                        }
                        model.bias -= lr * err;
                    }
                }
            }
            Optimizer::Batch {
                penalty,
                c,
                tol,
                max_iter,
            } => {
                let n = rows.len() as f64;
                let lambda = 1.0 / (c * n);
                let mut previous = f64::INFINITY;
                for _ in 0..max_iter {
                    let mut grad = vec![0.0; model.weights.len()];
                    let mut grad_bias = 0.0;
                    for (row, &label) in rows.iter().zip(labels) {
                        let err = model.predict_proba(row) - label;
                        for (g, x) in grad.iter_mut().zip(row) {
                            *g += err * x / n;
                        }
                        grad_bias += err / n;
                    }
                    for (g, w) in grad.iter_mut().zip(&model.weights) {
                        *g += lambda
                            * match penalty {
                                Penalty::L1 => w.signum(),
                                Penalty::L2 => *w,
                                Penalty::ElasticNet => 0.5 * (w.signum() + w),
                                Penalty::None => 0.0,
                            };
                    }
                    for (w, g) in model.weights.iter_mut().zip(&grad) {
                        *w -= BATCH_LR * g;
                    }
                    model.bias -= BATCH_LR * grad_bias;

                    let loss = model.log_loss(rows, labels);
                    if (previous - loss).abs() < tol {
                        break;
                    }
                    previous = loss;
                }
            }
        }
        Ok(model)
    }

    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        let z: f64 = self.weights.iter().zip(row).map(|(w, x)| w * x).sum();
        sigmoid(z + self.bias)
    }

    pub fn predict(&self, row: &[f64]) -> u32 {
        u32::from(self.predict_proba(row) >= 0.5)
    }

    pub fn accuracy(&self, rows: &[Vec<f64>], labels: &[f64]) -> f64 {
        if rows.is_empty() {
            return 0.0;
        }
        let correct = rows
            .iter()
            .zip(labels)
            .filter(|(row, label)| f64::from(self.predict(row)) == **label)
            .count();
        correct as f64 / rows.len() as f64
    }

    fn log_loss(&self, rows: &[Vec<f64>], labels: &[f64]) -> f64 {
        let total: f64 = rows
            .iter()
            .zip(labels)
            .map(|(row, &label)| {
                let p = self.predict_proba(row).clamp(1e-12, 1.0 - 1e-12);
                -(label * p.ln() + (1.0 - label) * (1.0 - p).ln())
            })
            .sum();
        total / rows.len() as f64
    }
}

/// Class predictions for a batch of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    pub classes: Vec<u32>,
}

impl ArtifactType for Predictions {
    const TYPE_NAME: &'static str = "predictions";
}
