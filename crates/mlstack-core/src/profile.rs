//! Data profiles and the data validator capability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::artifact::ArtifactType;
use crate::dataset::Dataset;
use crate::{Result, StepEnvironment};

/// Type inferred from the non-missing cells of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferredType {
    Fractional,
    String,
    /// Every cell is missing.
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub inferred_type: InferredType,
    pub count: u64,
    pub null_count: u64,
    pub distinct_count: u64,
    pub numeric: Option<NumericSummary>,
}

/// Per-column difference between the profiled dataset and a comparison
/// dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDrift {
    pub null_ratio_delta: f64,
    pub mean_delta: Option<f64>,
    pub stddev_ratio: Option<f64>,
    /// The column is absent from the comparison dataset.
    pub missing_in_comparison: bool,
}

/// Statistical profile of a dataset at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileView {
    pub dataset_timestamp: DateTime<Utc>,
    pub num_rows: u64,
    pub columns: BTreeMap<String, ColumnProfile>,
    pub drift: Option<BTreeMap<String, ColumnDrift>>,
    pub categories: Vec<String>,
}

impl ArtifactType for ProfileView {
    const TYPE_NAME: &'static str = "profile_view";
}

/// Trait for data validators.
#[async_trait]
pub trait DataValidator: Send + Sync {
    fn flavor(&self) -> &'static str;

    /// Profile `dataset`, optionally against a baseline.
    ///
    /// Deterministic for identical content and timestamp; the timestamp
    /// defaults to the current time.
    fn profile(
        &self,
        dataset: &Dataset,
        comparison: Option<&Dataset>,
        categories: Option<&[String]>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<ProfileView>;

    /// Export a profile to the monitoring backend, if credentials are
    /// configured. Without credentials this is a no-op.
    ///
    /// The dataset id is taken from `dataset_id`, then the configured
    /// default, then `{pipeline}_{step}` derived from `env`.
    async fn upload(
        &self,
        profile: &ProfileView,
        dataset_id: Option<&str>,
        env: Option<&StepEnvironment>,
    ) -> Result<()>;
}
