//! The `whylogs` data validator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mlstack_core::dataset::Dataset;
use mlstack_core::profile::{DataValidator, ProfileView};
use mlstack_core::secret::WhylabsSecretSchema;
use mlstack_core::{Error, Result, StepEnvironment};
use std::sync::Arc;
use tracing::debug;

use crate::profiler::profile_dataset;
use crate::writer::{ProfileWriter, UploadTarget, WhyLabsWriter};

pub const FLAVOR: &str = "whylogs";

/// Profiles datasets locally and uploads profiles to WhyLabs when a
/// `whylabs` secret is attached.
pub struct WhylogsDataValidator {
    secret: Option<WhylabsSecretSchema>,
    writer: Arc<dyn ProfileWriter>,
}

impl WhylogsDataValidator {
    pub fn new(secret: Option<WhylabsSecretSchema>) -> Self {
        Self::with_writer(secret, Arc::new(WhyLabsWriter::new()))
    }

    pub fn with_writer(secret: Option<WhylabsSecretSchema>, writer: Arc<dyn ProfileWriter>) -> Self {
        Self { secret, writer }
    }

    pub fn has_credentials(&self) -> bool {
        self.secret.is_some()
    }
}

/// Pick the dataset id: explicit, then the secret default, then
/// `{pipeline}_{step}`. Empty ids count as absent.
fn resolve_dataset_id(
    explicit: Option<&str>,
    secret: &WhylabsSecretSchema,
    env: Option<&StepEnvironment>,
) -> Result<String> {
    let chosen = explicit.filter(|id| !id.is_empty()).or_else(|| {
        secret
            .default_dataset_id
            .as_deref()
            .filter(|id| !id.is_empty())
    });
    if let Some(id) = chosen {
        return Ok(id.to_string());
    }
    env.map(|env| format!("{}_{}", env.pipeline_name, env.step_name))
        .ok_or(Error::MissingDatasetId)
}

#[async_trait]
impl DataValidator for WhylogsDataValidator {
    fn flavor(&self) -> &'static str {
        FLAVOR
    }

    fn profile(
        &self,
        dataset: &Dataset,
        comparison: Option<&Dataset>,
        categories: Option<&[String]>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<ProfileView> {
        Ok(profile_dataset(dataset, comparison, categories, timestamp))
    }

    async fn upload(
        &self,
        profile: &ProfileView,
        dataset_id: Option<&str>,
        env: Option<&StepEnvironment>,
    ) -> Result<()> {
        let Some(secret) = &self.secret else {
            debug!("no WhyLabs secret configured, skipping profile upload");
            return Ok(());
        };
        let target = UploadTarget {
            org_id: secret.org_id.clone(),
            api_key: secret.api_key.clone(),
            dataset_id: resolve_dataset_id(dataset_id, secret, env)?,
        };
        self.writer.write(profile, &target).await
    }
}
