use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mlstack_core::artifact::Artifact;
use mlstack_core::dataset::Dataset;
use mlstack_core::params::{ConfigSchema, ParamSpec};
use mlstack_core::{Error, Result};
use tracing::info;

use crate::step::{Step, StepContext};

/// Profiles the `dataset` input (against `comparison` when wired) with the
/// active data validator and uploads the profile.
pub struct DataProfilerStep;

pub fn data_profiler_step() -> DataProfilerStep {
    DataProfilerStep
}

#[async_trait]
impl Step for DataProfilerStep {
    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new()
            .param(ParamSpec::string("dataset_timestamp"))
            .param(ParamSpec::boolean("upload").default_value(true))
            .param(ParamSpec::string("dataset_id"))
            .param(ParamSpec::string("categories"))
    }

    async fn run(&self, ctx: StepContext) -> Result<Artifact> {
        let step = ctx.step_name();
        let timestamp = ctx
            .config
            .str("dataset_timestamp")
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| {
                        Error::configuration(step, format!("invalid `dataset_timestamp`: {e}"))
                    })
            })
            .transpose()?;
        let categories: Option<Vec<String>> = ctx.config.str("categories").map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect()
        });

        let dataset: Dataset = ctx.inputs.require(step, "dataset")?;
        let comparison: Option<Dataset> = ctx.inputs.optional("comparison")?;
        let validator = ctx.stack.data_validator(step)?.as_validator();

        let view = validator.profile(
            &dataset,
            comparison.as_ref(),
            categories.as_deref(),
            timestamp,
        )?;
        info!(
            step,
            rows = view.num_rows,
            columns = view.columns.len(),
            drift = view.drift.is_some(),
            "profiled dataset"
        );

        if ctx.config.bool("upload").unwrap_or(true) {
            validator
                .upload(&view, ctx.config.str("dataset_id"), Some(&ctx.env))
                .await?;
        }
        Artifact::new(&view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{ActiveDataValidator, Stack, StackComponent};
    use crate::step::{StepInputs, invoke_step};
    use crate::steps::testing::materialized;
    use mlstack_core::dataset::Column;
    use mlstack_core::params::RawConfig;
    use mlstack_core::profile::ProfileView;
    use mlstack_core::{ComponentKind, ResourceId, StepEnvironment};
    use mlstack_validator::WhylogsDataValidator;
    use std::sync::Arc;

    fn stack() -> Arc<Stack> {
        Arc::new(Stack::new("s").with_component(
            ComponentKind::DataValidator,
            "whylogs",
            StackComponent::DataValidator(ActiveDataValidator::Whylogs(
                WhylogsDataValidator::new(None),
            )),
        ))
    }

    fn env() -> StepEnvironment {
        StepEnvironment::new("training", "skew_comparison", ResourceId::new())
    }

    fn inputs() -> StepInputs {
        let train = Dataset::new(vec![Column::float("x", vec![1.0, 2.0, 3.0])]).unwrap();
        let test = Dataset::new(vec![Column::float("x", vec![2.0, 2.0])]).unwrap();
        StepInputs::new()
            .with("dataset", materialized(&train, None))
            .with("comparison", materialized(&test, None))
    }

    #[tokio::test]
    async fn test_profiles_against_comparison() {
        let raw = RawConfig::from([
            (
                "dataset_timestamp".to_string(),
                "2024-03-01T12:00:00Z".into(),
            ),
            ("categories".to_string(), "counts, drift".into()),
        ]);
        let view: ProfileView = invoke_step(&data_profiler_step(), env(), &raw, inputs(), stack())
            .await
            .unwrap()
            .decode()
            .unwrap();

        assert_eq!(view.num_rows, 3);
        assert_eq!(view.dataset_timestamp.to_rfc3339(), "2024-03-01T12:00:00+00:00");
        assert_eq!(view.categories, vec!["counts".to_string(), "drift".to_string()]);
        assert!((view.drift.unwrap()["x"].mean_delta.unwrap()).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_bad_timestamp_is_configuration_error() {
        let raw = RawConfig::from([("dataset_timestamp".to_string(), "yesterday".into())]);
        let err = invoke_step(&data_profiler_step(), env(), &raw, inputs(), stack())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }
}
