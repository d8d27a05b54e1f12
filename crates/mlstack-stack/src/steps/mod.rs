//! Built-in integration steps.

mod alert;
mod deployment;
mod profiler;

pub use alert::{SlackAlerterPostStep, slack_alerter_post_step};
pub use deployment::{
    DeploymentTriggerStep, ModelDeployerStep, PredictionServiceLoaderStep,
    deployment_trigger_step, model_deployer_step, prediction_service_loader_step,
};
pub use profiler::{DataProfilerStep, data_profiler_step};

#[cfg(test)]
pub(crate) mod testing {
    use mlstack_core::ResourceId;
    use mlstack_core::artifact::{Artifact, ArtifactType, MaterializedArtifact};

    pub fn materialized<T: ArtifactType>(value: &T, uri: Option<&str>) -> MaterializedArtifact {
        let artifact = Artifact::new(value).unwrap();
        MaterializedArtifact {
            id: ResourceId::new(),
            checksum: artifact.checksum().unwrap(),
            artifact,
            uri: uri.map(str::to_string),
        }
    }
}
