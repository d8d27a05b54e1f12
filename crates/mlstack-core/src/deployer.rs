//! Model deployer trait and prediction service types.
//!
//! A model deployer turns a trained model into a long-running prediction
//! service (Seldon Core on Kubernetes, a local registry, ...). Services are
//! identified by the pipeline and step that deployed them, so a redeploy from
//! the same step updates the existing service in place.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::artifact::ArtifactType;
use crate::{ResourceId, Result};

/// Extra parameter handed to the model server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub value: String,
}

/// Specification for a model deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    /// Pipeline that produced the deployment.
    pub pipeline_name: String,
    /// Step that produced the deployment.
    pub step_name: String,
    /// Name of the model being served.
    pub model_name: String,
    /// Location of the model in the artifact store.
    pub model_uri: String,
    /// Number of serving replicas.
    pub replicas: u32,
    /// Model server implementation (e.g. `SKLEARN_SERVER`, `TENSORFLOW_SERVER`).
    pub implementation: String,
    /// Secret holding credentials the model server needs to fetch the model.
    pub secret_name: Option<String>,
    pub parameters: Vec<ModelParameter>,
    /// Seconds to wait for the service to become available.
    pub timeout_secs: u64,
}

impl DeploymentSpec {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Lifecycle status of a prediction service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Created but not yet serving.
    Pending,
    /// Serving predictions.
    Active,
    /// Stopped.
    Inactive,
    /// The backend reported a failure.
    Error(String),
}

/// A deployed prediction service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: ResourceId,
    pub pipeline_name: String,
    pub step_name: String,
    pub model_name: String,
    /// Flavor of the deployer that owns the service.
    pub flavor: String,
    /// Endpoint accepting prediction requests, once known.
    pub prediction_url: Option<String>,
    pub status: ServiceStatus,
    pub spec: DeploymentSpec,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Service {
    pub fn is_running(&self) -> bool {
        self.status == ServiceStatus::Active
    }
}

impl ArtifactType for Service {
    const TYPE_NAME: &'static str = "service";
}

/// Filter for [`ModelDeployer::find_services`]. Empty fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceQuery {
    pub pipeline_name: Option<String>,
    pub step_name: Option<String>,
    pub model_name: Option<String>,
    /// Only return services that are currently running.
    pub running_only: bool,
}

impl ServiceQuery {
    pub fn for_step(pipeline_name: &str, step_name: &str) -> Self {
        Self {
            pipeline_name: Some(pipeline_name.to_string()),
            step_name: Some(step_name.to_string()),
            ..Default::default()
        }
    }

    pub fn running(mut self, running_only: bool) -> Self {
        self.running_only = running_only;
        self
    }

    pub fn matches(&self, service: &Service) -> bool {
        fn field(want: &Option<String>, have: &str) -> bool {
            want.as_deref().is_none_or(|w| w == have)
        }
        field(&self.pipeline_name, &service.pipeline_name)
            && field(&self.step_name, &service.step_name)
            && field(&self.model_name, &service.model_name)
            && (!self.running_only || service.is_running())
    }
}

/// Result of the model deployer step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentOutcome {
    /// Whether a deployment was performed in this run.
    pub deployed: bool,
    /// The deployed service, or the last running one when nothing was deployed.
    pub service: Option<Service>,
}

impl ArtifactType for DeploymentOutcome {
    const TYPE_NAME: &'static str = "deployment_outcome";
}

/// Trait for model deployers.
#[async_trait]
pub trait ModelDeployer: Send + Sync {
    fn flavor(&self) -> &'static str;

    /// Deploy a model, or update the service already deployed by the same
    /// pipeline step. Waits until the service is available or `spec.timeout()`
    /// elapses.
    async fn deploy(&self, spec: &DeploymentSpec) -> Result<Service>;

    async fn find_services(&self, query: &ServiceQuery) -> Result<Vec<Service>>;

    /// Stop a service. Waits up to `timeout` for the backend to tear it down.
    async fn stop(&self, service: &Service, timeout: Duration) -> Result<()>;
}

/// Most recently updated service deployed by `pipeline_name`/`step_name`.
pub async fn load_last_service(
    deployer: &dyn ModelDeployer,
    pipeline_name: &str,
    step_name: &str,
    running: bool,
) -> Result<Option<Service>> {
    let query = ServiceQuery::for_step(pipeline_name, step_name).running(running);
    let services = deployer.find_services(&query).await?;
    Ok(services.into_iter().max_by_key(|s| s.updated_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn service(step: &str, status: ServiceStatus, age_secs: i64) -> Service {
        let at = Utc::now() - chrono::Duration::seconds(age_secs);
        Service {
            id: ResourceId::new(),
            pipeline_name: "continuous_deployment_pipeline".into(),
            step_name: step.into(),
            model_name: "model".into(),
            flavor: "test".into(),
            prediction_url: None,
            status,
            spec: DeploymentSpec {
                pipeline_name: "continuous_deployment_pipeline".into(),
                step_name: step.into(),
                model_name: "model".into(),
                model_uri: "file:///tmp/model".into(),
                replicas: 1,
                implementation: "SKLEARN_SERVER".into(),
                secret_name: None,
                parameters: vec![],
                timeout_secs: 10,
            },
            created_at: at,
            updated_at: at,
        }
    }

    struct FixedDeployer(Mutex<Vec<Service>>);

    #[async_trait]
    impl ModelDeployer for FixedDeployer {
        fn flavor(&self) -> &'static str {
            "test"
        }

        async fn deploy(&self, _spec: &DeploymentSpec) -> Result<Service> {
            unimplemented!()
        }

        async fn find_services(&self, query: &ServiceQuery) -> Result<Vec<Service>> {
            let services = self.0.lock().unwrap();
            Ok(services.iter().filter(|s| query.matches(s)).cloned().collect())
        }

        async fn stop(&self, _service: &Service, _timeout: Duration) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn only_active_services_are_running() {
        assert!(service("deployer", ServiceStatus::Active, 0).is_running());
        assert!(!service("deployer", ServiceStatus::Pending, 0).is_running());
        assert!(!service("deployer", ServiceStatus::Error("boom".into()), 0).is_running());
    }

    #[tokio::test]
    async fn load_last_service_picks_most_recent_match() {
        let older = service("deployer", ServiceStatus::Active, 60);
        let newer = service("deployer", ServiceStatus::Active, 5);
        let stopped = service("deployer", ServiceStatus::Inactive, 0);
        let other_step = service("other", ServiceStatus::Active, 0);
        let deployer = FixedDeployer(Mutex::new(vec![
            older,
            newer.clone(),
            stopped.clone(),
            other_step,
        ]));

        let found = load_last_service(&deployer, "continuous_deployment_pipeline", "deployer", true)
            .await
            .unwrap();
        assert_eq!(found.map(|s| s.id), Some(newer.id));

        let any = load_last_service(&deployer, "continuous_deployment_pipeline", "deployer", false)
            .await
            .unwrap();
        assert_eq!(any.map(|s| s.id), Some(stopped.id));

        let none = load_last_service(&deployer, "missing", "deployer", false)
            .await
            .unwrap();
        assert!(none.is_none());
    }
}
