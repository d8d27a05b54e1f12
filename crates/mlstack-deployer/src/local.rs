//! Local model deployer: a service registry kept in memory or in a JSON file.
//!
//! Nothing is actually served; the registry records which model each
//! pipeline step deployed so that lookup, redeploy and stop behave like a
//! real deployer during development and in tests.

use async_trait::async_trait;
use chrono::Utc;
use mlstack_core::deployer::{DeploymentSpec, ModelDeployer, Service, ServiceQuery, ServiceStatus};
use mlstack_core::{ResourceId, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

pub const FLAVOR: &str = "local";

pub struct LocalModelDeployer {
    path: Option<PathBuf>,
    services: Mutex<Vec<Service>>,
}

impl LocalModelDeployer {
    /// Open the registry at `path`, loading existing services if present.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let services = match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path),
            services: Mutex::new(services),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            services: Mutex::new(Vec::new()),
        }
    }

    async fn persist(&self, services: &[Service]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(services)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Persist `next` and only then make it the live registry.
    async fn commit(&self, services: &mut Vec<Service>, next: Vec<Service>) -> Result<()> {
        self.persist(&next).await?;
        *services = next;
        Ok(())
    }
}

#[async_trait]
impl ModelDeployer for LocalModelDeployer {
    fn flavor(&self) -> &'static str {
        FLAVOR
    }

    async fn deploy(&self, spec: &DeploymentSpec) -> Result<Service> {
        let mut services = self.services.lock().await;
        let mut next = services.clone();
        let now = Utc::now();

        let existing = next
            .iter_mut()
            .find(|s| s.pipeline_name == spec.pipeline_name && s.step_name == spec.step_name);
        let service = match existing {
            Some(service) => {
                service.model_name = spec.model_name.clone();
                service.spec = spec.clone();
                service.status = ServiceStatus::Active;
                service.updated_at = now;
                service.clone()
            }
            None => {
                let service = Service {
                    id: ResourceId::new(),
                    pipeline_name: spec.pipeline_name.clone(),
                    step_name: spec.step_name.clone(),
                    model_name: spec.model_name.clone(),
                    flavor: FLAVOR.to_string(),
                    prediction_url: None,
                    status: ServiceStatus::Active,
                    spec: spec.clone(),
                    created_at: now,
                    updated_at: now,
                };
                next.push(service.clone());
                service
            }
        };

        self.commit(&mut services, next).await?;
        info!(
            pipeline = %spec.pipeline_name,
            step = %spec.step_name,
            model = %spec.model_name,
            service = %service.id,
            "deployed local service"
        );
        Ok(service)
    }

    async fn find_services(&self, query: &ServiceQuery) -> Result<Vec<Service>> {
        let services = self.services.lock().await;
        Ok(services.iter().filter(|s| query.matches(s)).cloned().collect())
    }

    async fn stop(&self, service: &Service, _timeout: Duration) -> Result<()> {
        let mut services = self.services.lock().await;
        let mut next = services.clone();
        let Some(found) = next.iter_mut().find(|s| s.id == service.id) else {
            return Ok(());
        };
        found.status = ServiceStatus::Inactive;
        found.updated_at = Utc::now();
        self.commit(&mut services, next).await?;
        info!(service = %service.id, "stopped local service");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlstack_core::deployer::load_last_service;

    const PIPELINE: &str = "continuous_deployment_pipeline";
    const STEP: &str = "model_deployer";

    fn spec(model_uri: &str) -> DeploymentSpec {
        DeploymentSpec {
            pipeline_name: PIPELINE.into(),
            step_name: STEP.into(),
            model_name: "mnist".into(),
            model_uri: model_uri.into(),
            replicas: 1,
            implementation: "SKLEARN_SERVER".into(),
            secret_name: None,
            parameters: vec![],
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_lookup_before_and_after_deploy() {
        let deployer = LocalModelDeployer::in_memory();
        assert!(load_last_service(&deployer, PIPELINE, STEP, true)
            .await
            .unwrap()
            .is_none());

        let service = deployer.deploy(&spec("file:///m1")).await.unwrap();
        let found = load_last_service(&deployer, PIPELINE, STEP, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, service.id);
        assert!(found.is_running());
    }

    #[tokio::test]
    async fn test_redeploy_updates_in_place() {
        let deployer = LocalModelDeployer::in_memory();
        let first = deployer.deploy(&spec("file:///m1")).await.unwrap();
        let second = deployer.deploy(&spec("file:///m2")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.spec.model_uri, "file:///m2");
        let all = deployer.find_services(&ServiceQuery::default()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_marks_inactive() {
        let deployer = LocalModelDeployer::in_memory();
        let service = deployer.deploy(&spec("file:///m1")).await.unwrap();
        deployer
            .stop(&service, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(load_last_service(&deployer, PIPELINE, STEP, true)
            .await
            .unwrap()
            .is_none());
        let stopped = load_last_service(&deployer, PIPELINE, STEP, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stopped.status, ServiceStatus::Inactive);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_registry_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("services.json");
        let deployer = LocalModelDeployer::open(&path).await.unwrap();
        let service = deployer.deploy(&spec("file:///m1")).await.unwrap();

        let tmp = path.with_extension("json.tmp");
        std::fs::create_dir(&tmp).unwrap();

        assert!(deployer.deploy(&spec("file:///m2")).await.is_err());
        assert!(deployer.stop(&service, Duration::from_secs(1)).await.is_err());
        let current = load_last_service(&deployer, PIPELINE, STEP, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.spec.model_uri, "file:///m1");

        std::fs::remove_dir(&tmp).unwrap();
        deployer.stop(&service, Duration::from_secs(1)).await.unwrap();
        let reopened = LocalModelDeployer::open(&path).await.unwrap();
        let stopped = load_last_service(&reopened, PIPELINE, STEP, false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stopped.status, ServiceStatus::Inactive);
        assert_eq!(stopped.spec.model_uri, "file:///m1");
    }

    #[tokio::test]
    async fn test_registry_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("services.json");

        let id = LocalModelDeployer::open(&path)
            .await
            .unwrap()
            .deploy(&spec("file:///m1"))
            .await
            .unwrap()
            .id;

        let reopened = LocalModelDeployer::open(&path).await.unwrap();
        let found = load_last_service(&reopened, PIPELINE, STEP, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
    }
}
