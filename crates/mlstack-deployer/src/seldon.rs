//! Seldon Core model deployer.
//!
//! Each pipeline step owns one `SeldonDeployment` whose name is derived from
//! the step identity, so redeploying from the same step updates the resource
//! in place (server-side apply). The full service record is kept in an
//! annotation on the resource, which makes lookups independent of the
//! process that deployed it.

use async_trait::async_trait;
use chrono::Utc;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch,
    PatchParams,
};
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use mlstack_core::deployer::{DeploymentSpec, ModelDeployer, Service, ServiceQuery, ServiceStatus};
use mlstack_core::{Error, ResourceId, Result};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const FLAVOR: &str = "seldon";

const GROUP: &str = "machinelearning.seldon.io";
const VERSION: &str = "v1";
const KIND: &str = "SeldonDeployment";
const FIELD_MANAGER: &str = "mlstack";

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const SERVICE_KEY_LABEL: &str = "mlstack.io/service-key";
const SERVICE_ANNOTATION: &str = "mlstack.io/service";

/// Kubernetes names are limited to 63 characters.
const MAX_NAME_LEN: usize = 63;
const HASH_LEN: usize = 8;

/// Settings of a Seldon model deployer component.
#[derive(Debug, Clone, PartialEq)]
pub struct SeldonConfig {
    /// kubeconfig context; the current context is used when unset.
    pub kubernetes_context: Option<String>,
    pub namespace: String,
    /// Base URL of the Seldon Core ingress.
    pub base_url: String,
    /// Delay between status checks while waiting for a deployment.
    pub poll_interval: Duration,
}

impl Default for SeldonConfig {
    fn default() -> Self {
        Self {
            kubernetes_context: None,
            namespace: "default".to_string(),
            base_url: "http://localhost:8080".to_string(),
            poll_interval: Duration::from_secs(2),
        }
    }
}

/// Model deployer backed by Seldon Core.
pub struct SeldonModelDeployer {
    api: Api<DynamicObject>,
    config: SeldonConfig,
}

impl SeldonModelDeployer {
    /// Connect to the cluster selected by `config.kubernetes_context`.
    pub async fn new(config: SeldonConfig) -> Result<Self> {
        let client = match &config.kubernetes_context {
            Some(context) => {
                let options = KubeConfigOptions {
                    context: Some(context.clone()),
                    ..Default::default()
                };
                let kube_config = Config::from_kubeconfig(&options)
                    .await
                    .map_err(Error::external)?;
                Client::try_from(kube_config).map_err(Error::external)?
            }
            None => Client::try_default().await.map_err(Error::external)?,
        };
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: SeldonConfig) -> Self {
        let resource = ApiResource::from_gvk(&GroupVersionKind::gvk(GROUP, VERSION, KIND));
        let api = Api::namespaced_with(client, &config.namespace, &resource);
        Self { api, config }
    }

    pub fn config(&self) -> &SeldonConfig {
        &self.config
    }

    async fn get(&self, name: &str) -> Result<Option<DynamicObject>> {
        self.api.get_opt(name).await.map_err(Error::external)
    }

    async fn wait_available(&self, name: &str, timeout: Duration) -> Result<ServiceStatus> {
        let started = Instant::now();
        loop {
            let status = match self.get(name).await? {
                Some(obj) => deployment_status(&obj),
                None => ServiceStatus::Pending,
            };
            match status {
                ServiceStatus::Active => return Ok(status),
                ServiceStatus::Error(message) => {
                    return Err(Error::ExecutionFailed(format!(
                        "Seldon deployment `{name}` failed: {message}"
                    )));
                }
                _ => {}
            }
            if started.elapsed() >= timeout {
                return Err(Error::Timeout(format!(
                    "Seldon deployment `{name}` did not become available within {}s",
                    timeout.as_secs()
                )));
            }
            debug!(name, "waiting for Seldon deployment");
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

/// Deterministic DNS-1123 resource name for a pipeline step.
pub fn resource_name(pipeline_name: &str, step_name: &str) -> String {
    let digest = Sha256::digest(format!("{pipeline_name}\0{step_name}").as_bytes());
    let hash = &hex::encode(digest)[..HASH_LEN];

    let mut prefix = String::new();
    for c in format!("{pipeline_name}-{step_name}").chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            prefix.push(c);
        } else if !prefix.ends_with('-') {
            prefix.push('-');
        }
    }
    prefix.truncate(MAX_NAME_LEN - HASH_LEN - 1);
    let prefix = prefix.trim_matches('-');

    if prefix.is_empty() {
        format!("model-{hash}")
    } else {
        format!("{prefix}-{hash}")
    }
}

/// Label value identifying a pipeline step, valid for label selectors.
fn service_key(pipeline_name: &str, step_name: &str) -> String {
    let digest = Sha256::digest(format!("{pipeline_name}\0{step_name}").as_bytes());
    hex::encode(digest)[..32].to_string()
}

pub fn prediction_url(base_url: &str, namespace: &str, name: &str) -> String {
    format!(
        "{}/seldon/{namespace}/{name}/api/v0.1/predictions",
        base_url.trim_end_matches('/')
    )
}

/// `SeldonDeployment` manifest for `service`.
pub fn seldon_manifest(name: &str, namespace: &str, service: &Service) -> Result<serde_json::Value> {
    let spec = &service.spec;
    let mut graph = json!({
        "name": "classifier",
        "type": "MODEL",
        "implementation": spec.implementation,
        "modelUri": spec.model_uri,
        "parameters": spec.parameters,
    });
    if let Some(secret) = &spec.secret_name {
        graph["envSecretRefName"] = json!(secret);
    }
    let record = serde_json::to_string(service)?;
    let key = service_key(&service.pipeline_name, &service.step_name);

    Ok(json!({
        "apiVersion": format!("{GROUP}/{VERSION}"),
        "kind": KIND,
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": {
                MANAGED_BY_LABEL: FIELD_MANAGER,
                SERVICE_KEY_LABEL: key,
            },
            "annotations": {
                SERVICE_ANNOTATION: record,
            },
        },
        "spec": {
            "name": name,
            "predictors": [{
                "name": "default",
                "replicas": spec.replicas,
                "graph": graph,
            }],
        },
    }))
}

/// Status of a deployment as reported by the Seldon operator.
pub fn deployment_status(obj: &DynamicObject) -> ServiceStatus {
    let status = &obj.data["status"];
    match status["state"].as_str() {
        Some("Available") => ServiceStatus::Active,
        Some("Failed") => ServiceStatus::Error(
            status["description"]
                .as_str()
                .unwrap_or("no description")
                .to_string(),
        ),
        _ => ServiceStatus::Pending,
    }
}

/// Rebuild the service record stored on a deployment, refreshing its status.
pub fn service_from_object(obj: &DynamicObject) -> Option<Service> {
    let raw = obj.metadata.annotations.as_ref()?.get(SERVICE_ANNOTATION)?;
    let mut service: Service = serde_json::from_str(raw).ok()?;
    service.status = deployment_status(obj);
    Some(service)
}

#[async_trait]
impl ModelDeployer for SeldonModelDeployer {
    fn flavor(&self) -> &'static str {
        FLAVOR
    }

    async fn deploy(&self, spec: &DeploymentSpec) -> Result<Service> {
        let name = resource_name(&spec.pipeline_name, &spec.step_name);
        let previous = self.get(&name).await?.and_then(|o| service_from_object(&o));

        let now = Utc::now();
        let mut service = Service {
            id: previous.as_ref().map(|s| s.id).unwrap_or_else(ResourceId::new),
            pipeline_name: spec.pipeline_name.clone(),
            step_name: spec.step_name.clone(),
            model_name: spec.model_name.clone(),
            flavor: FLAVOR.to_string(),
            prediction_url: Some(prediction_url(
                &self.config.base_url,
                &self.config.namespace,
                &name,
            )),
            status: ServiceStatus::Pending,
            spec: spec.clone(),
            created_at: previous.as_ref().map(|s| s.created_at).unwrap_or(now),
            updated_at: now,
        };

        let manifest = seldon_manifest(&name, &self.config.namespace, &service)?;
        let object: DynamicObject = serde_json::from_value(manifest)?;
        info!(
            name = %name,
            namespace = %self.config.namespace,
            model = %spec.model_name,
            update = previous.is_some(),
            "applying Seldon deployment"
        );
        self.api
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&object),
            )
            .await
            .map_err(Error::external)?;

        service.status = self.wait_available(&name, spec.timeout()).await?;
        info!(name = %name, url = ?service.prediction_url, "Seldon deployment available");
        Ok(service)
    }

    async fn find_services(&self, query: &ServiceQuery) -> Result<Vec<Service>> {
        let mut selector = format!("{MANAGED_BY_LABEL}={FIELD_MANAGER}");
        if let (Some(pipeline), Some(step)) = (&query.pipeline_name, &query.step_name) {
            selector.push_str(&format!(",{SERVICE_KEY_LABEL}={}", service_key(pipeline, step)));
        }
        let objects = self
            .api
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(Error::external)?;

        Ok(objects
            .items
            .iter()
            .filter_map(service_from_object)
            .filter(|s| query.matches(s))
            .collect())
    }

    async fn stop(&self, service: &Service, timeout: Duration) -> Result<()> {
        let name = resource_name(&service.pipeline_name, &service.step_name);
        match self.api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(resp)) if resp.code == 404 => {
                debug!(name = %name, "Seldon deployment already gone");
                return Ok(());
            }
            Err(e) => return Err(Error::external(e)),
        }

        let started = Instant::now();
        while self.get(&name).await?.is_some() {
            if started.elapsed() >= timeout {
                warn!(
                    name = %name,
                    timeout_secs = timeout.as_secs(),
                    "Seldon deployment still terminating after timeout"
                );
                return Ok(());
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
        info!(name = %name, "stopped Seldon deployment");
        Ok(())
    }
}
