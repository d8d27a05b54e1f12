//! Building a [`Stack`] from the stack configuration.

use mlstack_alerter::{SlackAlerter, SlackConfig};
use mlstack_config::{ComponentConfig, StackConfig};
use mlstack_core::secret::{SecretSchema, SecretStore, WhylabsSecretSchema, load_secret};
use mlstack_core::{ComponentKind, Error, Result};
use mlstack_deployer::{LocalModelDeployer, SeldonConfig, SeldonModelDeployer};
use mlstack_store::{LocalArtifactStore, LocalStore, RestStore, SqlStore};
use mlstack_validator::{WhyLabsWriter, WhylogsDataValidator};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::secrets::InMemorySecretStore;
use crate::stack::{
    ActiveAlerter, ActiveArtifactStore, ActiveDataValidator, ActiveModelDeployer, ActiveStore,
    Stack, StackComponent,
};

impl Stack {
    /// Build every component of the active stack.
    ///
    /// A slot holding a component of another kind is built as that kind;
    /// steps reject it when they resolve the slot.
    pub async fn from_config(config: &StackConfig) -> Result<Self> {
        let definition = config.active()?;
        let secrets = Arc::new(InMemorySecretStore::from_config(&config.secrets));
        let mut stack = Stack::new(&definition.name).with_secrets(secrets.clone());

        for (slot, name) in &definition.components {
            let component = config.component(name).ok_or_else(|| {
                Error::Validation(format!("stack component `{name}` is not defined"))
            })?;
            let built = build_component(component, config, secrets.as_ref()).await?;
            debug!(
                slot = %slot,
                component = %name,
                flavor = built.flavor(),
                "built stack component"
            );
            stack = stack.with_component(*slot, name.clone(), built);
        }

        info!(stack = %definition.name, "activated stack");
        Ok(stack)
    }
}

impl ActiveStore {
    /// Build the store of the active stack without the other components.
    pub async fn from_config(config: &StackConfig) -> Result<Self> {
        let component = config
            .active_component(ComponentKind::Store)
            .ok_or(Error::NoActiveComponent(ComponentKind::Store))?;
        let secrets = InMemorySecretStore::from_config(&config.secrets);
        match build_component(component, config, &secrets).await? {
            StackComponent::Store(store) => Ok(store),
            other => Err(Stack::mismatch(&component.name, ComponentKind::Store, &other)),
        }
    }
}

async fn build_component(
    component: &ComponentConfig,
    config: &StackConfig,
    secrets: &dyn SecretStore,
) -> Result<StackComponent> {
    let flavor = component.flavor.as_str();
    let built = match (component.kind, flavor) {
        (ComponentKind::Alerter, "slack") => {
            let mut slack = SlackConfig::new(component.require_str("token")?);
            slack.default_channel = component.str_setting("default_channel").map(str::to_string);
            if let Some(api_base) = component.str_setting("api_base") {
                slack.api_base = api_base.to_string();
            }
            StackComponent::Alerter(ActiveAlerter::Slack(SlackAlerter::new(slack)))
        }
        (ComponentKind::DataValidator, "whylogs") => {
            let secret = match component.str_setting("authentication_secret") {
                Some(name) => Some(whylabs_secret(config, secrets, name).await?),
                None => None,
            };
            let writer = match component.str_setting("endpoint") {
                Some(endpoint) => WhyLabsWriter::with_endpoint(endpoint),
                None => WhyLabsWriter::new(),
            };
            StackComponent::DataValidator(ActiveDataValidator::Whylogs(
                WhylogsDataValidator::with_writer(secret, Arc::new(writer)),
            ))
        }
        (ComponentKind::ModelDeployer, "seldon") => {
            let mut seldon = SeldonConfig {
                kubernetes_context: component.str_setting("kubernetes_context").map(str::to_string),
                ..SeldonConfig::default()
            };
            if let Some(namespace) = component.str_setting("namespace") {
                seldon.namespace = namespace.to_string();
            }
            if let Some(base_url) = component.str_setting("base_url") {
                seldon.base_url = base_url.to_string();
            }
            if let Some(secs) = component.int_setting("poll_interval_secs")? {
                seldon.poll_interval = Duration::from_secs(secs.max(1) as u64);
            }
            StackComponent::ModelDeployer(ActiveModelDeployer::Seldon(
                SeldonModelDeployer::new(seldon).await?,
            ))
        }
        (ComponentKind::ModelDeployer, "local") => {
            let deployer = match component.str_setting("path") {
                Some(path) => LocalModelDeployer::open(path).await?,
                None => LocalModelDeployer::in_memory(),
            };
            StackComponent::ModelDeployer(ActiveModelDeployer::Local(deployer))
        }
        (ComponentKind::Store, "local") => {
            let store = match component.str_setting("path") {
                Some(path) => LocalStore::open(path).await?,
                None => LocalStore::in_memory(),
            };
            StackComponent::Store(ActiveStore::Local(store))
        }
        (ComponentKind::Store, "sql") => StackComponent::Store(ActiveStore::Sql(
            SqlStore::connect(component.require_str("url")?).await?,
        )),
        (ComponentKind::Store, "rest") => StackComponent::Store(ActiveStore::Rest(RestStore::new(
            component.require_str("url")?,
        )?)),
        (ComponentKind::ArtifactStore, "local") => StackComponent::ArtifactStore(
            ActiveArtifactStore::Local(LocalArtifactStore::new(component.require_str("path")?)),
        ),
        (kind, flavor) => {
            return Err(Error::Validation(format!(
                "component `{}` has unknown {kind} flavor `{flavor}`",
                component.name
            )));
        }
    };
    Ok(built)
}

async fn whylabs_secret(
    config: &StackConfig,
    secrets: &dyn SecretStore,
    name: &str,
) -> Result<WhylabsSecretSchema> {
    let declared = config
        .secret(name)
        .ok_or_else(|| Error::Validation(format!("secret `{name}` is not defined")))?;
    if declared.schema != WhylabsSecretSchema::SCHEMA {
        return Err(Error::Validation(format!(
            "secret `{name}` has schema `{}`, expected `{}`",
            declared.schema,
            WhylabsSecretSchema::SCHEMA
        )));
    }
    load_secret(secrets, name).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlstack_config::{VariableContext, parse_stack_config};

    fn parse(kdl: &str) -> StackConfig {
        parse_stack_config(kdl, &VariableContext::new()).unwrap()
    }

    #[tokio::test]
    async fn test_builds_active_stack() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().display();
        let config = parse(&format!(
            r#"
            secret "whylabs" schema="whylabs" {{
                org_id "org-1"
                api_key "key"
            }}
            component "db" kind="store" flavor="local" {{ path "{root}/store.json" }}
            component "artifacts" kind="artifact-store" flavor="local" {{ path "{root}/artifacts" }}
            component "registry" kind="model-deployer" flavor="local" {{ path "{root}/services.json" }}
            component "slack" kind="alerter" flavor="slack" {{ token "xoxb"; default_channel "C1" }}
            component "whylogs" kind="data-validator" flavor="whylogs" {{ authentication_secret "whylabs" }}
            stack "dev" {{
                store "db"
                artifact-store "artifacts"
                model-deployer "registry"
                alerter "slack"
                data-validator "whylogs"
            }}
            active-stack "dev"
            "#
        ));

        let stack = Stack::from_config(&config).await.unwrap();
        assert_eq!(stack.name(), "dev");
        assert_eq!(stack.components().count(), 5);
        assert!(matches!(stack.alerter("s").unwrap(), ActiveAlerter::Slack(_)));
        let ActiveDataValidator::Whylogs(validator) = stack.data_validator("s").unwrap();
        assert!(validator.has_credentials());
        assert!(stack.secrets().get("whylabs").await.is_ok());
    }

    #[tokio::test]
    async fn test_incomplete_secret_is_rejected() {
        let config = parse(
            r#"
            secret "whylabs" schema="whylabs" { org_id "org-1"; }
            component "whylogs" kind="data-validator" flavor="whylogs" { authentication_secret "whylabs" }
            stack "dev" { data-validator "whylogs"; }
            active-stack "dev"
            "#,
        );
        let err = Stack::from_config(&config).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{err}");
    }

    #[tokio::test]
    async fn test_misplaced_component_fails_at_resolution() {
        let config = parse(
            r#"
            component "db" kind="store" flavor="local"
            stack "dev" { alerter "db"; }
            active-stack "dev"
            "#,
        );
        let stack = Stack::from_config(&config).await.unwrap();
        assert!(matches!(
            stack.alerter("notify"),
            Err(Error::CapabilityMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_store_only() {
        let config = parse(
            r#"
            component "db" kind="store" flavor="local"
            component "slack" kind="alerter" flavor="slack" { token "xoxb"; }
            stack "dev" { store "db"; alerter "slack"; }
            active-stack "dev"
            "#,
        );
        let store = ActiveStore::from_config(&config).await.unwrap();
        assert_eq!(store.as_store().flavor(), "local");

        let bare = parse(
            r#"
            component "slack" kind="alerter" flavor="slack" { token "xoxb"; }
            stack "dev" { alerter "slack"; }
            active-stack "dev"
            "#,
        );
        assert!(matches!(
            ActiveStore::from_config(&bare).await,
            Err(Error::NoActiveComponent(ComponentKind::Store))
        ));
    }
}
