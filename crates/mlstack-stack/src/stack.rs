//! Stack components and active-component resolution.

use mlstack_alerter::{Alerter, SlackAlerter};
use mlstack_config::known_flavors;
use mlstack_core::artifact::ArtifactStore;
use mlstack_core::deployer::ModelDeployer;
use mlstack_core::profile::DataValidator;
use mlstack_core::secret::SecretStore;
use mlstack_core::{ComponentKind, Error, Result};
use mlstack_deployer::{LocalModelDeployer, SeldonModelDeployer};
use mlstack_store::{LocalArtifactStore, LocalStore, RestStore, SqlStore, ZenStore};
use mlstack_validator::WhylogsDataValidator;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::secrets::InMemorySecretStore;

pub enum ActiveAlerter {
    Slack(SlackAlerter),
}

impl ActiveAlerter {
    pub fn as_alerter(&self) -> &dyn Alerter {
        match self {
            ActiveAlerter::Slack(a) => a,
        }
    }
}

pub enum ActiveDataValidator {
    Whylogs(WhylogsDataValidator),
}

impl ActiveDataValidator {
    pub fn as_validator(&self) -> &dyn DataValidator {
        match self {
            ActiveDataValidator::Whylogs(v) => v,
        }
    }
}

pub enum ActiveModelDeployer {
    Seldon(SeldonModelDeployer),
    Local(LocalModelDeployer),
}

impl ActiveModelDeployer {
    pub fn as_deployer(&self) -> &dyn ModelDeployer {
        match self {
            ActiveModelDeployer::Seldon(d) => d,
            ActiveModelDeployer::Local(d) => d,
        }
    }
}

pub enum ActiveStore {
    Local(LocalStore),
    Sql(SqlStore),
    Rest(RestStore),
}

impl ActiveStore {
    pub fn as_store(&self) -> &dyn ZenStore {
        match self {
            ActiveStore::Local(s) => s,
            ActiveStore::Sql(s) => s,
            ActiveStore::Rest(s) => s,
        }
    }

    pub fn into_shared(self) -> Arc<dyn ZenStore> {
        match self {
            ActiveStore::Local(s) => Arc::new(s),
            ActiveStore::Sql(s) => Arc::new(s),
            ActiveStore::Rest(s) => Arc::new(s),
        }
    }
}

pub enum ActiveArtifactStore {
    Local(LocalArtifactStore),
}

impl ActiveArtifactStore {
    pub fn as_artifact_store(&self) -> &dyn ArtifactStore {
        match self {
            ActiveArtifactStore::Local(s) => s,
        }
    }
}

/// A constructed component of any capability.
pub enum StackComponent {
    Alerter(ActiveAlerter),
    DataValidator(ActiveDataValidator),
    ModelDeployer(ActiveModelDeployer),
    Store(ActiveStore),
    ArtifactStore(ActiveArtifactStore),
}

impl StackComponent {
    pub fn kind(&self) -> ComponentKind {
        match self {
            StackComponent::Alerter(_) => ComponentKind::Alerter,
            StackComponent::DataValidator(_) => ComponentKind::DataValidator,
            StackComponent::ModelDeployer(_) => ComponentKind::ModelDeployer,
            StackComponent::Store(_) => ComponentKind::Store,
            StackComponent::ArtifactStore(_) => ComponentKind::ArtifactStore,
        }
    }

    pub fn flavor(&self) -> &'static str {
        match self {
            StackComponent::Alerter(c) => c.as_alerter().flavor(),
            StackComponent::DataValidator(c) => c.as_validator().flavor(),
            StackComponent::ModelDeployer(c) => c.as_deployer().flavor(),
            StackComponent::Store(c) => c.as_store().flavor(),
            StackComponent::ArtifactStore(c) => c.as_artifact_store().flavor(),
        }
    }
}

impl std::fmt::Debug for StackComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind(), self.flavor())
    }
}

struct Slot {
    name: String,
    component: StackComponent,
}

/// The active stack for a run: one component per capability slot.
///
/// Read-only once built; steps share it through an `Arc`.
pub struct Stack {
    name: String,
    slots: BTreeMap<ComponentKind, Slot>,
    secrets: Arc<dyn SecretStore>,
}

impl Stack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slots: BTreeMap::new(),
            secrets: Arc::new(InMemorySecretStore::new()),
        }
    }

    /// Put `component` in `slot`. The component's own kind may differ from
    /// the slot; steps reject that at resolution time.
    pub fn with_component(
        mut self,
        slot: ComponentKind,
        name: impl Into<String>,
        component: StackComponent,
    ) -> Self {
        self.slots.insert(
            slot,
            Slot {
                name: name.into(),
                component,
            },
        );
        self
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn secrets(&self) -> &dyn SecretStore {
        self.secrets.as_ref()
    }

    /// Slots in kind order, with the configured component names.
    pub fn components(&self) -> impl Iterator<Item = (ComponentKind, &str, &StackComponent)> {
        self.slots
            .iter()
            .map(|(kind, slot)| (*kind, slot.name.as_str(), &slot.component))
    }

    /// The component in `kind`'s slot.
    pub fn component(&self, kind: ComponentKind) -> Result<&StackComponent> {
        self.slots
            .get(&kind)
            .map(|slot| &slot.component)
            .ok_or(Error::NoActiveComponent(kind))
    }

    pub fn has(&self, kind: ComponentKind) -> bool {
        self.slots.contains_key(&kind)
    }

    pub(crate) fn mismatch(step: &str, kind: ComponentKind, actual: &StackComponent) -> Error {
        Error::CapabilityMismatch {
            step: step.to_string(),
            kind,
            expected: known_flavors(kind).join("|"),
            actual_kind: actual.kind(),
            actual: actual.flavor().to_string(),
        }
    }

    pub fn alerter(&self, step: &str) -> Result<&ActiveAlerter> {
        match self.component(ComponentKind::Alerter)? {
            StackComponent::Alerter(a) => Ok(a),
            other => Err(Self::mismatch(step, ComponentKind::Alerter, other)),
        }
    }

    pub fn data_validator(&self, step: &str) -> Result<&ActiveDataValidator> {
        match self.component(ComponentKind::DataValidator)? {
            StackComponent::DataValidator(v) => Ok(v),
            other => Err(Self::mismatch(step, ComponentKind::DataValidator, other)),
        }
    }

    pub fn model_deployer(&self, step: &str) -> Result<&ActiveModelDeployer> {
        match self.component(ComponentKind::ModelDeployer)? {
            StackComponent::ModelDeployer(d) => Ok(d),
            other => Err(Self::mismatch(step, ComponentKind::ModelDeployer, other)),
        }
    }

    pub fn store(&self, step: &str) -> Result<&ActiveStore> {
        match self.component(ComponentKind::Store)? {
            StackComponent::Store(s) => Ok(s),
            other => Err(Self::mismatch(step, ComponentKind::Store, other)),
        }
    }

    pub fn artifact_store(&self, step: &str) -> Result<&ActiveArtifactStore> {
        match self.component(ComponentKind::ArtifactStore)? {
            StackComponent::ArtifactStore(s) => Ok(s),
            other => Err(Self::mismatch(step, ComponentKind::ArtifactStore, other)),
        }
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (kind, name, component) in self.components() {
            map.entry(&kind.as_str(), &format_args!("{name} = {component:?}"));
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_store() -> StackComponent {
        StackComponent::Store(ActiveStore::Local(LocalStore::in_memory()))
    }

    #[test]
    fn test_empty_slot_is_no_active_component() {
        let stack = Stack::new("empty");
        assert!(matches!(
            stack.model_deployer("deployer"),
            Err(Error::NoActiveComponent(ComponentKind::ModelDeployer))
        ));
        assert!(!stack.has(ComponentKind::Alerter));
    }

    #[test]
    fn test_wrong_capability_names_both_flavors() {
        let stack = Stack::new("mixed").with_component(ComponentKind::Alerter, "db", local_store());

        let err = stack.alerter("notify").err().unwrap();
        match &err {
            Error::CapabilityMismatch {
                step,
                kind,
                expected,
                actual_kind,
                actual,
            } => {
                assert_eq!(step, "notify");
                assert_eq!(*kind, ComponentKind::Alerter);
                assert_eq!(expected, "slack");
                assert_eq!(*actual_kind, ComponentKind::Store);
                assert_eq!(actual, "local");
            }
            other => panic!("unexpected error: {other}"),
        }
        let message = err.to_string();
        assert!(message.contains("slack") && message.contains("local"));
    }

    #[test]
    fn test_typed_accessors() {
        let stack = Stack::new("dev")
            .with_component(ComponentKind::Store, "db", local_store())
            .with_component(
                ComponentKind::ModelDeployer,
                "registry",
                StackComponent::ModelDeployer(ActiveModelDeployer::Local(
                    LocalModelDeployer::in_memory(),
                )),
            );

        assert_eq!(stack.store("s").unwrap().as_store().flavor(), "local");
        assert!(matches!(
            stack.model_deployer("s").unwrap(),
            ActiveModelDeployer::Local(_)
        ));
        let slots: Vec<_> = stack.components().map(|(k, n, _)| (k, n)).collect();
        assert_eq!(
            slots,
            vec![
                (ComponentKind::ModelDeployer, "registry"),
                (ComponentKind::Store, "db")
            ]
        );
    }
}
