//! Stack configuration parsing.
//!
//! ```kdl
//! secret "whylabs" schema="whylabs" {
//!     org_id "org-123"
//!     api_key "${env.WHYLABS_API_KEY}"
//! }
//! component "local-store" kind="store" flavor="local" { path ".mlstack/store.json" }
//! component "slack" kind="alerter" flavor="slack" { token "${env.SLACK_TOKEN}" }
//! stack "default" {
//!     store "local-store"
//!     alerter "slack"
//! }
//! active-stack "default"
//! ```

use kdl::{KdlDocument, KdlNode};
use mlstack_core::ComponentKind;
use mlstack_core::params::{ParamValue, RawConfig};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::nodes::{first_arg, get_first_string_arg, get_string_prop, param_children};
use crate::{ConfigError, ConfigResult, VariableContext};

/// Default location of the stack configuration file.
pub const DEFAULT_CONFIG_FILE: &str = "mlstack.kdl";

/// Flavors that can be configured for each component kind.
pub fn known_flavors(kind: ComponentKind) -> &'static [&'static str] {
    match kind {
        ComponentKind::Alerter => &["slack"],
        ComponentKind::DataValidator => &["whylogs"],
        ComponentKind::ModelDeployer => &["seldon", "local"],
        ComponentKind::Store => &["local", "sql", "rest"],
        ComponentKind::ArtifactStore => &["local"],
    }
}

/// A named, configured stack component.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentConfig {
    pub name: String,
    pub kind: ComponentKind,
    pub flavor: String,
    pub settings: RawConfig,
}

impl ComponentConfig {
    pub fn str_setting(&self, key: &str) -> Option<&str> {
        match self.settings.get(key) {
            Some(ParamValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn require_str(&self, key: &str) -> ConfigResult<&str> {
        self.str_setting(key).ok_or_else(|| {
            ConfigError::MissingField(format!("`{key}` for component `{}`", self.name))
        })
    }

    pub fn int_setting(&self, key: &str) -> ConfigResult<Option<i64>> {
        match self.settings.get(key) {
            None => Ok(None),
            Some(ParamValue::Int(i)) => Ok(Some(*i)),
            Some(other) => Err(ConfigError::invalid(
                format!("{}.{key}", self.name),
                format!("expected integer, got `{other}`"),
            )),
        }
    }
}

/// A named secret declared in the configuration file.
#[derive(Clone, PartialEq)]
pub struct SecretConfig {
    pub name: String,
    pub schema: String,
    pub values: HashMap<String, String>,
}

impl std::fmt::Debug for SecretConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("SecretConfig")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .field("keys", &keys)
            .finish()
    }
}

/// A stack: one component name per capability slot.
#[derive(Debug, Clone, PartialEq)]
pub struct StackDefinition {
    pub name: String,
    pub components: BTreeMap<ComponentKind, String>,
}

/// Non-fatal finding reported by [`StackConfig::check`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigWarning {
    pub message: String,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Parsed stack configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct StackConfig {
    pub components: Vec<ComponentConfig>,
    pub secrets: Vec<SecretConfig>,
    pub stacks: Vec<StackDefinition>,
    pub active_stack: String,
}

impl StackConfig {
    pub fn component(&self, name: &str) -> Option<&ComponentConfig> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn secret(&self, name: &str) -> Option<&SecretConfig> {
        self.secrets.iter().find(|s| s.name == name)
    }

    pub fn stack(&self, name: &str) -> Option<&StackDefinition> {
        self.stacks.iter().find(|s| s.name == name)
    }

    /// The active stack definition.
    pub fn active(&self) -> ConfigResult<&StackDefinition> {
        self.stack(&self.active_stack).ok_or_else(|| {
            ConfigError::InvalidReference(format!("active stack `{}`", self.active_stack))
        })
    }

    /// Component assigned to `slot` in the active stack.
    pub fn active_component(&self, slot: ComponentKind) -> Option<&ComponentConfig> {
        let stack = self.active().ok()?;
        stack.components.get(&slot).and_then(|n| self.component(n))
    }

    /// Set a setting on the component occupying `slot` in the active stack.
    /// Returns `false` when the slot is empty.
    pub fn override_setting(
        &mut self,
        slot: ComponentKind,
        key: &str,
        value: impl Into<ParamValue>,
    ) -> bool {
        let Some(name) = self
            .stack(&self.active_stack)
            .and_then(|s| s.components.get(&slot))
            .cloned()
        else {
            return false;
        };
        match self.components.iter_mut().find(|c| c.name == name) {
            Some(component) => {
                component.settings.insert(key.to_string(), value.into());
                true
            }
            None => false,
        }
    }

    /// Report stack slots that hold a component of another kind, and
    /// components no stack uses.
    pub fn check(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        for stack in &self.stacks {
            for (slot, name) in &stack.components {
                let Some(component) = self.component(name) else {
                    continue;
                };
                if component.kind != *slot {
                    warnings.push(ConfigWarning {
                        message: format!(
                            "stack `{}` uses {} component `{}` in its {} slot",
                            stack.name, component.kind, name, slot
                        ),
                    });
                }
            }
        }
        for component in &self.components {
            let used = self
                .stacks
                .iter()
                .any(|s| s.components.values().any(|n| n == &component.name));
            if !used {
                warnings.push(ConfigWarning {
                    message: format!("component `{}` is not part of any stack", component.name),
                });
            }
        }
        warnings
    }
}

/// Parse a stack configuration from KDL text, interpolating string values
/// with `vars`.
pub fn parse_stack_config(kdl: &str, vars: &VariableContext) -> ConfigResult<StackConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut components: Vec<ComponentConfig> = Vec::new();
    let mut secrets: Vec<SecretConfig> = Vec::new();
    let mut stacks: Vec<StackDefinition> = Vec::new();
    let mut active_stack = None;

    for node in doc.nodes() {
        match node.name().value() {
            "component" => {
                let component = parse_component(node, vars)?;
                if components.iter().any(|c| c.name == component.name) {
                    return Err(ConfigError::Duplicate(format!(
                        "component `{}`",
                        component.name
                    )));
                }
                components.push(component);
            }
            "secret" => {
                let secret = parse_secret(node, vars)?;
                if secrets.iter().any(|s| s.name == secret.name) {
                    return Err(ConfigError::Duplicate(format!("secret `{}`", secret.name)));
                }
                secrets.push(secret);
            }
            "stack" => {
                let stack = parse_stack(node)?;
                if stacks.iter().any(|s| s.name == stack.name) {
                    return Err(ConfigError::Duplicate(format!("stack `{}`", stack.name)));
                }
                stacks.push(stack);
            }
            "active-stack" => {
                if active_stack.is_some() {
                    return Err(ConfigError::Duplicate("active-stack".to_string()));
                }
                active_stack = Some(
                    get_first_string_arg(node)
                        .ok_or_else(|| ConfigError::MissingField("active-stack name".into()))?,
                );
            }
            _ => {} // Ignore unknown nodes
        }
    }

    let active_stack =
        active_stack.ok_or_else(|| ConfigError::MissingField("active-stack".to_string()))?;

    for stack in &stacks {
        for (slot, name) in &stack.components {
            if !components.iter().any(|c| &c.name == name) {
                return Err(ConfigError::InvalidReference(format!(
                    "stack `{}` {} slot references unknown component `{}`",
                    stack.name, slot, name
                )));
            }
        }
    }

    let config = StackConfig {
        components,
        secrets,
        stacks,
        active_stack,
    };
    config.active()?;
    Ok(config)
}

/// Read and parse a stack configuration file, interpolating `${env.*}` from
/// the process environment.
pub fn load_stack_config(path: impl AsRef<Path>) -> ConfigResult<StackConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_stack_config(&text, &VariableContext::from_env())
}

fn parse_component(node: &KdlNode, vars: &VariableContext) -> ConfigResult<ComponentConfig> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("component name".to_string()))?;
    let kind_str = get_string_prop(node, "kind")
        .ok_or_else(|| ConfigError::MissingField(format!("kind for component `{name}`")))?;
    let kind: ComponentKind = kind_str
        .parse()
        .map_err(|_| ConfigError::invalid("kind", format!("unknown component kind `{kind_str}`")))?;
    let flavor = get_string_prop(node, "flavor")
        .ok_or_else(|| ConfigError::MissingField(format!("flavor for component `{name}`")))?;

    if !known_flavors(kind).contains(&flavor.as_str()) {
        return Err(ConfigError::invalid(
            "flavor",
            format!(
                "unknown {kind} flavor `{flavor}` for component `{name}` (expected one of: {})",
                known_flavors(kind).join(", ")
            ),
        ));
    }

    Ok(ComponentConfig {
        settings: param_children(node, vars)?,
        name,
        kind,
        flavor,
    })
}

fn parse_secret(node: &KdlNode, vars: &VariableContext) -> ConfigResult<SecretConfig> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("secret name".to_string()))?;
    let schema = get_string_prop(node, "schema")
        .ok_or_else(|| ConfigError::MissingField(format!("schema for secret `{name}`")))?;

    let mut values = HashMap::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value().to_string();
            let value = first_arg(child)
                .and_then(|v| v.as_string())
                .ok_or_else(|| {
                    ConfigError::invalid(format!("secret `{name}`"), format!("`{key}` must be a string"))
                })?;
            values.insert(key, vars.interpolate(value));
        }
    }

    Ok(SecretConfig {
        name,
        schema,
        values,
    })
}

fn parse_stack(node: &KdlNode) -> ConfigResult<StackDefinition> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("stack name".to_string()))?;

    let mut components = BTreeMap::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let slot_str = child.name().value();
            let slot: ComponentKind = slot_str.parse().map_err(|_| {
                ConfigError::invalid(format!("stack `{name}`"), format!("unknown slot `{slot_str}`"))
            })?;
            let component = get_first_string_arg(child).ok_or_else(|| {
                ConfigError::MissingField(format!("component for {slot} slot of stack `{name}`"))
            })?;
            if components.insert(slot, component).is_some() {
                return Err(ConfigError::Duplicate(format!(
                    "{slot} slot in stack `{name}`"
                )));
            }
        }
    }

    Ok(StackDefinition { name, components })
}
