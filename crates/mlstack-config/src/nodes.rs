//! Helper functions for extracting values from KDL nodes.

use kdl::{KdlNode, KdlValue};
use mlstack_core::params::{ParamValue, RawConfig};

use crate::{ConfigError, ConfigResult, VariableContext};

pub(crate) fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    first_arg(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

pub(crate) fn first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

/// Convert the first argument of `node` into a parameter value, interpolating
/// strings.
pub(crate) fn param_value(node: &KdlNode, vars: &VariableContext) -> ConfigResult<ParamValue> {
    let field = node.name().value();
    let value = first_arg(node)
        .ok_or_else(|| ConfigError::MissingField(format!("value for `{field}`")))?;
    match value {
        KdlValue::String(s) => Ok(ParamValue::String(vars.interpolate(s))),
        KdlValue::Integer(i) => i64::try_from(*i)
            .map(ParamValue::Int)
            .map_err(|_| ConfigError::invalid(field, "integer out of range")),
        KdlValue::Float(f) => Ok(ParamValue::Float(*f)),
        KdlValue::Bool(b) => Ok(ParamValue::Bool(*b)),
        KdlValue::Null => Err(ConfigError::invalid(field, "null is not a valid value")),
    }
}

/// Read the children of `node` as `key value` parameter pairs.
pub(crate) fn param_children(node: &KdlNode, vars: &VariableContext) -> ConfigResult<RawConfig> {
    let mut params = RawConfig::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value().to_string();
            let value = param_value(child, vars)?;
            if params.insert(key.clone(), value).is_some() {
                return Err(ConfigError::Duplicate(format!(
                    "`{key}` in `{}`",
                    node.name().value()
                )));
            }
        }
    }
    Ok(params)
}
