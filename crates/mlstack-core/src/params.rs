//! Step parameters: raw values, declared schemas and validated configuration.
//!
//! A step declares a [`ConfigSchema`]. The raw parameters registered for the
//! step (from code or from a run-config file) are validated against it once,
//! producing an immutable [`StepConfig`] that the step reads at run time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Error, Result};

/// A primitive parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ParamValue {
    fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::String(_) => "string",
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::String(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        ParamValue::Int(i64::from(v))
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

/// Unvalidated parameters, as registered on a pipeline step.
pub type RawConfig = BTreeMap<String, ParamValue>;

/// Declared type of a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    String,
    Int,
    Float,
    Bool,
    Enum(Vec<String>),
}

/// Declaration of a single parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub required: bool,
    pub default: Option<ParamValue>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl ParamSpec {
    fn new(name: &str, ty: ParamType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            required: false,
            default: None,
            min: None,
            max: None,
        }
    }

    pub fn string(name: &str) -> Self {
        Self::new(name, ParamType::String)
    }

    pub fn int(name: &str) -> Self {
        Self::new(name, ParamType::Int)
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, ParamType::Float)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, ParamType::Bool)
    }

    pub fn choice(name: &str, choices: &[&str]) -> Self {
        Self::new(
            name,
            ParamType::Enum(choices.iter().map(|c| c.to_string()).collect()),
        )
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<ParamValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Inclusive lower bound for numeric parameters.
    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    /// Inclusive upper bound for numeric parameters.
    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    fn check(&self, value: &ParamValue) -> std::result::Result<ParamValue, String> {
        let value = match (&self.ty, value) {
            (ParamType::String, ParamValue::String(_))
            | (ParamType::Int, ParamValue::Int(_))
            | (ParamType::Float, ParamValue::Float(_))
            | (ParamType::Bool, ParamValue::Bool(_)) => value.clone(),
            (ParamType::Float, ParamValue::Int(i)) => ParamValue::Float(*i as f64),
            (ParamType::Enum(choices), ParamValue::String(s)) => {
                if !choices.iter().any(|c| c == s) {
                    return Err(format!(
                        "parameter `{}` must be one of [{}], got `{}`",
                        self.name,
                        choices.join(", "),
                        s
                    ));
                }
                value.clone()
            }
            (ty, other) => {
                return Err(format!(
                    "parameter `{}` expects {}, got {} `{}`",
                    self.name,
                    describe(ty),
                    other.type_name(),
                    other
                ));
            }
        };

        let numeric = match value {
            ParamValue::Int(i) => Some(i as f64),
            ParamValue::Float(f) => Some(f),
            _ => None,
        };
        if let Some(n) = numeric {
            if n.is_nan() {
                return Err(format!("parameter `{}` must be a number", self.name));
            }
            if let Some(min) = self.min.filter(|min| n < *min) {
                return Err(format!(
                    "parameter `{}` must be >= {min}, got {n}",
                    self.name
                ));
            }
            if let Some(max) = self.max.filter(|max| n > *max) {
                return Err(format!(
                    "parameter `{}` must be <= {max}, got {n}",
                    self.name
                ));
            }
        }
        Ok(value)
    }
}

fn describe(ty: &ParamType) -> &'static str {
    match ty {
        ParamType::String => "a string",
        ParamType::Int => "an integer",
        ParamType::Float => "a number",
        ParamType::Bool => "a boolean",
        ParamType::Enum(_) => "one of a fixed set of strings",
    }
}

/// The set of parameters a step accepts.
#[derive(Debug, Clone, Default)]
pub struct ConfigSchema {
    params: Vec<ParamSpec>,
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Validate raw parameters for `step`, filling in defaults.
    pub fn validate(&self, step: &str, raw: &RawConfig) -> Result<StepConfig> {
        if let Some(unknown) = raw
            .keys()
            .find(|k| !self.params.iter().any(|p| &p.name == *k))
        {
            return Err(Error::configuration(
                step,
                format!("unknown parameter `{unknown}`"),
            ));
        }

        let mut values = BTreeMap::new();
        for spec in &self.params {
            let value = match raw.get(&spec.name).or(spec.default.as_ref()) {
                Some(v) => v,
                None if spec.required => {
                    return Err(Error::configuration(
                        step,
                        format!("missing required parameter `{}`", spec.name),
                    ));
                }
                None => continue,
            };
            let checked = spec
                .check(value)
                .map_err(|message| Error::configuration(step, message))?;
            values.insert(spec.name.clone(), checked);
        }

        Ok(StepConfig {
            step: step.to_string(),
            values,
        })
    }
}

/// Validated, immutable step configuration.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StepConfig {
    #[serde(skip)]
    step: String,
    values: BTreeMap<String, ParamValue>,
}

impl StepConfig {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ParamValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ParamValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(ParamValue::Float(f)) => Some(*f),
            Some(ParamValue::Int(i)) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(ParamValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn require_str(&self, name: &str) -> Result<&str> {
        self.str(name).ok_or_else(|| self.missing(name))
    }

    pub fn require_int(&self, name: &str) -> Result<i64> {
        self.int(name).ok_or_else(|| self.missing(name))
    }

    pub fn require_float(&self, name: &str) -> Result<f64> {
        self.float(name).ok_or_else(|| self.missing(name))
    }

    pub fn require_bool(&self, name: &str) -> Result<bool> {
        self.bool(name).ok_or_else(|| self.missing(name))
    }

    /// The validated values, e.g. for recording alongside a step run.
    pub fn values(&self) -> &BTreeMap<String, ParamValue> {
        &self.values
    }

    fn missing(&self, name: &str) -> Error {
        Error::configuration(&self.step, format!("parameter `{name}` is not set"))
    }
}
