//! Secrets: storage abstraction and typed schemas.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Error, Result};

/// A stored secret (a single string or key-value pairs).
#[derive(Clone, Serialize, Deserialize)]
pub enum SecretValue {
    String(String),
    Map(HashMap<String, String>),
}

impl SecretValue {
    /// Get a specific key from a map secret.
    pub fn get(&self, key: &str) -> Option<&str> {
        match self {
            SecretValue::String(s) if key.is_empty() => Some(s),
            SecretValue::Map(m) => m.get(key).map(|s| s.as_str()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretValue::String(_) => f.write_str("SecretValue::String(***)"),
            SecretValue::Map(m) => {
                let mut keys: Vec<_> = m.keys().collect();
                keys.sort();
                write!(f, "SecretValue::Map(keys={keys:?})")
            }
        }
    }
}

/// Trait for secret storage backends.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Get a secret by name.
    async fn get(&self, name: &str) -> Result<SecretValue>;

    /// Names of all stored secrets.
    async fn list(&self) -> Result<Vec<String>>;

    async fn set(&self, name: &str, value: SecretValue) -> Result<()>;

    async fn delete(&self, name: &str) -> Result<()>;
}

/// A typed view over the keys of a secret for one external service.
pub trait SecretSchema: Sized {
    const SCHEMA: &'static str;

    fn from_secret(name: &str, value: &SecretValue) -> Result<Self>;
}

/// Load the secret `name` and read it as schema `S`.
pub async fn load_secret<S: SecretSchema>(store: &dyn SecretStore, name: &str) -> Result<S> {
    let value = store.get(name).await?;
    S::from_secret(name, &value)
}

fn required_key(name: &str, value: &SecretValue, key: &str) -> Result<String> {
    value
        .get(key)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::Validation(format!("secret `{name}` is missing key `{key}`")))
}

/// Credentials for uploading profiles to WhyLabs.
#[derive(Clone, PartialEq)]
pub struct WhylabsSecretSchema {
    pub org_id: String,
    pub api_key: String,
    pub default_dataset_id: Option<String>,
}

impl SecretSchema for WhylabsSecretSchema {
    const SCHEMA: &'static str = "whylabs";

    fn from_secret(name: &str, value: &SecretValue) -> Result<Self> {
        Ok(Self {
            org_id: required_key(name, value, "org_id")?,
            api_key: required_key(name, value, "api_key")?,
            default_dataset_id: value
                .get("default_dataset_id")
                .filter(|v| !v.is_empty())
                .map(str::to_string),
        })
    }
}

impl std::fmt::Debug for WhylabsSecretSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhylabsSecretSchema")
            .field("org_id", &self.org_id)
            .field("api_key", &"***")
            .field("default_dataset_id", &self.default_dataset_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> SecretValue {
        SecretValue::Map(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn whylabs_schema_reads_keys() {
        let secret = WhylabsSecretSchema::from_secret(
            "whylabs",
            &map(&[("org_id", "org-1"), ("api_key", "k")]),
        )
        .unwrap();
        assert_eq!(secret.org_id, "org-1");
        assert_eq!(secret.default_dataset_id, None);
    }

    #[test]
    fn whylabs_schema_requires_api_key() {
        let err = WhylabsSecretSchema::from_secret("whylabs", &map(&[("org_id", "org-1")]))
            .unwrap_err();
        assert!(err.to_string().contains("missing key `api_key`"));
    }

    #[test]
    fn debug_output_hides_values() {
        let secret = map(&[("api_key", "super-secret")]);
        assert!(!format!("{secret:?}").contains("super-secret"));

        let schema = WhylabsSecretSchema {
            org_id: "org".into(),
            api_key: "super-secret".into(),
            default_dataset_id: None,
        };
        assert!(!format!("{schema:?}").contains("super-secret"));
    }
}
