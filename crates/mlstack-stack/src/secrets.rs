//! Secrets declared in the stack configuration.

use async_trait::async_trait;
use mlstack_config::SecretConfig;
use mlstack_core::secret::{SecretStore, SecretValue};
use mlstack_core::{Error, Result};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Process-local secret store.
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<BTreeMap<String, SecretValue>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(secrets: &[SecretConfig]) -> Self {
        let secrets = secrets
            .iter()
            .map(|s| (s.name.clone(), SecretValue::Map(s.values.clone())))
            .collect();
        Self {
            secrets: RwLock::new(secrets),
        }
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get(&self, name: &str) -> Result<SecretValue> {
        self.secrets
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("secret `{name}`")))
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.secrets.read().await.keys().cloned().collect())
    }

    async fn set(&self, name: &str, value: SecretValue) -> Result<()> {
        self.secrets.write().await.insert(name.to_string(), value);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.secrets
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("secret `{name}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlstack_core::secret::{WhylabsSecretSchema, load_secret};
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_secrets_from_config() {
        let store = InMemorySecretStore::from_config(&[SecretConfig {
            name: "whylabs".into(),
            schema: "whylabs".into(),
            values: HashMap::from([
                ("org_id".to_string(), "org-1".to_string()),
                ("api_key".to_string(), "key".to_string()),
            ]),
        }]);

        assert_eq!(store.list().await.unwrap(), vec!["whylabs".to_string()]);
        let creds: WhylabsSecretSchema = load_secret(&store, "whylabs").await.unwrap();
        assert_eq!(creds.org_id, "org-1");
        assert_eq!(creds.default_dataset_id, None);

        store.delete("whylabs").await.unwrap();
        assert!(matches!(store.get("whylabs").await, Err(Error::NotFound(_))));
        assert!(store.delete("whylabs").await.is_err());
    }
}
