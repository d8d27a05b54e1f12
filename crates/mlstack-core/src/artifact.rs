//! Artifacts passed between steps, and the artifact storage abstraction.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, ResourceId, Result};

/// A type that can travel between steps as an artifact.
pub trait ArtifactType: Serialize + DeserializeOwned {
    /// Stable name recorded with the artifact and checked on decode.
    const TYPE_NAME: &'static str;
}

impl ArtifactType for bool {
    const TYPE_NAME: &'static str = "bool";
}

impl ArtifactType for f64 {
    const TYPE_NAME: &'static str = "float";
}

impl ArtifactType for i64 {
    const TYPE_NAME: &'static str = "int";
}

impl ArtifactType for String {
    const TYPE_NAME: &'static str = "string";
}

impl ArtifactType for serde_json::Value {
    const TYPE_NAME: &'static str = "json";
}

/// Output of a step: a typed value in its serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub type_name: String,
    pub value: serde_json::Value,
}

impl Artifact {
    /// Encode `value`, rejecting values that would not decode back.
    ///
    /// JSON has no infinities or NaN: such floats encode as `null`.
    pub fn new<T: ArtifactType>(value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)?;
        if let Err(e) = T::deserialize(&value) {
            return Err(Error::Validation(format!(
                "`{}` artifact does not survive encoding (non-finite number?): {e}",
                T::TYPE_NAME
            )));
        }
        Ok(Self {
            type_name: T::TYPE_NAME.to_string(),
            value,
        })
    }

    /// Decode into `T`, rejecting artifacts of another type.
    pub fn decode<T: ArtifactType>(&self) -> Result<T> {
        if self.type_name != T::TYPE_NAME {
            return Err(Error::Validation(format!(
                "expected artifact of type `{}`, found `{}`",
                T::TYPE_NAME,
                self.type_name
            )));
        }
        Ok(serde_json::from_value(self.value.clone())?)
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Hex SHA-256 of the serialized artifact.
    pub fn checksum(&self) -> Result<String> {
        Ok(checksum(&self.to_bytes()?))
    }
}

pub fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// An artifact produced during a run, as handed to downstream steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterializedArtifact {
    /// Store id of the artifact record.
    pub id: ResourceId,
    pub artifact: Artifact,
    /// Location in the artifact store, if one is active.
    pub uri: Option<String>,
    pub checksum: String,
}

impl MaterializedArtifact {
    pub fn decode<T: ArtifactType>(&self) -> Result<T> {
        self.artifact.decode()
    }
}

/// Key for storing an artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub run_id: ResourceId,
    pub step: String,
    pub name: String,
}

/// Reference to a stored artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub key: ArtifactKey,
    /// Backend-specific location.
    pub uri: String,
    pub checksum: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Trait for artifact storage backends.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    fn flavor(&self) -> &'static str;

    async fn put(&self, key: &ArtifactKey, data: Bytes) -> Result<ArtifactRef>;

    async fn get(&self, uri: &str) -> Result<Bytes>;

    /// Artifacts stored for a run, ordered by step then name.
    async fn list(&self, run_id: &ResourceId) -> Result<Vec<ArtifactRef>>;

    async fn delete(&self, uri: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_checks_type_name() {
        let artifact = Artifact::new(&0.87_f64).unwrap();
        assert_eq!(artifact.type_name, "float");
        assert_eq!(artifact.decode::<f64>().unwrap(), 0.87);

        let err = artifact.decode::<bool>().unwrap_err();
        assert!(err.to_string().contains("expected artifact of type `bool`"));
    }

    #[test]
    fn rejects_non_finite_floats() {
        let err = Artifact::new(&f64::INFINITY).unwrap_err();
        assert!(matches!(err, Error::Validation(m) if m.contains("`float`")));
        assert!(Artifact::new(&f64::NAN).is_err());
    }

    #[test]
    fn bytes_and_checksum_are_stable() {
        let artifact = Artifact::new(&true).unwrap();
        let bytes = artifact.to_bytes().unwrap();
        assert_eq!(Artifact::from_bytes(&bytes).unwrap(), artifact);
        assert_eq!(artifact.checksum().unwrap(), artifact.checksum().unwrap());
        assert_eq!(artifact.checksum().unwrap().len(), 64);
    }
}
