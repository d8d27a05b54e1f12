//! Metadata store entities.
//!
//! Every record in the store is an [`Entity`]: a kind, a name that is unique
//! within its parent, and a JSON body. Typed models implement
//! [`StoreEntity`] and are encoded into the body.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ComponentKind, Error, ResourceId, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Pipeline,
    Run,
    Step,
    Stack,
    Component,
    Artifact,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Pipeline,
        EntityKind::Run,
        EntityKind::Step,
        EntityKind::Stack,
        EntityKind::Component,
        EntityKind::Artifact,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Pipeline => "pipeline",
            EntityKind::Run => "run",
            EntityKind::Step => "step",
            EntityKind::Stack => "stack",
            EntityKind::Component => "component",
            EntityKind::Artifact => "artifact",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EntityKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown entity kind `{s}`")))
    }
}

/// A stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: ResourceId,
    pub kind: EntityKind,
    pub name: String,
    pub parent_id: Option<ResourceId>,
    /// JSON object holding the typed model.
    pub body: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn decode<T: StoreEntity>(&self) -> Result<T> {
        if self.kind != T::KIND {
            return Err(Error::Validation(format!(
                "expected {} entity, found {}",
                T::KIND,
                self.kind
            )));
        }
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// Input for creating an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntity {
    pub kind: EntityKind,
    pub name: String,
    pub parent_id: Option<ResourceId>,
    pub body: serde_json::Value,
}

impl NewEntity {
    pub fn from_model<T: StoreEntity>(
        name: impl Into<String>,
        parent_id: Option<ResourceId>,
        model: &T,
    ) -> Result<Self> {
        Ok(Self {
            kind: T::KIND,
            name: name.into(),
            parent_id,
            body: serde_json::to_value(model)?,
        })
    }

    /// Check the invariants shared by every store backend.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("entity name must not be empty".into()));
        }
        if !self.body.is_object() {
            return Err(Error::Validation(format!(
                "body of {} `{}` must be a JSON object",
                self.kind, self.name
            )));
        }
        Ok(())
    }
}

/// Filter for listing entities of one kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityFilter {
    pub name: Option<String>,
    pub parent_id: Option<ResourceId>,
}

impl EntityFilter {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            parent_id: None,
        }
    }

    pub fn parent(parent_id: ResourceId) -> Self {
        Self {
            name: None,
            parent_id: Some(parent_id),
        }
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        self.name.as_deref().is_none_or(|n| n == entity.name)
            && self.parent_id.is_none_or(|p| entity.parent_id == Some(p))
    }
}

/// A typed model stored as the body of an entity.
pub trait StoreEntity: Serialize + DeserializeOwned {
    const KIND: EntityKind;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineModel {
    /// Step names in registration order.
    pub steps: Vec<String>,
}

impl StoreEntity for PipelineModel {
    const KIND: EntityKind = EntityKind::Pipeline;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunModel {
    pub pipeline_name: String,
    pub stack_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StoreEntity for RunModel {
    const KIND: EntityKind = EntityKind::Run;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRunModel {
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Validated configuration the step ran with.
    pub config: serde_json::Value,
    /// Input parameter name to upstream step name.
    pub inputs: BTreeMap<String, String>,
}

impl StoreEntity for StepRunModel {
    const KIND: EntityKind = EntityKind::Step;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackModel {
    /// Component name per capability slot.
    pub components: BTreeMap<ComponentKind, String>,
}

impl StoreEntity for StackModel {
    const KIND: EntityKind = EntityKind::Stack;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentModel {
    pub kind: ComponentKind,
    pub flavor: String,
}

impl StoreEntity for ComponentModel {
    const KIND: EntityKind = EntityKind::Component;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactModel {
    pub type_name: String,
    pub uri: Option<String>,
    pub checksum: String,
}

impl StoreEntity for ArtifactModel {
    const KIND: EntityKind = EntityKind::Artifact;
}
