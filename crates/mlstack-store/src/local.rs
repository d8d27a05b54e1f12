//! Local store: an in-memory map persisted to a JSON file.

use async_trait::async_trait;
use chrono::Utc;
use mlstack_core::ResourceId;
use mlstack_core::entity::{Entity, EntityFilter, EntityKind, NewEntity};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{StoreError, StoreResult, ZenStore};

/// File-backed store for single-user development setups.
///
/// Every mutation rewrites the whole file atomically (write to a temporary
/// file, then rename).
pub struct LocalStore {
    path: Option<PathBuf>,
    entities: RwLock<BTreeMap<ResourceId, Entity>>,
}

impl LocalStore {
    /// Open the store at `path`, loading existing entities if the file exists.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entities = match tokio::fs::read(&path).await {
            Ok(data) => {
                let list: Vec<Entity> = serde_json::from_slice(&data)?;
                list.into_iter().map(|e| (e.id, e)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), count = entities.len(), "opened local store");
        Ok(Self {
            path: Some(path),
            entities: RwLock::new(entities),
        })
    }

    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entities: RwLock::new(BTreeMap::new()),
        }
    }

    async fn persist(&self, entities: &BTreeMap<ResourceId, Entity>) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let list: Vec<&Entity> = entities.values().collect();
        let data = serde_json::to_vec_pretty(&list)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Persist `next` and only then make it the live map, so a failed write
    /// leaves memory matching the file.
    async fn commit(
        &self,
        entities: &mut BTreeMap<ResourceId, Entity>,
        next: BTreeMap<ResourceId, Entity>,
    ) -> StoreResult<()> {
        self.persist(&next).await?;
        *entities = next;
        Ok(())
    }
}

fn lookup<'a>(
    entities: &'a BTreeMap<ResourceId, Entity>,
    kind: EntityKind,
    id: ResourceId,
) -> StoreResult<&'a Entity> {
    entities
        .get(&id)
        .filter(|e| e.kind == kind)
        .ok_or_else(|| StoreError::NotFound(format!("{kind} {id}")))
}

#[async_trait]
impl ZenStore for LocalStore {
    fn flavor(&self) -> &'static str {
        "local"
    }

    async fn create(&self, new: NewEntity) -> StoreResult<Entity> {
        new.validate()?;
        let mut entities = self.entities.write().await;

        if let Some(parent) = new.parent_id {
            if !entities.contains_key(&parent) {
                return Err(StoreError::Validation(format!("parent {parent} does not exist")));
            }
        }
        if entities
            .values()
            .any(|e| e.kind == new.kind && e.parent_id == new.parent_id && e.name == new.name)
        {
            return Err(StoreError::Conflict(format!(
                "{} `{}` already exists",
                new.kind, new.name
            )));
        }

        let now = Utc::now();
        let entity = Entity {
            id: ResourceId::new(),
            kind: new.kind,
            name: new.name,
            parent_id: new.parent_id,
            body: new.body,
            created_at: now,
            updated_at: now,
        };
        let mut next = entities.clone();
        next.insert(entity.id, entity.clone());
        self.commit(&mut entities, next).await?;
        Ok(entity)
    }

    async fn get(&self, kind: EntityKind, id: ResourceId) -> StoreResult<Entity> {
        let entities = self.entities.read().await;
        lookup(&entities, kind, id).cloned()
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: ResourceId,
        body: serde_json::Value,
    ) -> StoreResult<Entity> {
        if !body.is_object() {
            return Err(StoreError::Validation(format!(
                "body of {kind} {id} must be a JSON object"
            )));
        }
        let mut entities = self.entities.write().await;
        let mut updated = lookup(&entities, kind, id)?.clone();
        updated.body = body;
        updated.updated_at = Utc::now();

        let mut next = entities.clone();
        next.insert(id, updated.clone());
        self.commit(&mut entities, next).await?;
        Ok(updated)
    }

    async fn delete(&self, kind: EntityKind, id: ResourceId) -> StoreResult<()> {
        let mut entities = self.entities.write().await;
        lookup(&entities, kind, id)?;
        if entities.values().any(|e| e.parent_id == Some(id)) {
            return Err(StoreError::Conflict(format!("{kind} {id} still has children")));
        }
        let mut next = entities.clone();
        next.remove(&id);
        self.commit(&mut entities, next).await
    }

    async fn list(&self, kind: EntityKind, filter: &EntityFilter) -> StoreResult<Vec<Entity>> {
        let entities = self.entities.read().await;
        Ok(entities
            .values()
            .filter(|e| e.kind == kind && filter.matches(e))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ZenStoreExt;
    use crate::conformance;
    use mlstack_core::entity::PipelineModel;

    #[tokio::test]
    async fn test_crud() {
        conformance::crud(&LocalStore::in_memory()).await;
    }

    #[tokio::test]
    async fn test_uniqueness_is_per_parent() {
        conformance::uniqueness_is_per_parent(&LocalStore::in_memory()).await;
    }

    #[tokio::test]
    async fn test_validation() {
        conformance::validation(&LocalStore::in_memory()).await;
    }

    #[tokio::test]
    async fn test_get_or_create() {
        conformance::get_or_create_is_idempotent(&LocalStore::in_memory()).await;
    }

    #[tokio::test]
    async fn test_delete_checks_kind_before_children() {
        conformance::delete_with_wrong_kind_is_not_found(&LocalStore::in_memory()).await;
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = LocalStore::open(&path).await.unwrap();
        let kept = store
            .create_model("kept", None, &PipelineModel { steps: vec![] })
            .await
            .unwrap();

        // A directory where the temporary file goes makes every write fail.
        let tmp = path.with_extension("json.tmp");
        std::fs::create_dir(&tmp).unwrap();

        let err = store
            .create_model("training", None, &PipelineModel { steps: vec![] })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        let err = store
            .update(EntityKind::Pipeline, kept.id, serde_json::json!({"steps": ["a"]}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(store.delete(EntityKind::Pipeline, kept.id).await.is_err());

        let pipelines = store
            .list(EntityKind::Pipeline, &EntityFilter::default())
            .await
            .unwrap();
        assert_eq!(pipelines, vec![kept.clone()]);

        std::fs::remove_dir(&tmp).unwrap();
        let retried = store
            .create_model("training", None, &PipelineModel { steps: vec![] })
            .await
            .unwrap();
        let reopened = LocalStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.get(EntityKind::Pipeline, retried.id).await.unwrap().name,
            "training"
        );
        assert_eq!(reopened.get(EntityKind::Pipeline, kept.id).await.unwrap(), kept);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store").join("store.json");

        let id = {
            let store = LocalStore::open(&path).await.unwrap();
            store
                .create_model("training", None, &PipelineModel { steps: vec![] })
                .await
                .unwrap()
                .id
        };

        let reopened = LocalStore::open(&path).await.unwrap();
        let entity = reopened.get(EntityKind::Pipeline, id).await.unwrap();
        assert_eq!(entity.name, "training");
        assert!(!path.with_extension("json.tmp").exists());
    }
}
