//! Metadata store for mlstack.
//!
//! Provides the [`ZenStore`] trait and its three variants:
//! - [`LocalStore`]: in-memory map persisted to a JSON file
//! - [`SqlStore`]: PostgreSQL or SQLite through the sqlx `Any` driver
//! - [`RestStore`]: HTTP client for a remote store server
//!
//! plus [`LocalArtifactStore`], a filesystem artifact store.

pub mod artifacts;
pub mod error;
pub mod local;
pub mod rest;
pub mod sql;

pub use artifacts::LocalArtifactStore;
pub use error::{StoreError, StoreResult};
pub use local::LocalStore;
pub use rest::{RestStore, UpdateBody};
pub use sql::SqlStore;

use async_trait::async_trait;
use mlstack_core::ResourceId;
use mlstack_core::entity::{Entity, EntityFilter, EntityKind, NewEntity, StoreEntity};

/// Persistent record of pipelines, runs, steps, stacks, components and
/// artifacts.
///
/// Names are unique per `(kind, parent)`. Every backend reports the same
/// errors: [`StoreError::NotFound`] for unknown ids, [`StoreError::Conflict`]
/// for duplicate names or deleting an entity that still has children, and
/// [`StoreError::Validation`] for empty names, non-object bodies and unknown
/// parents.
#[async_trait]
pub trait ZenStore: Send + Sync {
    fn flavor(&self) -> &'static str;

    async fn create(&self, entity: NewEntity) -> StoreResult<Entity>;

    async fn get(&self, kind: EntityKind, id: ResourceId) -> StoreResult<Entity>;

    /// Replace the body of an entity.
    async fn update(
        &self,
        kind: EntityKind,
        id: ResourceId,
        body: serde_json::Value,
    ) -> StoreResult<Entity>;

    async fn delete(&self, kind: EntityKind, id: ResourceId) -> StoreResult<()>;

    /// Entities of `kind` matching `filter`, oldest first.
    async fn list(&self, kind: EntityKind, filter: &EntityFilter) -> StoreResult<Vec<Entity>>;
}

/// Typed helpers over any [`ZenStore`].
#[async_trait]
pub trait ZenStoreExt: ZenStore {
    async fn get_by_name(
        &self,
        kind: EntityKind,
        name: &str,
        parent_id: Option<ResourceId>,
    ) -> StoreResult<Option<Entity>> {
        let filter = EntityFilter {
            name: Some(name.to_string()),
            parent_id,
        };
        let found = self.list(kind, &filter).await?;
        Ok(found.into_iter().find(|e| e.parent_id == parent_id))
    }

    async fn create_model<T: StoreEntity + Sync>(
        &self,
        name: &str,
        parent_id: Option<ResourceId>,
        model: &T,
    ) -> StoreResult<Entity> {
        self.create(NewEntity::from_model(name, parent_id, model)?)
            .await
    }

    /// Return the entity named `name`, creating it from `model` if absent.
    async fn get_or_create<T: StoreEntity + Sync>(
        &self,
        name: &str,
        parent_id: Option<ResourceId>,
        model: &T,
    ) -> StoreResult<Entity> {
        if let Some(existing) = self.get_by_name(T::KIND, name, parent_id).await? {
            return Ok(existing);
        }
        match self.create_model(name, parent_id, model).await {
            Err(StoreError::Conflict(_)) => self
                .get_by_name(T::KIND, name, parent_id)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("{} `{name}`", T::KIND))),
            other => other,
        }
    }

    async fn update_model<T: StoreEntity + Sync>(
        &self,
        id: ResourceId,
        model: &T,
    ) -> StoreResult<Entity> {
        self.update(T::KIND, id, serde_json::to_value(model)?).await
    }
}

impl<S: ZenStore + ?Sized> ZenStoreExt for S {}

/// Behavior every backend must share. Other crates reach it through the
/// `conformance` feature to check their own stores.
#[cfg(any(test, feature = "conformance"))]
pub mod conformance {
    use super::*;
    use mlstack_core::entity::{PipelineModel, RunModel, RunStatus, StepRunModel, StepStatus};
    use std::collections::BTreeMap;

    fn pipeline(steps: &[&str]) -> PipelineModel {
        PipelineModel {
            steps: steps.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn step_model() -> StepRunModel {
        StepRunModel {
            status: StepStatus::Completed,
            started_at: None,
            finished_at: None,
            error: None,
            config: serde_json::json!({}),
            inputs: BTreeMap::new(),
        }
    }

    pub async fn crud(store: &dyn ZenStore) {
        let created = store
            .create_model("training", None, &pipeline(&["load", "train"]))
            .await
            .unwrap();
        assert_eq!(created.kind, EntityKind::Pipeline);

        let fetched = store.get(EntityKind::Pipeline, created.id).await.unwrap();
        assert_eq!(fetched.decode::<PipelineModel>().unwrap().steps.len(), 2);

        let updated = store
            .update_model(created.id, &pipeline(&["load", "train", "deploy"]))
            .await
            .unwrap();
        assert_eq!(updated.decode::<PipelineModel>().unwrap().steps.len(), 3);
        assert!(updated.updated_at >= created.updated_at);

        let by_name = store
            .get_by_name(EntityKind::Pipeline, "training", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_name.id, created.id);

        store.delete(EntityKind::Pipeline, created.id).await.unwrap();
        assert!(matches!(
            store.get(EntityKind::Pipeline, created.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.delete(EntityKind::Pipeline, created.id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    pub async fn uniqueness_is_per_parent(store: &dyn ZenStore) {
        let run_model = RunModel {
            pipeline_name: "training".into(),
            stack_name: "default".into(),
            status: RunStatus::Running,
            started_at: chrono::Utc::now(),
            finished_at: None,
        };
        let run_a = store.create_model("run-a", None, &run_model).await.unwrap();
        let run_b = store.create_model("run-b", None, &run_model).await.unwrap();

        store
            .create_model("trainer", Some(run_a.id), &step_model())
            .await
            .unwrap();
        store
            .create_model("trainer", Some(run_b.id), &step_model())
            .await
            .unwrap();
        let dup = store
            .create_model("trainer", Some(run_a.id), &step_model())
            .await;
        assert!(matches!(dup, Err(StoreError::Conflict(_))));

        let steps = store
            .list(EntityKind::Step, &EntityFilter::parent(run_a.id))
            .await
            .unwrap();
        assert_eq!(steps.len(), 1);

        let all = store
            .list(EntityKind::Step, &EntityFilter::name("trainer"))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        assert!(matches!(
            store.delete(EntityKind::Run, run_a.id).await,
            Err(StoreError::Conflict(_))
        ));
    }

    pub async fn validation(store: &dyn ZenStore) {
        let empty = store.create_model("", None, &pipeline(&[])).await;
        assert!(matches!(empty, Err(StoreError::Validation(_))));

        let orphan = store
            .create_model("trainer", Some(ResourceId::new()), &step_model())
            .await;
        assert!(matches!(orphan, Err(StoreError::Validation(_))));

        let scalar = store
            .create(NewEntity {
                kind: EntityKind::Pipeline,
                name: "p".into(),
                parent_id: None,
                body: serde_json::json!("not an object"),
            })
            .await;
        assert!(matches!(scalar, Err(StoreError::Validation(_))));
    }

    pub async fn get_or_create_is_idempotent(store: &dyn ZenStore) {
        let first = store
            .get_or_create("training", None, &pipeline(&["a"]))
            .await
            .unwrap();
        let second = store
            .get_or_create("training", None, &pipeline(&["b"]))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(
            store
                .list(EntityKind::Pipeline, &EntityFilter::default())
                .await
                .unwrap()
                .len(),
            1
        );
    }

    pub async fn delete_with_wrong_kind_is_not_found(store: &dyn ZenStore) {
        let run_model = RunModel {
            pipeline_name: "training".into(),
            stack_name: "default".into(),
            status: RunStatus::Running,
            started_at: chrono::Utc::now(),
            finished_at: None,
        };
        let run = store.create_model("run-a", None, &run_model).await.unwrap();
        store
            .create_model("trainer", Some(run.id), &step_model())
            .await
            .unwrap();

        assert!(matches!(
            store.delete(EntityKind::Pipeline, run.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.delete(EntityKind::Run, ResourceId::new()).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.delete(EntityKind::Run, run.id).await,
            Err(StoreError::Conflict(_))
        ));
    }
}
