//! Entity endpoints backing the REST store.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use mlstack_core::ResourceId;
use mlstack_core::entity::{Entity, EntityFilter, EntityKind, NewEntity};
use mlstack_store::UpdateBody;
use serde::Deserialize;
use tracing::info;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{kind}", get(list_entities).post(create_entity))
        .route(
            "/{kind}/{id}",
            get(get_entity).put(update_entity).delete(delete_entity),
        )
}

fn parse_kind(kind: &str) -> Result<EntityKind, ApiError> {
    kind.parse()
        .map_err(|_| ApiError::NotFound(format!("unknown entity kind `{kind}`")))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    name: Option<String>,
    parent_id: Option<ResourceId>,
}

async fn list_entities(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Entity>>, ApiError> {
    let kind = parse_kind(&kind)?;
    let filter = EntityFilter {
        name: query.name,
        parent_id: query.parent_id,
    };
    Ok(Json(state.store.list(kind, &filter).await?))
}

async fn create_entity(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(entity): Json<NewEntity>,
) -> Result<(StatusCode, Json<Entity>), ApiError> {
    let kind = parse_kind(&kind)?;
    if entity.kind != kind {
        return Err(ApiError::Unprocessable(format!(
            "{} entity posted to the {kind} collection",
            entity.kind
        )));
    }
    let created = state.store.create(entity).await?;
    info!(kind = %created.kind, name = %created.name, id = %created.id, "created entity");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_entity(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, ResourceId)>,
) -> Result<Json<Entity>, ApiError> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.store.get(kind, id).await?))
}

async fn update_entity(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, ResourceId)>,
    Json(update): Json<UpdateBody>,
) -> Result<Json<Entity>, ApiError> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.store.update(kind, id, update.body).await?))
}

async fn delete_entity(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, ResourceId)>,
) -> Result<StatusCode, ApiError> {
    let kind = parse_kind(&kind)?;
    state.store.delete(kind, id).await?;
    info!(kind = %kind, id = %id, "deleted entity");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::AppState;
    use crate::routes::router;
    use mlstack_core::entity::{EntityFilter, EntityKind, PipelineModel, RunModel, RunStatus};
    use mlstack_store::{LocalStore, RestStore, StoreError, ZenStore, ZenStoreExt, conformance};
    use std::sync::Arc;

    async fn serve() -> String {
        let app = router(AppState::new(Arc::new(LocalStore::in_memory())));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn pipeline() -> PipelineModel {
        PipelineModel {
            steps: vec!["trainer".into(), "evaluator".into()],
        }
    }

    async fn rest_store() -> RestStore {
        RestStore::new(&serve().await).unwrap()
    }

    #[tokio::test]
    async fn test_conformance_crud() {
        conformance::crud(&rest_store().await).await;
    }

    #[tokio::test]
    async fn test_conformance_uniqueness_is_per_parent() {
        conformance::uniqueness_is_per_parent(&rest_store().await).await;
    }

    #[tokio::test]
    async fn test_conformance_validation() {
        conformance::validation(&rest_store().await).await;
    }

    #[tokio::test]
    async fn test_conformance_get_or_create() {
        conformance::get_or_create_is_idempotent(&rest_store().await).await;
    }

    #[tokio::test]
    async fn test_conformance_delete_checks_kind() {
        conformance::delete_with_wrong_kind_is_not_found(&rest_store().await).await;
    }

    #[tokio::test]
    async fn test_rest_store_round_trip() {
        let store = RestStore::new(&serve().await).unwrap();

        let created = store.create_model("training", None, &pipeline()).await.unwrap();
        let fetched = store.get(EntityKind::Pipeline, created.id).await.unwrap();
        assert_eq!(fetched, created);

        let err = store.create_model("training", None, &pipeline()).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let run = RunModel {
            pipeline_name: "training".into(),
            stack_name: "dev".into(),
            status: RunStatus::Running,
            started_at: chrono::Utc::now(),
            finished_at: None,
        };
        let run_entity = store
            .create_model("run-1", Some(created.id), &run)
            .await
            .unwrap();
        let runs = store
            .list(EntityKind::Run, &EntityFilter::parent(created.id))
            .await
            .unwrap();
        assert_eq!(runs, vec![run_entity.clone()]);

        let err = store.delete(EntityKind::Pipeline, created.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let finished = RunModel {
            status: RunStatus::Completed,
            ..run
        };
        let updated = store.update_model(run_entity.id, &finished).await.unwrap();
        assert_eq!(updated.decode::<RunModel>().unwrap().status, RunStatus::Completed);

        store.delete(EntityKind::Run, run_entity.id).await.unwrap();
        let err = store.get(EntityKind::Run, run_entity.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let found = store
            .get_by_name(EntityKind::Pipeline, "training", None)
            .await
            .unwrap();
        assert_eq!(found.map(|e| e.id), Some(created.id));
    }

    #[tokio::test]
    async fn test_validation_errors_cross_the_wire() {
        let store = RestStore::new(&serve().await).unwrap();
        let err = store.create_model("", None, &pipeline()).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let created = store.create_model("p", None, &pipeline()).await.unwrap();
        let err = store
            .update(EntityKind::Pipeline, created.id, serde_json::json!([1, 2]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_health_and_unknown_kind() {
        let base = serve().await;
        let client = reqwest::Client::new();

        let health = client.get(format!("{base}/health/ready")).send().await.unwrap();
        assert_eq!(health.status(), reqwest::StatusCode::OK);

        let unknown = client
            .get(format!("{base}/api/v1/entities/widget"))
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), reqwest::StatusCode::NOT_FOUND);
        let body: serde_json::Value = unknown.json().await.unwrap();
        assert_eq!(body["error"], "unknown entity kind `widget`");
    }
}
