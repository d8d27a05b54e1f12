//! SQL store over the sqlx `Any` driver (PostgreSQL or SQLite).

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use mlstack_core::ResourceId;
use mlstack_core::entity::{Entity, EntityFilter, EntityKind, NewEntity};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};
use tracing::info;

use crate::{StoreError, StoreResult, ZenStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    name TEXT NOT NULL,
    parent_id TEXT,
    scope TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (kind, scope, name)
)
"#;

const COLUMNS: &str = "id, kind, name, parent_id, body, created_at, updated_at";

/// Store backed by a single `entities` table.
pub struct SqlStore {
    pool: AnyPool,
}

impl SqlStore {
    /// Connect to `url` (`postgres://...` or `sqlite:...`) and create the
    /// schema if needed.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        sqlx::any::install_default_drivers();
        // SQLite in-memory databases are per connection.
        let max_connections = if url.starts_with("sqlite") { 1 } else { 10 };
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!(backend = url.split(':').next().unwrap_or_default(), "connected SQL store");
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn exists(&self, id: ResourceId) -> StoreResult<bool> {
        let row = sqlx::query("SELECT id FROM entities WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

/// Unique key column: entities without a parent share the empty scope.
fn scope(parent_id: Option<ResourceId>) -> String {
    parent_id.map(|p| p.to_string()).unwrap_or_default()
}

/// Fixed-width UTC timestamps so that text order is time order.
fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Validation(format!("invalid timestamp `{value}`: {e}")))
}

fn parse_id(value: &str) -> StoreResult<ResourceId> {
    value
        .parse()
        .map_err(|_| StoreError::Validation(format!("invalid id `{value}`")))
}

fn row_to_entity(row: &AnyRow) -> StoreResult<Entity> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let parent_id: Option<String> = row.try_get("parent_id")?;
    let body: String = row.try_get("body")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Entity {
        id: parse_id(&id)?,
        kind: kind.parse()?,
        name: row.try_get("name")?,
        parent_id: parent_id
            .filter(|p| !p.is_empty())
            .map(|p| parse_id(&p))
            .transpose()?,
        body: serde_json::from_str(&body)?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

fn map_unique(err: sqlx::Error, what: impl FnOnce() -> String) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(what()),
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl ZenStore for SqlStore {
    fn flavor(&self) -> &'static str {
        "sql"
    }

    async fn create(&self, new: NewEntity) -> StoreResult<Entity> {
        new.validate()?;
        if let Some(parent) = new.parent_id {
            if !self.exists(parent).await? {
                return Err(StoreError::Validation(format!("parent {parent} does not exist")));
            }
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

        sqlx::query(
            r#"
            INSERT INTO entities (id, kind, name, parent_id, scope, body, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entity.id.to_string())
        .bind(entity.kind.as_str())
        .bind(entity.name.clone())
        .bind(entity.parent_id.map(|p| p.to_string()))
        .bind(scope(entity.parent_id))
        .bind(serde_json::to_string(&entity.body)?)
        .bind(format_time(now))
        .bind(format_time(now))
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, || format!("{} `{}` already exists", entity.kind, entity.name)))?;

        Ok(entity)
    }

    async fn get(&self, kind: EntityKind, id: ResourceId) -> StoreResult<Entity> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM entities WHERE id = $1 AND kind = $2"
        ))
        .bind(id.to_string())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("{kind} {id}")))?;
        row_to_entity(&row)
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
        let result = sqlx::query(
            "UPDATE entities SET body = $1, updated_at = $2 WHERE id = $3 AND kind = $4",
        )
        .bind(serde_json::to_string(&body)?)
        .bind(format_time(Utc::now()))
        .bind(id.to_string())
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("{kind} {id}")));
        }
        self.get(kind, id).await
    }

    async fn delete(&self, kind: EntityKind, id: ResourceId) -> StoreResult<()> {
        self.get(kind, id).await?;
        let child = sqlx::query("SELECT id FROM entities WHERE parent_id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        if child.is_some() {
            return Err(StoreError::Conflict(format!("{kind} {id} still has children")));
        }

        let result = sqlx::query("DELETE FROM entities WHERE id = $1 AND kind = $2")
            .bind(id.to_string())
            .bind(kind.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("{kind} {id}")));
        }
        Ok(())
    }

    async fn list(&self, kind: EntityKind, filter: &EntityFilter) -> StoreResult<Vec<Entity>> {
        let mut sql = format!("SELECT {COLUMNS} FROM entities WHERE kind = $1");
        let mut binds = vec![kind.as_str().to_string()];
        if let Some(name) = &filter.name {
            binds.push(name.clone());
            sql.push_str(&format!(" AND name = ${}", binds.len()));
        }
        if let Some(parent) = filter.parent_id {
            binds.push(parent.to_string());
            sql.push_str(&format!(" AND parent_id = ${}", binds.len()));
        }
        sql.push_str(" ORDER BY created_at, id");

        let mut query = sqlx::query(&sql);
        for value in binds {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_entity).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;

    async fn store() -> SqlStore {
        SqlStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_crud() {
        conformance::crud(&store().await).await;
    }

    #[tokio::test]
    async fn test_uniqueness_is_per_parent() {
        conformance::uniqueness_is_per_parent(&store().await).await;
    }

    #[tokio::test]
    async fn test_validation() {
        conformance::validation(&store().await).await;
    }

    #[tokio::test]
    async fn test_get_or_create() {
        conformance::get_or_create_is_idempotent(&store().await).await;
    }

    #[tokio::test]
    async fn test_delete_checks_kind_before_children() {
        conformance::delete_with_wrong_kind_is_not_found(&store().await).await;
    }

    #[tokio::test]
    async fn test_persists_in_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("store.db").display());

        let id = {
            let store = SqlStore::connect(&url).await.unwrap();
            crate::ZenStoreExt::create_model(
                &store,
                "training",
                None,
                &mlstack_core::entity::PipelineModel { steps: vec![] },
            )
            .await
            .unwrap()
            .id
        };

        let reopened = SqlStore::connect(&url).await.unwrap();
        assert_eq!(
            reopened.get(EntityKind::Pipeline, id).await.unwrap().name,
            "training"
        );
    }
}
