//! REST store: a client for a remote store server.

use async_trait::async_trait;
use mlstack_core::ResourceId;
use mlstack_core::entity::{Entity, EntityFilter, EntityKind, NewEntity};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{StoreError, StoreResult, ZenStore};

/// Request body for replacing an entity body.
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateBody {
    pub body: serde_json::Value,
}

/// Error body returned by the store server.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Store that forwards every call to `{base}/api/v1/entities`.
pub struct RestStore {
    client: reqwest::Client,
    base_url: Url,
}

impl RestStore {
    pub fn new(base_url: &str) -> StoreResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| StoreError::Validation(format!("invalid store URL `{base_url}`: {e}")))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    fn url(&self, kind: EntityKind, id: Option<ResourceId>) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        match id {
            Some(id) => format!("{base}/api/v1/entities/{kind}/{id}"),
            None => format!("{base}/api/v1/entities/{kind}"),
        }
    }
}

/// Map non-success responses onto the shared store errors.
async fn check(response: Response) -> StoreResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error)
        .unwrap_or(text);
    Err(match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(message),
        StatusCode::CONFLICT => StoreError::Conflict(message),
        StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => {
            StoreError::Validation(message)
        }
        other => StoreError::Remote {
            status: other.as_u16(),
            message,
        },
    })
}

#[async_trait]
impl ZenStore for RestStore {
    fn flavor(&self) -> &'static str {
        "rest"
    }

    async fn create(&self, entity: NewEntity) -> StoreResult<Entity> {
        let response = self
            .client
            .post(self.url(entity.kind, None))
            .json(&entity)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn get(&self, kind: EntityKind, id: ResourceId) -> StoreResult<Entity> {
        let response = self.client.get(self.url(kind, Some(id))).send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: ResourceId,
        body: serde_json::Value,
    ) -> StoreResult<Entity> {
        let response = self
            .client
            .put(self.url(kind, Some(id)))
            .json(&UpdateBody { body })
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    async fn delete(&self, kind: EntityKind, id: ResourceId) -> StoreResult<()> {
        let response = self.client.delete(self.url(kind, Some(id))).send().await?;
        check(response).await?;
        Ok(())
    }

    async fn list(&self, kind: EntityKind, filter: &EntityFilter) -> StoreResult<Vec<Entity>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(name) = &filter.name {
            query.push(("name", name.clone()));
        }
        if let Some(parent) = filter.parent_id {
            query.push(("parent_id", parent.to_string()));
        }
        let response = self
            .client
            .get(self.url(kind, None))
            .query(&query)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}
