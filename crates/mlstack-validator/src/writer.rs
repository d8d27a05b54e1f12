//! Profile export.

use async_trait::async_trait;
use mlstack_core::profile::ProfileView;
use mlstack_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_ENDPOINT: &str = "https://api.whylabsapp.com";

/// Where a profile is written.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub org_id: String,
    pub api_key: String,
    pub dataset_id: String,
}

impl std::fmt::Debug for UploadTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadTarget")
            .field("org_id", &self.org_id)
            .field("api_key", &"***")
            .field("dataset_id", &self.dataset_id)
            .finish()
    }
}

/// Sink for profiles.
#[async_trait]
pub trait ProfileWriter: Send + Sync {
    async fn write(&self, profile: &ProfileView, target: &UploadTarget) -> Result<()>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogAsyncRequest {
    dataset_timestamp: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogAsyncResponse {
    upload_url: String,
}

/// Writes profiles to WhyLabs: requests a signed upload URL for the dataset,
/// then PUTs the serialized profile to it.
pub struct WhyLabsWriter {
    client: reqwest::Client,
    endpoint: String,
}

impl WhyLabsWriter {
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Default for WhyLabsWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn rejected(stage: &str, status: reqwest::StatusCode) -> Error {
    Error::ExecutionFailed(format!("WhyLabs {stage} request returned {status}"))
}

#[async_trait]
impl ProfileWriter for WhyLabsWriter {
    async fn write(&self, profile: &ProfileView, target: &UploadTarget) -> Result<()> {
        let url = format!(
            "{}/v0/organizations/{}/log/async/{}",
            self.endpoint, target.org_id, target.dataset_id
        );
        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &target.api_key)
            .json(&LogAsyncRequest {
                dataset_timestamp: profile.dataset_timestamp.timestamp_millis(),
            })
            .send()
            .await
            .map_err(Error::external)?;
        if !response.status().is_success() {
            return Err(rejected("log", response.status()));
        }
        let LogAsyncResponse { upload_url } = response.json().await.map_err(Error::external)?;
        debug!(dataset_id = %target.dataset_id, "received WhyLabs upload URL");

        let response = self
            .client
            .put(&upload_url)
            .body(serde_json::to_vec(profile)?)
            .send()
            .await
            .map_err(Error::external)?;
        if !response.status().is_success() {
            return Err(rejected("upload", response.status()));
        }

        info!(
            org_id = %target.org_id,
            dataset_id = %target.dataset_id,
            rows = profile.num_rows,
            "uploaded profile to WhyLabs"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::Router;
    use axum::body::Bytes;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{post, put};
    use chrono::{TimeZone, Utc};
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Mock {
        base: Arc<Mutex<String>>,
        logs: Arc<Mutex<Vec<(String, String, Option<String>, Value)>>>,
        uploads: Arc<Mutex<Vec<Value>>>,
    }

    async fn log(
        State(mock): State<Mock>,
        Path((org, dataset)): Path<(String, String)>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let key = headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        mock.logs.lock().unwrap().push((org, dataset, key, body));
        let base = mock.base.lock().unwrap().clone();
        Json(json!({ "id": "log-1", "uploadUrl": format!("{base}/upload/log-1") }))
    }

    async fn upload(State(mock): State<Mock>, body: Bytes) -> StatusCode {
        mock.uploads
            .lock()
            .unwrap()
            .push(serde_json::from_slice(&body).unwrap());
        StatusCode::OK
    }

    async fn mock_whylabs() -> (String, Mock) {
        let mock = Mock::default();
        let router = Router::new()
            .route("/v0/organizations/{org}/log/async/{dataset}", post(log))
            .route("/upload/{id}", put(upload))
            .with_state(mock.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        *mock.base.lock().unwrap() = base.clone();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (base, mock)
    }

    fn view() -> ProfileView {
        ProfileView {
            dataset_timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            num_rows: 3,
            columns: BTreeMap::new(),
            drift: None,
            categories: vec![],
        }
    }

    fn target() -> UploadTarget {
        UploadTarget {
            org_id: "org-1".into(),
            api_key: "key-123".into(),
            dataset_id: "model-1".into(),
        }
    }

    #[tokio::test]
    async fn test_write_requests_url_then_uploads() {
        let (base, mock) = mock_whylabs().await;
        WhyLabsWriter::with_endpoint(format!("{base}/"))
            .write(&view(), &target())
            .await
            .unwrap();

        let logs = mock.logs.lock().unwrap();
        assert_eq!(logs.len(), 1);
        let (org, dataset, key, body) = &logs[0];
        assert_eq!((org.as_str(), dataset.as_str()), ("org-1", "model-1"));
        assert_eq!(key.as_deref(), Some("key-123"));
        assert_eq!(body["datasetTimestamp"], 1_704_067_200_000_i64);

        let uploads = mock.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0]["num_rows"], 3);
    }

    #[tokio::test]
    async fn test_rejected_log_request_fails() {
        let router = Router::new().route(
            "/v0/organizations/{org}/log/async/{dataset}",
            post(|| async { StatusCode::UNAUTHORIZED }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let err = WhyLabsWriter::with_endpoint(base)
            .write(&view(), &target())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed(_)));
    }

    #[test]
    fn test_debug_hides_api_key() {
        assert!(!format!("{:?}", target()).contains("key-123"));
    }
}
