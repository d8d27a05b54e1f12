//! Slack alerter: posts messages through the Slack Web API.

use async_trait::async_trait;
use mlstack_core::alerter::{AlertParams, Alerter};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const FLAVOR: &str = "slack";
pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

/// Settings of a Slack alerter component.
#[derive(Clone)]
pub struct SlackConfig {
    /// Bot token used as bearer credential.
    pub token: String,
    /// Channel used when a message does not name one.
    pub default_channel: Option<String>,
    pub api_base: String,
}

impl SlackConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            default_channel: None,
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("token", &"***")
            .field("default_channel", &self.default_channel)
            .field("api_base", &self.api_base)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

pub struct SlackAlerter {
    client: reqwest::Client,
    config: SlackConfig,
}

impl SlackAlerter {
    pub fn new(config: SlackConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &SlackConfig {
        &self.config
    }
}

#[async_trait]
impl Alerter for SlackAlerter {
    fn flavor(&self) -> &'static str {
        FLAVOR
    }

    async fn post(&self, message: &str, params: &AlertParams) -> bool {
        let Some(channel) = params
            .channel
            .as_deref()
            .or(self.config.default_channel.as_deref())
        else {
            warn!("no Slack channel configured, message not sent");
            return false;
        };

        let url = format!(
            "{}/chat.postMessage",
            self.config.api_base.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.token)
            .json(&PostMessage {
                channel,
                text: message,
            })
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, channel, "failed to reach Slack");
                return false;
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), channel, "Slack rejected message");
            return false;
        }
        match response.json::<PostMessageResponse>().await {
            Ok(body) if body.ok => {
                debug!(channel, "posted Slack message");
                true
            }
            Ok(body) => {
                warn!(
                    error = body.error.as_deref().unwrap_or("unknown"),
                    channel,
                    "Slack rejected message"
                );
                false
            }
            Err(e) => {
                warn!(error = %e, channel, "invalid Slack response");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    type Received = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    async fn mock_slack(status: StatusCode, reply: Value) -> (String, Received) {
        let received: Received = Arc::default();
        let log = received.clone();
        let router = Router::new().route(
            "/chat.postMessage",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let log = log.clone();
                let reply = reply.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    log.lock().unwrap().push((auth, body));
                    (status, Json(reply))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{addr}"), received)
    }

    fn alerter(api_base: String, default_channel: Option<&str>) -> SlackAlerter {
        SlackAlerter::new(SlackConfig {
            token: "xoxb-test".into(),
            default_channel: default_channel.map(str::to_string),
            api_base,
        })
    }

    #[tokio::test]
    async fn test_post_success() {
        let (base, received) = mock_slack(StatusCode::OK, json!({"ok": true})).await;
        let slack = alerter(base, Some("C-default"));

        let params = AlertParams {
            channel: Some("C-override".into()),
        };
        assert!(slack.post("model deployed", &params).await);

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0.as_deref(), Some("Bearer xoxb-test"));
        assert_eq!(received[0].1, json!({"channel": "C-override", "text": "model deployed"}));
    }

    #[tokio::test]
    async fn test_post_uses_default_channel() {
        let (base, received) = mock_slack(StatusCode::OK, json!({"ok": true})).await;
        assert!(alerter(base, Some("C-default")).post("hi", &AlertParams::default()).await);
        assert_eq!(received.lock().unwrap()[0].1["channel"], "C-default");
    }

    #[tokio::test]
    async fn test_post_reports_api_errors_as_false() {
        let (base, _) =
            mock_slack(StatusCode::OK, json!({"ok": false, "error": "channel_not_found"})).await;
        assert!(!alerter(base, Some("C1")).post("hi", &AlertParams::default()).await);

        let (base, _) = mock_slack(StatusCode::INTERNAL_SERVER_ERROR, json!({})).await;
        assert!(!alerter(base, Some("C1")).post("hi", &AlertParams::default()).await);
    }

    #[tokio::test]
    async fn test_post_without_channel_sends_nothing() {
        let (base, received) = mock_slack(StatusCode::OK, json!({"ok": true})).await;
        assert!(!alerter(base, None).post("hi", &AlertParams::default()).await);
        assert!(received.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_false() {
        let slack = alerter("http://127.0.0.1:1".into(), Some("C1"));
        assert!(!slack.post("hi", &AlertParams::default()).await);
    }

    #[test]
    fn test_debug_hides_token() {
        let config = SlackConfig::new("xoxb-secret");
        assert!(!format!("{config:?}").contains("xoxb-secret"));
    }
}
