//! Alerter capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-message delivery options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertParams {
    /// Channel override; the component's default channel is used otherwise.
    pub channel: Option<String>,
}

/// Trait for alerters.
#[async_trait]
pub trait Alerter: Send + Sync {
    fn flavor(&self) -> &'static str;

    /// Deliver `message`. Returns `true` only on confirmed delivery; transport
    /// failures are reported as `false`, never as an error.
    async fn post(&self, message: &str, params: &AlertParams) -> bool;
}
