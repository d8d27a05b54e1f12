//! Error types for mlstack.

use thiserror::Error;

use crate::ComponentKind;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing step configuration. Raised before any external call.
    #[error("invalid configuration for step `{step}`: {message}")]
    Configuration { step: String, message: String },

    /// The active component in a capability slot is not what the step needs.
    #[error(
        "step `{step}` requires a {kind} component of flavor `{expected}`, \
         but the active {kind} is a {actual_kind} component of flavor `{actual}`"
    )]
    CapabilityMismatch {
        step: String,
        kind: ComponentKind,
        expected: String,
        actual_kind: ComponentKind,
        actual: String,
    },

    #[error("no active {0} component is configured in the stack")]
    NoActiveComponent(ComponentKind),

    #[error(
        "a dataset ID was not specified and could not be derived from the \
         current pipeline and step name"
    )]
    MissingDatasetId,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport or SDK failure (HTTP, Kubernetes, database, filesystem),
    /// carried as-is.
    #[error(transparent)]
    External(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn configuration(step: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Configuration {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn external<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::External(Box::new(err))
    }

    /// Whether this error was raised by validation or resolution, i.e.
    /// before the step performed any side effect.
    pub fn is_fail_fast(&self) -> bool {
        matches!(
            self,
            Error::Configuration { .. }
                | Error::CapabilityMismatch { .. }
                | Error::NoActiveComponent(_)
                | Error::MissingDatasetId
                | Error::InvalidPipeline(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::External(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_mismatch_names_both_flavors() {
        let err = Error::CapabilityMismatch {
            step: "slack_alerter_post".to_string(),
            kind: ComponentKind::Alerter,
            expected: "slack".to_string(),
            actual_kind: ComponentKind::Store,
            actual: "sql".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("`slack`"));
        assert!(msg.contains("`sql`"));
        assert!(msg.contains("store component"));
        assert!(err.is_fail_fast());
    }

    #[test]
    fn external_errors_keep_their_message() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::from(io);
        assert_eq!(err.to_string(), "refused");
        assert!(!err.is_fail_fast());
    }
}
