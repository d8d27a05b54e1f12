//! Alerter flavors for mlstack.

pub mod slack;

pub use mlstack_core::alerter::{AlertParams, Alerter};
pub use slack::{SlackAlerter, SlackConfig};
