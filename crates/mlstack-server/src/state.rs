//! Application state.

use mlstack_store::ZenStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ZenStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn ZenStore>) -> Self {
        Self { store }
    }
}
