//! REST server for the mlstack store.
//!
//! Serves any [`mlstack_store::ZenStore`] under `/api/v1/entities`, the
//! remote end of [`mlstack_store::RestStore`].

pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
