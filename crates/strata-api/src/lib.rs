//! JSON HTTP API for the Strata migration engine.
//!
//! Exposes an axum [`Router`] backed by a [`MigrationHandle`]. Auth, TLS, and
//! transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", strata_api::api_router(handle.clone()))
//! ```

pub mod error;
pub mod migrations;

use axum::{
  Router,
  routing::{get, post},
};
use strata_migrate::MigrationHandle;

pub use error::ApiError;

/// Build the API router for `handle`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router(handle: MigrationHandle) -> Router<()> {
  Router::new()
    .route("/migrations", post(migrations::trigger))
    .route("/migrations/status", get(migrations::status))
    .with_state(handle)
}
