//! Handlers for `/migrations` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/migrations` | Body: a migration trigger. Waits for the run unless `?wait=false` |
//! | `GET`  | `/migrations/status` | Engine status and recent run history |
//!
//! A run that started answers `200` with its reply, failed or not. A trigger
//! rejected during setup answers `400` with the failed reply.

use axum::{
  Json,
  extract::{Query, State, rejection::JsonRejection},
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Deserialize;
use strata_core::migration::{MigrationReply, MigrationRequest, MigrationStatusResponse};
use strata_migrate::MigrationHandle;
use tracing::debug;

use crate::error::ApiError;

// ─── Trigger ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TriggerParams {
  /// Defaults to `true`.
  pub wait: Option<bool>,
}

/// `POST /migrations[?wait=false]`
pub async fn trigger(
  State(handle): State<MigrationHandle>,
  Query(params): Query<TriggerParams>,
  body: Result<Json<MigrationRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
  let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

  if !params.wait.unwrap_or(true) {
    // The receiver is dropped; the run carries on regardless.
    handle.submit(request).await?;
    debug!(container = %request.container_uuid, "migration queued");
    return Ok(StatusCode::ACCEPTED.into_response());
  }

  let reply = handle.run(request).await?;
  let status = match &reply {
    MigrationReply::Failed { run_id: None, .. } => StatusCode::BAD_REQUEST,
    _ => StatusCode::OK,
  };
  Ok((status, Json(reply)).into_response())
}

// ─── Status ───────────────────────────────────────────────────────────────────

/// `GET /migrations/status`
pub async fn status(State(handle): State<MigrationHandle>) -> Json<MigrationStatusResponse> {
  Json(handle.status())
}
