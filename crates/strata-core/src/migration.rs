//! Migration requests, run records and the status wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::SchemaKind;

/// Overall or per-run migration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStatus {
  Idle,
  Running,
  Completed,
  Failed,
}

/// A request to migrate one container's content from one version to another
/// within one branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRequest {
  pub entity_kind:       SchemaKind,
  pub project_uuid:      Uuid,
  pub branch_uuid:       Uuid,
  pub container_uuid:    Uuid,
  pub from_version_uuid: Uuid,
  pub to_version_uuid:   Uuid,
}

/// The record of one migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationInfo {
  pub run_id:         Uuid,
  pub status:         MigrationStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_name:    Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_uuid:    Option<Uuid>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source_version: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target_version: Option<String>,
  pub node_name:      String,
  pub done:           u64,
  pub total:          u64,
  pub start_date:     DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub end_date:       Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error:          Option<String>,
}

impl MigrationInfo {
  /// A fresh RUNNING record for a run executed on `node_name`.
  pub fn started(node_name: impl Into<String>) -> Self {
    Self {
      run_id:         Uuid::new_v4(),
      status:         MigrationStatus::Running,
      source_name:    None,
      source_uuid:    None,
      source_version: None,
      target_version: None,
      node_name:      node_name.into(),
      done:           0,
      total:          0,
      start_date:     Utc::now(),
      end_date:       None,
      error:          None,
    }
  }
}

/// Response body of the status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatusResponse {
  pub status:     MigrationStatus,
  pub migrations: Vec<MigrationInfo>,
}

/// The completion signal delivered to a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum MigrationReply {
  Completed {
    run_id: Uuid,
    done:   u64,
    total:  u64,
  },
  Failed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run_id: Option<Uuid>,
    done:   u64,
    total:  u64,
    error:  String,
  },
}
