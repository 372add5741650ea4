//! Projects and branches.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tenant's content space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
  pub project_id: Uuid,
  pub name:       String,
  pub created_at: DateTime<Utc>,
}

/// A line of content within a project (a.k.a. release).
///
/// `schema_versions` maps a schema or microschema container uuid to the
/// version uuid assigned to this branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
  pub branch_id:       Uuid,
  pub project_id:      Uuid,
  pub name:            String,
  pub schema_versions: BTreeMap<Uuid, Uuid>,
  pub created_at:      DateTime<Utc>,
}

impl Branch {
  pub fn assigned_version(&self, container: Uuid) -> Option<Uuid> {
    self.schema_versions.get(&container).copied()
  }
}
