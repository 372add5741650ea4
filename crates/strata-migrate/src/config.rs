//! Engine configuration, deserialised as the `migration` table of the server
//! config.

use serde::{Deserialize, Serialize};
use strata_script::Limits;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
  /// Runs kept in the status history; the oldest is evicted first.
  pub history_capacity:     usize,
  pub workers:              usize,
  /// Triggers that may wait for a free worker before `submit` blocks.
  pub queue_depth:          usize,
  /// Re-reads after an optimistic-check conflict before the entity fails.
  pub max_conflict_retries: u32,
  pub script:               Limits,
}

impl Default for MigrationConfig {
  fn default() -> Self {
    Self {
      history_capacity:     20,
      workers:              1,
      queue_depth:          64,
      max_conflict_retries: 3,
      script:               Limits::default(),
    }
  }
}
