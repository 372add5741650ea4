//! The search collaborator interface.
//!
//! Index internals are out of scope; the engine only tells the index which
//! documents appeared and which went away.

use std::{convert::Infallible, future::Future};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::content::ContainerType;

/// Identifies one indexed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
  pub node_id:        Uuid,
  pub language:       String,
  pub branch_id:      Uuid,
  pub container_type: ContainerType,
  pub container_id:   Uuid,
  pub schema_version: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum IndexAction {
  Store(IndexEntry),
  Delete(IndexEntry),
}

/// The index updates produced by one mutated entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBatch {
  pub actions: Vec<IndexAction>,
}

impl IndexBatch {
  pub fn is_empty(&self) -> bool { self.actions.is_empty() }
}

pub trait SearchIndex: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Apply `batch`. Resolves once the index has accepted it.
  fn update(
    &self,
    batch: IndexBatch,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

/// An index that accepts and discards every batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullIndex;

impl SearchIndex for NullIndex {
  type Error = Infallible;

  async fn update(&self, _batch: IndexBatch) -> Result<(), Infallible> { Ok(()) }
}
