//! Bounded history of migration runs.
//!
//! The registry is shared by `Arc` between the worker pool and whatever
//! serves status queries. All access goes through one mutex; no lock is held
//! across an await point.

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use parking_lot::Mutex;
use strata_core::migration::{MigrationInfo, MigrationStatus, MigrationStatusResponse};
use uuid::Uuid;

#[derive(Debug)]
pub struct MigrationRegistry {
  inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
  capacity: usize,
  history:  VecDeque<MigrationInfo>,
  /// Runs still going; tracked apart from `history` so eviction cannot lose
  /// one.
  active:   HashSet<Uuid>,
}

impl MigrationRegistry {
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      inner: Mutex::new(Inner {
        capacity,
        history: VecDeque::with_capacity(capacity),
        active: HashSet::new(),
      }),
    }
  }

  /// Record a new run, evicting the oldest entry when full.
  pub fn begin(&self, mut info: MigrationInfo) -> Uuid {
    info.status = MigrationStatus::Running;
    let run = info.run_id;
    let mut inner = self.inner.lock();
    if inner.history.len() >= inner.capacity {
      inner.history.pop_front();
    }
    inner.history.push_back(info);
    inner.active.insert(run);
    run
  }

  pub fn progress(&self, run: Uuid, done: u64, total: u64) {
    if let Some(info) = self.inner.lock().entry(run) {
      info.done = done;
      info.total = total;
    }
  }

  pub fn complete(&self, run: Uuid) {
    self.finish(run, MigrationStatus::Completed, None);
  }

  pub fn fail(&self, run: Uuid, error: impl Into<String>) {
    self.finish(run, MigrationStatus::Failed, Some(error.into()));
  }

  /// RUNNING while any run is active, else IDLE, plus the history oldest
  /// first.
  pub fn status(&self) -> MigrationStatusResponse {
    let inner = self.inner.lock();
    MigrationStatusResponse {
      status:     if inner.active.is_empty() {
        MigrationStatus::Idle
      } else {
        MigrationStatus::Running
      },
      migrations: inner.history.iter().cloned().collect(),
    }
  }

  pub fn info(&self, run: Uuid) -> Option<MigrationInfo> {
    self.inner.lock().history.iter().find(|i| i.run_id == run).cloned()
  }

  /// Leaves the active set and finalises the entry under one lock, so
  /// `status` never sees IDLE beside a RUNNING entry.
  fn finish(&self, run: Uuid, status: MigrationStatus, error: Option<String>) {
    let mut inner = self.inner.lock();
    inner.active.remove(&run);
    if let Some(info) = inner.entry(run) {
      info.status = status;
      info.end_date = Some(Utc::now());
      info.error = error;
    }
  }
}

impl Inner {
  fn entry(&mut self, run: Uuid) -> Option<&mut MigrationInfo> {
    self.history.iter_mut().find(|i| i.run_id == run)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn idle_when_empty() {
    let registry = MigrationRegistry::new(20);
    let status = registry.status();
    assert_eq!(status.status, MigrationStatus::Idle);
    assert!(status.migrations.is_empty());
  }

  #[test]
  fn lifecycle() {
    let registry = MigrationRegistry::new(20);
    let run = registry.begin(MigrationInfo::started("node-a"));
    assert_eq!(registry.status().status, MigrationStatus::Running);

    registry.progress(run, 1, 2);
    let info = registry.info(run).unwrap();
    assert_eq!((info.done, info.total), (1, 2));

    registry.complete(run);
    let status = registry.status();
    assert_eq!(status.status, MigrationStatus::Idle);
    assert_eq!(status.migrations[0].status, MigrationStatus::Completed);
    assert!(status.migrations[0].end_date.is_some());
    assert!(status.migrations[0].error.is_none());
  }

  #[test]
  fn failure_keeps_the_message() {
    let registry = MigrationRegistry::new(20);
    let run = registry.begin(MigrationInfo::started("node-a"));
    registry.fail(run, "boom");
    let info = registry.info(run).unwrap();
    assert_eq!(info.status, MigrationStatus::Failed);
    assert_eq!(info.error.as_deref(), Some("boom"));
  }

  #[test]
  fn oldest_entries_are_evicted() {
    let registry = MigrationRegistry::new(20);
    let runs: Vec<Uuid> = (0..100)
      .map(|_| {
        let run = registry.begin(MigrationInfo::started("node-a"));
        registry.fail(run, "failed");
        run
      })
      .collect();

    let status = registry.status();
    assert_eq!(status.migrations.len(), 20);
    let kept: Vec<Uuid> = status.migrations.iter().map(|i| i.run_id).collect();
    assert_eq!(kept, runs[80..]);
    assert_eq!(status.status, MigrationStatus::Idle);
  }

  #[test]
  fn idle_status_never_shows_a_running_entry() {
    let registry = MigrationRegistry::new(8);
    std::thread::scope(|scope| {
      for _ in 0..4 {
        scope.spawn(|| {
          for _ in 0..500 {
            let run = registry.begin(MigrationInfo::started("node-a"));
            registry.complete(run);
          }
        });
      }
      scope.spawn(|| {
        for _ in 0..2_000 {
          let status = registry.status();
          if status.status == MigrationStatus::Idle {
            assert!(status.migrations.iter().all(|i| i.status != MigrationStatus::Running));
          }
        }
      });
    });
    assert_eq!(registry.status().status, MigrationStatus::Idle);
  }

  #[test]
  fn evicted_running_entry_still_counts_as_active() {
    let registry = MigrationRegistry::new(1);
    let first = registry.begin(MigrationInfo::started("node-a"));
    let second = registry.begin(MigrationInfo::started("node-a"));
    registry.complete(second);

    assert_eq!(registry.status().status, MigrationStatus::Running);
    registry.complete(first);
    assert_eq!(registry.status().status, MigrationStatus::Idle);
  }
}
