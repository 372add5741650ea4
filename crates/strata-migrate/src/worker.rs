//! Channel hand-off between migration triggers and a pool of workers.
//!
//! ```text
//! trigger ──submit──▶ mpsc (bounded) ──▶ worker 0..n ──▶ Migrator::migrate
//!    ▲                                          │
//!    └────────────── oneshot reply ◀────────────┘
//! ```
//!
//! Dropping the reply receiver does not cancel the run.

use std::sync::Arc;

use strata_core::{
  migration::{MigrationReply, MigrationRequest, MigrationStatusResponse},
  search::SearchIndex,
  store::ContentStore,
};
use tokio::{
  sync::{Mutex, mpsc, oneshot},
  task::JoinHandle,
};
use tracing::{debug, info};

use crate::{coordinator::Migrator, error::MigrationError, registry::MigrationRegistry};

struct MigrationJob {
  request: MigrationRequest,
  reply:   oneshot::Sender<MigrationReply>,
}

/// Cloneable front door to the worker pool.
#[derive(Clone)]
pub struct MigrationHandle {
  jobs:     mpsc::Sender<MigrationJob>,
  registry: Arc<MigrationRegistry>,
}

impl MigrationHandle {
  /// Enqueue `request`, waiting for queue space. The receiver resolves with
  /// the run's reply.
  pub async fn submit(
    &self,
    request: MigrationRequest,
  ) -> Result<oneshot::Receiver<MigrationReply>, MigrationError> {
    let (reply, receiver) = oneshot::channel();
    self
      .jobs
      .send(MigrationJob { request, reply })
      .await
      .map_err(|_| MigrationError::QueueClosed)?;
    Ok(receiver)
  }

  /// Enqueue `request` and wait for it to finish.
  pub async fn run(&self, request: MigrationRequest) -> Result<MigrationReply, MigrationError> {
    self.submit(request).await?.await.map_err(|_| MigrationError::WorkerGone)
  }

  pub fn status(&self) -> MigrationStatusResponse { self.registry.status() }

  pub fn registry(&self) -> &Arc<MigrationRegistry> { &self.registry }
}

/// Start `config.workers` tasks sharing one queue. The pool stops once every
/// handle has been dropped and the queue has drained.
pub fn spawn_workers<S, I>(migrator: Migrator<S, I>) -> (MigrationHandle, Vec<JoinHandle<()>>)
where
  S: ContentStore + 'static,
  I: SearchIndex + 'static,
{
  let workers = migrator.config().workers.max(1);
  let (jobs, queue) = mpsc::channel(migrator.config().queue_depth.max(1));
  let handle = MigrationHandle { jobs, registry: migrator.registry().clone() };

  let queue = Arc::new(Mutex::new(queue));
  let migrator = Arc::new(migrator);
  let tasks = (0..workers)
    .map(|id| tokio::spawn(work(id, migrator.clone(), queue.clone())))
    .collect();
  info!(workers, "migration workers started");
  (handle, tasks)
}

async fn work<S, I>(
  id: usize,
  migrator: Arc<Migrator<S, I>>,
  queue: Arc<Mutex<mpsc::Receiver<MigrationJob>>>,
) where
  S: ContentStore + 'static,
  I: SearchIndex + 'static,
{
  loop {
    let job = queue.lock().await.recv().await;
    let Some(MigrationJob { request, reply }) = job else {
      debug!(worker = id, "queue closed; worker exiting");
      return;
    };

    let outcome = match migrator.migrate(request).await {
      Ok(report) => report.reply(),
      Err(e) => MigrationReply::Failed {
        run_id: None,
        done:   0,
        total:  0,
        error:  e.to_string(),
      },
    };
    if reply.send(outcome).is_err() {
      debug!(worker = id, "trigger stopped waiting for its reply");
    }
  }
}
