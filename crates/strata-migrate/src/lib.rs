//! Schema and microschema migration engine.
//!
//! A [`Migrator`] moves the content of one branch from one version of a
//! container to another, applying the change chain between them with
//! optional custom expressions. Runs are recorded in a bounded
//! [`MigrationRegistry`] and are normally driven through the worker pool
//! started by [`spawn_workers`].
//!
//! ```rust,ignore
//! let registry = Arc::new(MigrationRegistry::new(config.history_capacity));
//! let migrator = Migrator::new(store, index, registry, config, "node-a");
//! let (handle, _workers) = spawn_workers(migrator);
//! let reply = handle.run(request).await?;
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod registry;
pub mod transform;
pub mod update;
pub mod worker;

pub use config::MigrationConfig;
pub use coordinator::{EntityFailure, MigrationReport, Migrator};
pub use error::{MigrationError, SetupError, TransformError, UpdateError};
pub use registry::MigrationRegistry;
pub use update::{SchemaUpdate, UpdateOutcome, apply_change_set, update_schema};
pub use worker::{MigrationHandle, spawn_workers};
