//! Core types and trait definitions for the Strata content store.
//!
//! Holds the schema lineage model, the change vocabulary and the comparator
//! that produces it, the versioned content-container model, and the narrow
//! storage and search interfaces the migration engine is written against.
//! This crate is free of HTTP, database and runtime dependencies.

// Native `async fn` in traits; futures are spelled out with `Send` bounds
// where it matters.
#![allow(async_fn_in_trait)]

pub mod change;
pub mod content;
pub mod convert;
pub mod diff;
pub mod error;
pub mod migration;
pub mod project;
pub mod schema;
pub mod search;
pub mod store;
pub mod versioning;

pub use error::{Error, Result};
