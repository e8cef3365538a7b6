//! Persistence for discovery runs.
//!
//! This crate owns everything that has to survive a process crash: the
//! folder/file records produced by a traversal, the checkpoints that describe
//! how far a run got, and the persistent tier of the cache.
//!
//! # Architecture
//! - [`PersistenceSink`] is the seam every other crate writes through. It is a
//!   trait so the discovery engine can be tested against the in-memory
//!   `MockSink` (behind the `mock` feature) without touching SQLite.
//! - [`Repository`] is the SQLite implementation. Records are upserted keyed on
//!   their remote id, so discovering the same node twice is a no-op rather
//!   than a duplicate row.
//! - [`Database`] manages the connection pool and embedded migrations.

mod db;
pub mod error;
#[cfg(any(test, feature = "mock"))]
mod mock;
pub mod models;
mod repo;
mod rows;
mod sink;

pub use crate::db::Database;
#[cfg(any(test, feature = "mock"))]
pub use crate::mock::MockSink;
pub use crate::models::{Batch, CacheRecord, CheckpointRecord, FileRecord, FolderRecord, RecordKind};
pub use crate::repo::Repository;
pub use crate::sink::PersistenceSink;
use std::sync::Arc;

pub type SinkHandle = Arc<dyn PersistenceSink + Send + Sync>;
