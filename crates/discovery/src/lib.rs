//! Resumable discovery of document library hierarchies.
//!
//! A run walks every site, every library in each site, and every folder and
//! file in each library, writing what it finds through a
//! [`PersistenceSink`](rove_store::PersistenceSink). Progress is checkpointed
//! as it goes, so a crashed or cancelled run started again under the same run
//! id skips the libraries it already finished.
//!
//! # Architecture
//! - [`TraversalEngine`] expands one library tree with bounded concurrency
//!   and batched persistence, reporting through a [`TraversalObserver`].
//! - [`DiscoveryCoordinator`] drives engines across sites and libraries and
//!   owns the checkpoint lifecycle.
//! - [`Session`] builds the database, cache and checkpoint manager from
//!   [`rove_config::Config`].

mod coordinator;
pub mod error;
mod progress;
mod session;
pub mod traversal;

pub use crate::coordinator::{DiscoveryCoordinator, DiscoveryOptions, DiscoverySummary};
pub use crate::session::Session;
pub use crate::traversal::{
    NodeKind, NoopObserver, Scope, TraversalEngine, TraversalNode, TraversalObserver, TraversalOptions, TraversalReport,
};
