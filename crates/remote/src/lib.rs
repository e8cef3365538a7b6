//! The remote content tree, as seen by discovery.
//!
//! A tenant is a fixed four-level hierarchy: sites → document libraries →
//! folders → files. The real client (authentication, HTTP retries, rate-limit
//! back-off) lives outside this workspace; discovery only talks to it through
//! [`TreeSource`].

pub mod error;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod models;
mod source;

#[cfg(any(test, feature = "mock"))]
pub use crate::mock::MockTree;
pub use crate::models::{ItemKind, Library, Page, RemoteItem, Site};
pub use crate::source::{ItemStream, TreeSource};
use std::sync::Arc;

pub type SourceHandle = Arc<dyn TreeSource + Send + Sync>;
