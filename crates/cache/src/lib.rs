//! Layered cache for remote lookups.
//!
//! Discovery and permission analysis both ask the remote service the same
//! questions over and over (which sites exist, who is in this group). This
//! crate answers them from a bounded in-process tier first, then from
//! optional slower tiers, and remembers the answer on the way back up.
//!
//! # Architecture
//! - **Fast tier**: in-process, strict LRU by capacity, TTL-aware. Always
//!   present and authoritative within a process lifetime.
//! - **Secondary tier**: optional shared cache (anything implementing
//!   [`CacheTier`], e.g. a Redis-like service).
//! - **Persistent tier**: optional, usually [`SinkTier`] over the audit
//!   database, so answers survive across runs.
//!
//! Slower tiers are best-effort: their errors are logged and counted, never
//! returned.

pub mod error;
mod manager;
mod memory;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod stats;
mod tier;

pub use crate::manager::{CacheBuilder, CacheManager, CacheOptions};
#[cfg(any(test, feature = "mock"))]
pub use crate::mock::MockTier;
pub use crate::stats::{CacheStats, TierStats};
pub use crate::tier::{CacheTier, SinkTier, TierEntry};
use std::sync::Arc;

pub type TierHandle = Arc<dyn CacheTier + Send + Sync>;
