//! Checkpoints for resumable discovery.
//!
//! A checkpoint is a JSON snapshot keyed by `(run_id, checkpoint_type)`; a
//! later save under the same key replaces the earlier one. Saves are either
//! buffered (cheap, flushed in the background) or immediate (written through
//! before returning). On restart, [`CheckpointManager::recovery_summary`]
//! reads the progress checkpoints back to work out what is left to do.

pub mod error;
mod manager;
mod payload;

pub use crate::manager::{CheckpointConfig, CheckpointManager, CheckpointStats};
pub use crate::payload::{
    COMPLETE_KEY, DiscoveryComplete, DiscoveryProgress, PROGRESS_PREFIX, ProgressStatus, RecoverySummary, progress_key,
};

/// Schema version written alongside every payload.
///
/// Bump when a payload type changes incompatibly; checkpoints written under
/// another version are ignored on restore.
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;
