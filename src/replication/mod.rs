//! Replication Module
//!
//! Last-writer-wins merging and the two-peer sync exchange.

pub mod protocol;
pub mod resolver;
mod client;

pub use client::ReplicationClient;
pub use protocol::{EntryBatch, UpdatesRequest, UpdatesResponse};
pub use resolver::{resolve, Resolution};

use crate::error::Error;

/// Result of a pull phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullSummary {
    /// Entries returned by the peer
    pub received: usize,
    /// Entries that changed local state
    pub applied: usize,
}

/// Outcome of a sync round with the peer
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Pull phase result, `None` if it failed
    pub pulled: Option<PullSummary>,
    /// Number of entries pushed, `None` if the push failed
    pub pushed: Option<usize>,
    /// Non-fatal failures; local state is still valid
    pub warnings: Vec<Error>,
}

impl SyncReport {
    /// Whether both phases succeeded
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.pulled {
            Some(p) => write!(f, "pulled {} ({} applied)", p.received, p.applied)?,
            None => write!(f, "pull failed")?,
        }
        match self.pushed {
            Some(n) => write!(f, ", pushed {}", n),
            None => write!(f, ", push failed"),
        }
    }
}
