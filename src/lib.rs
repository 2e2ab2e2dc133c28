//! kvass - Personal Key-Value Store with Two-Peer Sync
//!
//! A single-user key-value store backed by SQLite that can replicate its
//! contents with one designated peer over HTTP.
//!
//! # Architecture
//!
//! Every local write is stamped with a version from a per-node clock and
//! the node's pid. Peers exchange entries newer than a watermark and merge
//! them last-writer-wins: higher version first, lower pid on ties.
//! Deletes are tombstones and replicate like any other write.
//!
//! # Features
//!
//! - Deterministic, idempotent and commutative conflict resolution
//! - ChaCha20-Poly1305 encrypted sync payloads
//! - Bearer auth derived from the shared key, checked before decryption
//! - Incremental sync with persisted watermarks
//! - Public read-only fetch of values by url token

pub mod config;
pub mod error;
pub mod crypto;
pub mod store;
pub mod replication;
pub mod api;
pub mod node;

pub use config::KvassConfig;
pub use error::{Error, Result};
pub use node::Node;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::KvassConfig;
    pub use crate::error::{Error, Result};
    pub use crate::node::{Node, Synced};
    pub use crate::store::{Entry, EntryStore, NodeState, SyncKey, TokenLookup};
    pub use crate::replication::{ReplicationClient, SyncReport};
    pub use crate::api::HttpServer;
}
