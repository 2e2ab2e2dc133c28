//! Storage Module
//!
//! Versioned entries, the version clock, node state and the
//! SQLite-backed local entry store.

pub mod entry;
mod clock;
mod local;
mod state;

pub use entry::{Entry, Pid, Seq, Version, MAX_VERSION};
pub use clock::VersionClock;
pub use local::{ChangeSet, EntryStore, TokenLookup};
pub use state::{NodeState, SyncKey, Watermark};
