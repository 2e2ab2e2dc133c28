//! Sync Protocol
//!
//! Route names and payload types exchanged between the two peers.
//! Payloads are JSON sealed with [`SyncCipher`].

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::crypto::SyncCipher;
use crate::error::Result;
use crate::store::{Entry, Seq};

/// "Give me your updates": read-only, returns the server's entries
pub const UPDATES_PATH: &str = "/sync/updates";

/// "Take my updates": merges the posted batch on the server
pub const APPLY_PATH: &str = "/sync/apply";

/// Public read by url token
pub const FETCH_PATH: &str = "/fetch";

/// Liveness probe
pub const HEALTH_PATH: &str = "/health";

/// Body of an updates request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatesRequest {
    /// Position in the server's change log already seen by the caller
    pub since: Seq,
}

/// Ordered batch of entries on the wire
pub type EntryBatch = Vec<Entry>;

/// Body of an updates response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatesResponse {
    /// Entries changed on the server after `since`
    pub entries: EntryBatch,
    /// Position to ask from next time
    pub cursor: Seq,
}

/// Serialize and encrypt a payload
pub fn seal<T: Serialize>(cipher: &SyncCipher, payload: &T) -> Result<Vec<u8>> {
    let plaintext = serde_json::to_vec(payload)?;
    cipher.encrypt(&plaintext)
}

/// Decrypt and parse a payload
pub fn open<T: DeserializeOwned>(cipher: &SyncCipher, blob: &[u8]) -> Result<T> {
    let plaintext = cipher.decrypt(blob)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

/// Reject a batch as a whole if any entry cannot be stored
pub fn check_batch(batch: &[Entry]) -> Result<()> {
    batch.iter().try_for_each(Entry::check_version)
}
