//! Entry Types
//!
//! Defines the versioned record that is stored locally and exchanged
//! with the sync peer.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Version number stamped on every entry
pub type Version = u64;

/// Highest version that fits the SQLite INTEGER column
pub const MAX_VERSION: Version = i64::MAX as Version;

/// Node identifier used for tie-breaking; lower wins
pub type Pid = i64;

/// Position in a node's local change log
pub type Seq = u64;

/// One versioned key/value record, possibly a tombstone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Key, unique per node table
    pub key: String,
    /// Opaque value, empty for tombstones
    #[serde(with = "base64_bytes", default)]
    pub value: Vec<u8>,
    /// Version of this record
    pub version: Version,
    /// Pid of the node that produced this version
    pub owner_pid: Pid,
    /// Tombstone flag
    #[serde(default)]
    pub deleted: bool,
    /// Public identifier for unauthenticated reads
    pub url_token: String,
}

impl Entry {
    /// Create a live entry
    pub fn live(
        key: impl Into<String>,
        value: Vec<u8>,
        version: Version,
        owner_pid: Pid,
        url_token: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            version,
            owner_pid,
            deleted: false,
            url_token: url_token.into(),
        }
    }

    /// Create a tombstone
    pub fn tombstone(
        key: impl Into<String>,
        version: Version,
        owner_pid: Pid,
        url_token: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value: Vec::new(),
            version,
            owner_pid,
            deleted: true,
            url_token: url_token.into(),
        }
    }

    /// Value of a live entry, `None` for tombstones
    pub fn live_value(&self) -> Option<&[u8]> {
        if self.deleted {
            None
        } else {
            Some(&self.value)
        }
    }

    /// Reject entries whose version cannot be stored
    pub fn check_version(&self) -> Result<()> {
        if self.version > MAX_VERSION {
            return Err(Error::Codec(format!(
                "version {} of key {:?} is out of range",
                self.version, self.key
            )));
        }
        Ok(())
    }

    /// Generate a fresh url token (16 random bytes, hex)
    pub fn new_url_token() -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

impl std::fmt::Display for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.deleted {
            write!(f, "{}@{}/{} (deleted)", self.key, self.version, self.owner_pid)
        } else {
            write!(
                f,
                "{}@{}/{} ({} bytes)",
                self.key,
                self.version,
                self.owner_pid,
                self.value.len()
            )
        }
    }
}

/// Serialize byte values as base64 strings inside JSON payloads
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
