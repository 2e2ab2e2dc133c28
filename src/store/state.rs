//! Node State
//!
//! Persistent replication identity of a node (encryption key, pid,
//! remote peer) and the sync watermarks, stored in the `node_state`
//! table next to the entries.

use rand::{Rng, RngCore};
use rusqlite::{params, Connection, OptionalExtension};

use super::entry::{Pid, Seq};
use crate::error::{Error, Result};

/// Shared 32-byte key for the sync peer pair
#[derive(Clone, PartialEq, Eq)]
pub struct SyncKey([u8; 32]);

impl SyncKey {
    /// Key length in bytes
    pub const LEN: usize = 32;

    /// Generate a fresh random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; Self::LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse a hex-encoded key; it must decode to exactly 32 bytes
    pub fn from_hex(input: &str) -> Result<Self> {
        let bytes = hex::decode(input.trim())
            .map_err(|e| Error::Config(format!("could not decode key: {}", e)))?;
        let bytes: [u8; Self::LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::Config(format!(
                "key has to be {} bytes long, got {}",
                Self::LEN,
                b.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Hex encoding of the key
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for SyncKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Debug for SyncKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SyncKey(..)")
    }
}

/// Replication identity of this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeState {
    /// Key shared out-of-band with the peer
    pub encryption_key: SyncKey,
    /// Tie-break identity; lower pid wins
    pub pid: Pid,
    /// Peer address, empty when sync is not configured
    pub remote_hostname: String,
}

impl NodeState {
    /// State for a node that has never been configured
    pub fn fresh() -> Self {
        Self {
            encryption_key: SyncKey::generate(),
            pid: rand::thread_rng().gen_range(1..1_000_000),
            remote_hostname: String::new(),
        }
    }

    /// Whether a sync peer is configured
    pub fn has_remote(&self) -> bool {
        !self.remote_hostname.trim().is_empty()
    }

    /// Parse a pid supplied on the command line
    pub fn parse_pid(input: &str) -> Result<Pid> {
        input
            .trim()
            .parse::<Pid>()
            .map_err(|e| Error::Config(format!("pid must be an integer: {}", e)))
    }
}

/// Sync progress marker kept per direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watermark {
    /// Position in the peer's change log already pulled
    Pull,
    /// Position in the local change log the peer accepted
    Push,
}

impl Watermark {
    fn state_key(self) -> &'static str {
        match self {
            Watermark::Pull => "pull_watermark",
            Watermark::Push => "push_watermark",
        }
    }
}

const KEY_ENCRYPTION_KEY: &str = "encryption_key";
const KEY_PID: &str = "pid";
const KEY_REMOTE: &str = "remote_hostname";

/// Create the node_state table
pub(crate) fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS node_state (
            key TEXT PRIMARY KEY,
            value_int INTEGER,
            value_text TEXT,
            updated_at TEXT DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    )?;
    Ok(())
}

fn read_text(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value_text FROM node_state WHERE key = ?1",
            params![key],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?;
    Ok(value.flatten())
}

fn read_int(conn: &Connection, key: &str) -> Result<Option<i64>> {
    let value = conn
        .query_row(
            "SELECT value_int FROM node_state WHERE key = ?1",
            params![key],
            |row| row.get::<_, Option<i64>>(0),
        )
        .optional()?;
    Ok(value.flatten())
}

fn write_text(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO node_state (key, value_text) VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value_text = ?2, updated_at = CURRENT_TIMESTAMP
        "#,
        params![key, value],
    )?;
    Ok(())
}

fn write_int(conn: &Connection, key: &str, value: i64) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO node_state (key, value_int) VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value_int = ?2, updated_at = CURRENT_TIMESTAMP
        "#,
        params![key, value],
    )?;
    Ok(())
}

/// Load the node state, creating and committing a fresh one on first run
pub(crate) fn load_or_init(conn: &Connection) -> Result<NodeState> {
    let key = read_text(conn, KEY_ENCRYPTION_KEY)?;
    let pid = read_int(conn, KEY_PID)?;

    match (key, pid) {
        (Some(key), Some(pid)) => {
            let encryption_key = SyncKey::from_hex(&key)
                .map_err(|e| Error::StateCorrupted(format!("stored key: {}", e)))?;
            Ok(NodeState {
                encryption_key,
                pid,
                remote_hostname: read_text(conn, KEY_REMOTE)?.unwrap_or_default(),
            })
        }
        (None, None) => {
            let state = NodeState::fresh();
            commit(conn, &state)?;
            tracing::info!("Initialized node state with pid {}", state.pid);
            Ok(state)
        }
        _ => Err(Error::StateCorrupted(
            "node state is missing its key or pid".into(),
        )),
    }
}

/// Persist the node state
pub(crate) fn commit(conn: &Connection, state: &NodeState) -> Result<()> {
    write_text(conn, KEY_ENCRYPTION_KEY, &state.encryption_key.to_hex())?;
    write_int(conn, KEY_PID, state.pid)?;
    write_text(conn, KEY_REMOTE, state.remote_hostname.trim())?;
    Ok(())
}

/// Get a sync watermark (0 when never set)
pub(crate) fn watermark(conn: &Connection, mark: Watermark) -> Result<Seq> {
    Ok(read_int(conn, mark.state_key())?.unwrap_or(0) as Seq)
}

/// Move a watermark forward; it never moves backwards
pub(crate) fn advance_watermark(conn: &Connection, mark: Watermark, to: Seq) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO node_state (key, value_int) VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET
            value_int = MAX(COALESCE(value_int, 0), ?2),
            updated_at = CURRENT_TIMESTAMP
        "#,
        params![mark.state_key(), to.min(i64::MAX as Seq) as i64],
    )?;
    Ok(())
}

/// Forget both watermarks so the next sync starts from the beginning
pub(crate) fn reset_watermarks(conn: &Connection) -> Result<()> {
    for mark in [Watermark::Pull, Watermark::Push] {
        write_int(conn, mark.state_key(), 0)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_key_validation() {
        let good = "00".repeat(32);
        assert!(SyncKey::from_hex(&good).is_ok());
        assert!(SyncKey::from_hex(&format!("  {}\n", good)).is_ok());

        let short = "ab".repeat(16);
        assert!(matches!(SyncKey::from_hex(&short), Err(Error::Config(_))));
        assert!(matches!(SyncKey::from_hex("not hex"), Err(Error::Config(_))));
    }

    #[test]
    fn test_pid_validation() {
        assert_eq!(NodeState::parse_pid("7").unwrap(), 7);
        assert_eq!(NodeState::parse_pid(" -3 ").unwrap(), -3);
        assert!(NodeState::parse_pid("seven").is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let key = SyncKey::from([0xAB; 32]);
        assert_eq!(format!("{:?}", key), "SyncKey(..)");
    }

    #[test]
    fn test_state_persists() {
        let conn = conn();
        let first = load_or_init(&conn).unwrap();
        assert!(!first.has_remote());

        let mut changed = first.clone();
        changed.pid = 1;
        changed.remote_hostname = "10.0.0.2:8000".into();
        commit(&conn, &changed).unwrap();

        let loaded = load_or_init(&conn).unwrap();
        assert_eq!(loaded, changed);
        assert_eq!(loaded.encryption_key, first.encryption_key);
    }

    #[test]
    fn test_watermarks_only_advance() {
        let conn = conn();
        assert_eq!(watermark(&conn, Watermark::Pull).unwrap(), 0);

        advance_watermark(&conn, Watermark::Pull, 9).unwrap();
        advance_watermark(&conn, Watermark::Pull, 4).unwrap();
        assert_eq!(watermark(&conn, Watermark::Pull).unwrap(), 9);
        assert_eq!(watermark(&conn, Watermark::Push).unwrap(), 0);

        reset_watermarks(&conn).unwrap();
        assert_eq!(watermark(&conn, Watermark::Pull).unwrap(), 0);
    }
}
