//! Local Entry Store
//!
//! Durable table of current entries and tombstones backed by SQLite.
//! Every operation runs under one mutex that also owns the version clock,
//! so local writes and remote merges never interleave.
//!
//! Each row also carries `seq`, the position of its last change in this
//! node's change log. Versions order writes across nodes; `seq` orders
//! what this table has seen, including merges of old versions, and is
//! what incremental sync resumes from.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use super::clock::VersionClock;
use super::entry::{Entry, Pid, Seq, Version};
use super::state::{self, NodeState, SyncKey, Watermark};
use crate::error::{Error, Result};
use crate::replication::resolver::{resolve, Resolution};

/// Outcome of a public token lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenLookup {
    /// Token maps to a live entry
    Found(Entry),
    /// Token maps to an entry that has since been deleted
    Gone(String),
    /// Token was never issued here
    Unknown,
}

/// Entries changed after a given point of the change log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Changed entries in change order
    pub entries: Vec<Entry>,
    /// Change log position to resume from next time
    pub cursor: Seq,
}

struct StoreInner {
    conn: Connection,
    clock: VersionClock,
    seq: Seq,
    state: NodeState,
}

/// Persistent entry store backed by SQLite
pub struct EntryStore {
    inner: Mutex<StoreInner>,
}

const ENTRY_COLUMNS: &str = "key, value, version, owner_pid, deleted, url_token";

impl EntryStore {
    /// Create or open the store database
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self::with_connection(conn)?;
        tracing::debug!("Opened entry store at {:?}", path);
        Ok(store)
    }

    /// Create a throwaway in-memory store
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                version INTEGER NOT NULL,
                owner_pid INTEGER NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                url_token TEXT NOT NULL,
                seq INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_entries_version
                ON entries(version);

            CREATE INDEX IF NOT EXISTS idx_entries_url_token
                ON entries(url_token);

            CREATE INDEX IF NOT EXISTS idx_entries_seq
                ON entries(seq);
            "#,
        )?;
        state::init_schema(&conn)?;

        let node_state = state::load_or_init(&conn)?;
        let (max_version, max_seq): (i64, i64) = conn.query_row(
            "SELECT COALESCE(MAX(version), 0), COALESCE(MAX(seq), 0) FROM entries",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let clock = VersionClock::recovered(to_unsigned(max_version)?);
        tracing::debug!(
            "Version clock recovered at {} for pid {}",
            clock.current(),
            node_state.pid
        );

        Ok(Self {
            inner: Mutex::new(StoreInner {
                conn,
                clock,
                seq: to_unsigned(max_seq)?,
                state: node_state,
            }),
        })
    }

    /// Store a new value for `key` under the next local version
    pub async fn put(&self, key: &str, value: Vec<u8>) -> Result<Entry> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let url_token = match read_entry(&inner.conn, key)? {
            Some(existing) => existing.url_token,
            None => Entry::new_url_token(),
        };
        let version = inner.clock.tick()?;
        let entry = Entry::live(key, value, version, inner.state.pid, url_token);
        write_entry(&inner.conn, &entry, inner.seq + 1)?;
        inner.seq += 1;

        tracing::debug!("Stored {}", entry);
        Ok(entry)
    }

    /// Replace the current entry for `key` with a tombstone.
    ///
    /// Returns `None` when the key is unknown or already deleted.
    pub async fn delete(&self, key: &str) -> Result<Option<Entry>> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let existing = match read_entry(&inner.conn, key)? {
            Some(existing) if !existing.deleted => existing,
            _ => return Ok(None),
        };
        let version = inner.clock.tick()?;
        let tombstone = Entry::tombstone(key, version, inner.state.pid, existing.url_token);
        write_entry(&inner.conn, &tombstone, inner.seq + 1)?;
        inner.seq += 1;

        tracing::debug!("Stored {}", tombstone);
        Ok(Some(tombstone))
    }

    /// Current entry for `key`, tombstones included
    pub async fn get(&self, key: &str) -> Result<Option<Entry>> {
        let inner = self.inner.lock().await;
        read_entry(&inner.conn, key)
    }

    /// All entries with a version strictly greater than `since`
    pub async fn list_since(&self, since: Version) -> Result<Vec<Entry>> {
        let inner = self.inner.lock().await;
        let mut stmt = inner.conn.prepare(&format!(
            "SELECT {} FROM entries WHERE version > ?1 ORDER BY version",
            ENTRY_COLUMNS
        ))?;
        let since = since.min(MAX_STORED) as i64;
        let rows = stmt.query_map(params![since], entry_from_row)?;

        let mut entries = Vec::new();
        for result in rows {
            entries.push(result?);
        }

        Ok(entries)
    }

    /// Entries changed in this table after change log position `since`
    pub async fn changes_since(&self, since: Seq) -> Result<ChangeSet> {
        let inner = self.inner.lock().await;
        let mut stmt = inner.conn.prepare(&format!(
            "SELECT {}, seq FROM entries WHERE seq > ?1 ORDER BY seq",
            ENTRY_COLUMNS
        ))?;
        let since = since.min(MAX_STORED) as i64;
        let rows = stmt.query_map(params![since], |row| {
            Ok((entry_from_row(row)?, row.get::<_, i64>(6)?))
        })?;

        let mut changes = ChangeSet {
            entries: Vec::new(),
            cursor: since as Seq,
        };
        for result in rows {
            let (entry, seq) = result?;
            changes.cursor = changes.cursor.max(to_unsigned(seq)?);
            changes.entries.push(entry);
        }

        Ok(changes)
    }

    /// Last change log position of this table
    pub async fn change_seq(&self) -> Seq {
        self.inner.lock().await.seq
    }

    /// Merge an entry received from the peer.
    ///
    /// Returns whether the local state changed.
    pub async fn apply_remote(&self, entry: Entry) -> Result<bool> {
        entry.check_version()?;

        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let tx = inner.conn.transaction()?;
        let local = read_entry(&tx, &entry.key)?;
        let changed = match resolve(local.as_ref(), &entry) {
            Resolution::TakeIncoming => {
                write_entry(&tx, &entry, inner.seq + 1)?;
                true
            }
            Resolution::KeepLocal => false,
        };
        tx.commit()?;
        if changed {
            inner.seq += 1;
        }
        inner.clock.observe(entry.version);

        if changed {
            tracing::debug!("Merged remote {}", entry);
        }
        Ok(changed)
    }

    /// Resolve a public url token
    pub async fn lookup_by_token(&self, token: &str) -> Result<TokenLookup> {
        let inner = self.inner.lock().await;
        let entry = inner
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM entries WHERE url_token = ?1 LIMIT 1",
                    ENTRY_COLUMNS
                ),
                params![token],
                entry_from_row,
            )
            .optional()?;

        Ok(match entry {
            Some(entry) if entry.deleted => TokenLookup::Gone(entry.key),
            Some(entry) => TokenLookup::Found(entry),
            None => TokenLookup::Unknown,
        })
    }

    /// Keys of all live entries, in key order
    pub async fn keys(&self) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        let mut stmt = inner
            .conn
            .prepare("SELECT key FROM entries WHERE deleted = 0 ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut keys = Vec::new();
        for result in rows {
            keys.push(result?);
        }

        Ok(keys)
    }

    /// Last version issued or observed by this node
    pub async fn clock(&self) -> Version {
        self.inner.lock().await.clock.current()
    }

    /// Snapshot of the node state
    pub async fn node_state(&self) -> NodeState {
        self.inner.lock().await.state.clone()
    }

    /// Change the tie-break pid
    pub async fn set_pid(&self, pid: Pid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let mut next = inner.state.clone();
        next.pid = pid;
        state::commit(&inner.conn, &next)?;
        inner.state = next;
        Ok(())
    }

    /// Change the shared encryption key; resets the sync watermarks
    pub async fn set_encryption_key(&self, key: SyncKey) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let mut next = inner.state.clone();
        next.encryption_key = key;
        commit_and_reset(&mut inner.conn, &next)?;
        inner.state = next;
        Ok(())
    }

    /// Change the sync peer; resets the sync watermarks when it differs
    pub async fn set_remote_hostname(&self, host: &str) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let host = host.trim();
        if inner.state.remote_hostname == host {
            return Ok(());
        }
        let mut next = inner.state.clone();
        next.remote_hostname = host.to_string();
        commit_and_reset(&mut inner.conn, &next)?;
        inner.state = next;
        Ok(())
    }

    /// Get a sync watermark
    pub async fn watermark(&self, mark: Watermark) -> Result<Seq> {
        let inner = self.inner.lock().await;
        state::watermark(&inner.conn, mark)
    }

    /// Move a sync watermark forward
    pub async fn advance_watermark(&self, mark: Watermark, to: Seq) -> Result<()> {
        let inner = self.inner.lock().await;
        state::advance_watermark(&inner.conn, mark, to)
    }
}

/// Largest value the INTEGER columns hold
const MAX_STORED: u64 = i64::MAX as u64;

fn to_unsigned(stored: i64) -> Result<u64> {
    u64::try_from(stored)
        .map_err(|_| Error::StateCorrupted(format!("negative counter {} in entries", stored)))
}

/// Commit new node state and forget the watermarks in one transaction
fn commit_and_reset(conn: &mut Connection, next: &NodeState) -> Result<()> {
    let tx = conn.transaction()?;
    state::commit(&tx, next)?;
    state::reset_watermarks(&tx)?;
    tx.commit()?;
    Ok(())
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<Entry> {
    let version = row.get::<_, i64>(2)?;
    Ok(Entry {
        key: row.get(0)?,
        value: row.get(1)?,
        version: Version::try_from(version).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Integer, Box::new(e))
        })?,
        owner_pid: row.get(3)?,
        deleted: row.get(4)?,
        url_token: row.get(5)?,
    })
}

fn read_entry(conn: &Connection, key: &str) -> Result<Option<Entry>> {
    let entry = conn
        .query_row(
            &format!("SELECT {} FROM entries WHERE key = ?1", ENTRY_COLUMNS),
            params![key],
            entry_from_row,
        )
        .optional()?;
    Ok(entry)
}

fn write_entry(conn: &Connection, entry: &Entry, seq: Seq) -> Result<()> {
    entry.check_version()?;
    conn.execute(
        r#"
        INSERT INTO entries (key, value, version, owner_pid, deleted, url_token, seq)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(key) DO UPDATE SET
            value = ?2,
            version = ?3,
            owner_pid = ?4,
            deleted = ?5,
            url_token = ?6,
            seq = ?7,
            updated_at = CURRENT_TIMESTAMP
        "#,
        params![
            entry.key,
            entry.value,
            entry.version as i64,
            entry.owner_pid,
            entry.deleted,
            entry.url_token,
            seq as i64
        ],
    )?;
    Ok(())
}
