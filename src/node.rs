//! Node
//!
//! Local reads and writes that sync with the configured peer as a side
//! effect: reads pull first, writes push afterwards. Both run a full
//! pull-then-push round so a single command leaves the pair converged.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{KvassConfig, SyncConfig};
use crate::error::{Error, Result};
use crate::replication::{ReplicationClient, SyncReport};
use crate::store::{Entry, EntryStore};

/// Result of a local operation plus the sync round it triggered
#[derive(Debug)]
pub struct Synced<T> {
    /// Outcome of the local operation
    pub value: T,
    /// `None` when no peer is configured
    pub report: Option<SyncReport>,
}

impl<T> Synced<T> {
    /// Warnings raised while talking to the peer
    pub fn warnings(&self) -> &[Error] {
        self.report
            .as_ref()
            .map(|r| r.warnings.as_slice())
            .unwrap_or_default()
    }
}

/// A kvass node: the local store and its view of the peer
pub struct Node {
    store: Arc<EntryStore>,
    timeout: Duration,
    incremental: bool,
}

impl Node {
    /// Open the node database named in `config`
    pub fn open(config: &KvassConfig) -> Result<Self> {
        let store = EntryStore::open(&config.node.db_path)?;
        Ok(Self::with_store(Arc::new(store), &config.sync))
    }

    /// Wrap an already opened store
    pub fn with_store(store: Arc<EntryStore>, sync: &SyncConfig) -> Self {
        Self {
            store,
            timeout: sync.timeout(),
            incremental: sync.incremental,
        }
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<EntryStore> {
        &self.store
    }

    /// Client for the configured peer, `None` if there is none.
    ///
    /// Built from the current node state so key or remote changes take
    /// effect on the next call.
    pub async fn client(&self) -> Result<Option<ReplicationClient>> {
        let state = self.store.node_state().await;
        if !state.has_remote() {
            return Ok(None);
        }
        ReplicationClient::new(Arc::clone(&self.store), &state, self.timeout, self.incremental)
            .map(Some)
    }

    /// Live value of `key` after syncing with the peer
    pub async fn get(&self, key: &str) -> Result<Synced<Option<Vec<u8>>>> {
        let report = self.sync_if_configured().await?;
        let value = self
            .store
            .get(key)
            .await?
            .and_then(|entry| entry.live_value().map(<[u8]>::to_vec));
        Ok(Synced { value, report })
    }

    /// Store `value` under `key`, then sync
    pub async fn set(&self, key: &str, value: Vec<u8>) -> Result<Synced<Entry>> {
        let entry = self.store.put(key, value).await?;
        let report = self.sync_if_configured().await?;
        Ok(Synced {
            value: entry,
            report,
        })
    }

    /// Delete `key`, then sync.
    ///
    /// The value is `None` when there was nothing to delete; no sync is
    /// attempted in that case.
    pub async fn delete(&self, key: &str) -> Result<Synced<Option<Entry>>> {
        let tombstone = self.store.delete(key).await?;
        let report = if tombstone.is_some() {
            self.sync_if_configured().await?
        } else {
            None
        };
        Ok(Synced {
            value: tombstone,
            report,
        })
    }

    /// Live keys, local only
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.store.keys().await
    }

    /// Run an explicit sync round
    pub async fn sync(&self, full: bool) -> Result<SyncReport> {
        let client = self.client().await?.ok_or(Error::NoRemote)?;
        let report = client.sync(full).await?;
        tracing::info!("Synced with {}: {}", client.peer(), report);
        Ok(report)
    }

    async fn sync_if_configured(&self) -> Result<Option<SyncReport>> {
        match self.client().await? {
            Some(client) => Ok(Some(client.sync(false).await?)),
            None => Ok(None),
        }
    }
}
