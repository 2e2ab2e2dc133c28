//! Replication Client
//!
//! Outbound pull-then-push exchange with the configured peer. Each phase
//! is one stateless HTTP round trip; resending entries is always safe
//! because merging is idempotent. Watermarks are change log positions,
//! not versions, so entries that reach the peer late are still picked up.

use std::sync::Arc;
use std::time::Duration;

use super::protocol::{self, UpdatesRequest, UpdatesResponse, APPLY_PATH, UPDATES_PATH};
use super::{PullSummary, SyncReport};
use crate::crypto::{bearer_token, SyncCipher};
use crate::error::{Error, Result};
use crate::store::{EntryStore, NodeState, Seq, Watermark};

/// Client side of the sync protocol for one peer
pub struct ReplicationClient {
    http: reqwest::Client,
    peer: String,
    base_url: String,
    token: String,
    cipher: SyncCipher,
    store: Arc<EntryStore>,
    incremental: bool,
}

impl ReplicationClient {
    /// Create a client for the peer named in `state`
    pub fn new(
        store: Arc<EntryStore>,
        state: &NodeState,
        timeout: Duration,
        incremental: bool,
    ) -> Result<Self> {
        if !state.has_remote() {
            return Err(Error::NoRemote);
        }

        let peer = state.remote_hostname.trim().to_string();
        let base_url = if peer.starts_with("http://") || peer.starts_with("https://") {
            peer.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", peer)
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            peer,
            base_url,
            token: bearer_token(&state.encryption_key),
            cipher: SyncCipher::new(&state.encryption_key),
            store,
            incremental,
        })
    }

    /// Peer address
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Fetch the peer's newer entries and merge them locally
    pub async fn pull(&self, full: bool) -> Result<PullSummary> {
        let since = self.starting_point(Watermark::Pull, full).await?;
        let body = protocol::seal(&self.cipher, &UpdatesRequest { since })?;
        let response = self.post(UPDATES_PATH, body).await?;
        let updates: UpdatesResponse = protocol::open(&self.cipher, &response)?;
        protocol::check_batch(&updates.entries)?;

        let mut summary = PullSummary {
            received: updates.entries.len(),
            applied: 0,
        };
        for entry in updates.entries {
            if self.store.apply_remote(entry).await? {
                summary.applied += 1;
            }
        }
        if updates.cursor > since {
            self.store
                .advance_watermark(Watermark::Pull, updates.cursor)
                .await?;
        }

        tracing::debug!(
            "Pulled {} entries from {} ({} applied)",
            summary.received,
            self.peer,
            summary.applied
        );
        Ok(summary)
    }

    /// Send local entries the peer has not acknowledged yet.
    ///
    /// Returns the number of entries sent.
    pub async fn push(&self, full: bool) -> Result<usize> {
        let since = self.starting_point(Watermark::Push, full).await?;
        let changes = self.store.changes_since(since).await?;
        if changes.entries.is_empty() {
            return Ok(0);
        }

        let body = protocol::seal(&self.cipher, &changes.entries)?;
        self.post(APPLY_PATH, body).await?;
        self.store
            .advance_watermark(Watermark::Push, changes.cursor)
            .await?;

        tracing::debug!("Pushed {} entries to {}", changes.entries.len(), self.peer);
        Ok(changes.entries.len())
    }

    /// Run pull then push.
    ///
    /// Peer-side failures of either phase are collected as warnings; only
    /// local store failures are returned as errors.
    pub async fn sync(&self, full: bool) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        match self.pull(full).await {
            Ok(summary) => report.pulled = Some(summary),
            Err(e) if e.is_sync_warning() => {
                tracing::warn!("Couldn't get updates from {}: {}", self.peer, e);
                report.warnings.push(e);
            }
            Err(e) => return Err(e),
        }

        match self.push(full).await {
            Ok(sent) => report.pushed = Some(sent),
            Err(e) if e.is_sync_warning() => {
                tracing::warn!("Couldn't push updates to {}: {}", self.peer, e);
                report.warnings.push(e);
            }
            Err(e) => return Err(e),
        }

        Ok(report)
    }

    async fn starting_point(&self, mark: Watermark, full: bool) -> Result<Seq> {
        if full || !self.incremental {
            Ok(0)
        } else {
            self.store.watermark(mark).await
        }
    }

    async fn post(&self, path: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::PeerRejected {
                peer: self.peer.clone(),
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }
}
