//! kvass Error Types

use thiserror::Error;

/// Result type alias for kvass operations
pub type Result<T> = std::result::Result<T, Error>;

/// kvass error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Sync gate and codec errors
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Sync payload rejected: {0}")]
    Codec(String),

    // Storage errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Node state corrupted: {0}")]
    StateCorrupted(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Peer {peer} rejected request with status {status}: {message}")]
    PeerRejected {
        peer: String,
        status: u16,
        message: String,
    },

    #[error("No sync peer configured")]
    NoRemote,

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_) | Error::Network(_)
        ) || matches!(self, Error::PeerRejected { status, .. } if *status >= 500)
    }

    /// Check if this error was caused by the request rather than by this node
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::Codec(_))
    }

    /// Check if a failed sync phase should be downgraded to a warning
    pub fn is_sync_warning(&self) -> bool {
        matches!(
            self,
            Error::Network(_)
                | Error::ConnectionTimeout(_)
                | Error::PeerRejected { .. }
                | Error::Codec(_)
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Store(format!("SQLite error: {}", e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Codec(format!("malformed payload: {}", e))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let target = e
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "peer".to_string());
        if e.is_timeout() {
            Error::ConnectionTimeout(target)
        } else {
            Error::Network(format!("{}: {}", target, e))
        }
    }
}
