//! Shared-secret bearer tokens for the sync endpoints.
//!
//! Both peers derive the same token from their shared key, so the key
//! itself never travels over the wire.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};
use crate::store::SyncKey;

const TOKEN_CONTEXT: &[u8] = b"kvass-sync-auth";

/// Derive the bearer token for a shared key
pub fn bearer_token(key: &SyncKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(TOKEN_CONTEXT);
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Checks the bearer token on inbound sync requests
#[derive(Clone)]
pub struct AuthGate {
    token: String,
}

impl AuthGate {
    /// Create a gate accepting the token derived from `key`
    pub fn new(key: &SyncKey) -> Self {
        Self {
            token: bearer_token(key),
        }
    }

    /// Validate an `Authorization` header value.
    ///
    /// The comparison runs in constant time with respect to the token
    /// contents.
    pub fn check(&self, authorization: Option<&str>) -> Result<()> {
        let header = authorization.ok_or_else(|| Error::Auth("missing auth token".into()))?;
        let presented = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| Error::Auth("expected a bearer token".into()))?
            .trim();

        if bool::from(presented.as_bytes().ct_eq(self.token.as_bytes())) {
            Ok(())
        } else {
            Err(Error::Auth("incorrect auth token".into()))
        }
    }
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthGate(..)")
    }
}
