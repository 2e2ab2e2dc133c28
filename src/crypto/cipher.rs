//! Payload encryption for sync traffic.
//!
//! ChaCha20-Poly1305 under the pair's shared key. The wire format is
//! `nonce(12) || ciphertext || tag(16)` with a fresh random nonce per
//! message.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;

use crate::error::{Error, Result};
use crate::store::SyncKey;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Symmetric cipher for sync payloads
pub struct SyncCipher {
    cipher: ChaCha20Poly1305,
}

impl SyncCipher {
    /// Create a cipher from the shared key
    pub fn new(key: &SyncKey) -> Self {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        Self { cipher }
    }

    /// Seal a plaintext payload
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| Error::Internal("encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open a sealed payload; fails on a wrong key or any tampering
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::Codec(format!(
                "payload too short ({} bytes)",
                blob.len()
            )));
        }

        let (nonce_bytes, sealed) = blob.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), sealed)
            .map_err(|_| Error::Codec("decryption failed (wrong key or corrupted data)".into()))
    }
}

impl std::fmt::Debug for SyncCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SyncCipher(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let cipher = SyncCipher::new(&SyncKey::generate());
        let sealed = cipher.encrypt(b"payload").unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + 7 + TAG_LEN);
        assert_eq!(cipher.decrypt(&sealed).unwrap(), b"payload");
    }

    #[test]
    fn test_empty_payload_round_trip() {
        let cipher = SyncCipher::new(&SyncKey::generate());
        let sealed = cipher.encrypt(b"").unwrap();
        assert!(cipher.decrypt(&sealed).unwrap().is_empty());
    }

    #[test]
    fn test_nonce_is_fresh() {
        let cipher = SyncCipher::new(&SyncKey::generate());
        let a = cipher.encrypt(b"same").unwrap();
        let b = cipher.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = SyncCipher::new(&SyncKey::generate())
            .encrypt(b"secret")
            .unwrap();
        let other = SyncCipher::new(&SyncKey::generate());
        assert!(matches!(other.decrypt(&sealed), Err(Error::Codec(_))));
    }

    #[test]
    fn test_any_flipped_bit_fails() {
        let cipher = SyncCipher::new(&SyncKey::generate());
        let sealed = cipher.encrypt(b"[{\"key\":\"x\"}]").unwrap();
        for i in 0..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[i] ^= 0x01;
            assert!(cipher.decrypt(&tampered).is_err(), "bit flip at byte {}", i);
        }
    }

    #[test]
    fn test_truncated_fails() {
        let cipher = SyncCipher::new(&SyncKey::generate());
        let sealed = cipher.encrypt(b"data").unwrap();
        assert!(cipher.decrypt(&sealed[..sealed.len() - 1]).is_err());
        assert!(cipher.decrypt(&sealed[..5]).is_err());
    }
}
