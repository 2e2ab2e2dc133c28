//! Crypto Module
//!
//! Payload sealing and bearer authentication for sync traffic. Key
//! material is always passed in explicitly.

mod cipher;
mod token;

pub use cipher::SyncCipher;
pub use token::{bearer_token, AuthGate};
