//! Encryption of the bookmark blob shared with the remote store.
//!
//! The engine only sees [`CryptoService`]. Failures surface as
//! `SyncError::Encryption` / `SyncError::Decryption`; a blob that cannot be
//! decrypted is never retried.

pub mod passphrase;

pub use passphrase::PassphraseCrypto;

use crate::error::Result;

pub trait CryptoService: Send + Sync {
    fn encrypt_data(&self, plaintext: &str) -> Result<String>;
    fn decrypt_data(&self, ciphertext: &str) -> Result<String>;
}
