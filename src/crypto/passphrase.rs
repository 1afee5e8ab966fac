//! AES-256-CBC keyed from a user passphrase.
//!
//! The key is derived with PBKDF2-HMAC-SHA256, salted with the sync id so
//! the same passphrase yields different keys for different syncs. Each blob
//! carries its own random IV: `base64(iv || ciphertext)`.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use super::CryptoService;
use crate::error::{Result, SyncError};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const KEY_LENGTH: usize = 32;
const IV_LENGTH: usize = 16;
const BLOCK_SIZE: usize = 16;
pub const DEFAULT_ITERATIONS: u32 = 250_000;

pub struct PassphraseCrypto {
    key: [u8; KEY_LENGTH],
}

impl PassphraseCrypto {
    pub fn new(passphrase: &str, salt: &str) -> Result<Self> {
        Self::with_iterations(passphrase, salt, DEFAULT_ITERATIONS)
    }

    pub fn with_iterations(passphrase: &str, salt: &str, iterations: u32) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(SyncError::InvalidConfig("passphrase must not be empty".into()));
        }
        if iterations == 0 {
            return Err(SyncError::InvalidConfig("iterations must be positive".into()));
        }

        let mut key = [0u8; KEY_LENGTH];
        pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt.as_bytes(), iterations, &mut key);
        Ok(Self { key })
    }
}

impl CryptoService for PassphraseCrypto {
    fn encrypt_data(&self, plaintext: &str) -> Result<String> {
        let iv: [u8; IV_LENGTH] = *uuid::Uuid::new_v4().as_bytes();

        let message_len = plaintext.len();
        let mut buf = vec![0u8; message_len + BLOCK_SIZE];
        buf[..message_len].copy_from_slice(plaintext.as_bytes());

        let ciphertext = Aes256CbcEnc::new((&self.key).into(), (&iv).into())
            .encrypt_padded_mut::<Pkcs7>(&mut buf, message_len)
            .map_err(|e| SyncError::Encryption(format!("{:?}", e)))?;

        let mut payload = Vec::with_capacity(IV_LENGTH + ciphertext.len());
        payload.extend_from_slice(&iv);
        payload.extend_from_slice(ciphertext);
        Ok(STANDARD.encode(payload))
    }

    fn decrypt_data(&self, ciphertext: &str) -> Result<String> {
        let payload = STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| SyncError::Decryption(format!("invalid base64: {}", e)))?;

        if payload.len() < IV_LENGTH + BLOCK_SIZE || (payload.len() - IV_LENGTH) % BLOCK_SIZE != 0 {
            return Err(SyncError::Decryption(format!(
                "payload has unexpected length {}",
                payload.len()
            )));
        }

        let (iv, body) = payload.split_at(IV_LENGTH);
        let iv: [u8; IV_LENGTH] = iv
            .try_into()
            .map_err(|_| SyncError::Decryption("truncated IV".into()))?;
        let mut buf = body.to_vec();

        let plaintext = Aes256CbcDec::new((&self.key).into(), (&iv).into())
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|e| SyncError::Decryption(format!("AES-CBC decryption failed: {:?}", e)))?;

        String::from_utf8(plaintext.to_vec())
            .map_err(|e| SyncError::Decryption(format!("UTF-8 conversion failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crypto(passphrase: &str) -> PassphraseCrypto {
        PassphraseCrypto::with_iterations(passphrase, "sync-id", 1_000).unwrap()
    }

    #[test]
    fn test_encrypt_then_decrypt() {
        let crypto = crypto("correct horse");
        let blob = crypto.encrypt_data(r#"[{"id":1,"children":[]}]"#).unwrap();
        assert_eq!(crypto.decrypt_data(&blob).unwrap(), r#"[{"id":1,"children":[]}]"#);
    }

    #[test]
    fn test_each_blob_gets_fresh_iv() {
        let crypto = crypto("correct horse");
        assert_ne!(crypto.encrypt_data("same").unwrap(), crypto.encrypt_data("same").unwrap());
    }

    #[test]
    fn test_wrong_passphrase_is_a_decryption_error() {
        let blob = crypto("correct horse").encrypt_data("secret bookmarks").unwrap();
        // a wrong key almost always breaks the padding; when it does not, the
        // plaintext still differs
        match crypto("battery staple").decrypt_data(&blob) {
            Err(err) => assert!(matches!(err, SyncError::Decryption(_))),
            Ok(plaintext) => assert_ne!(plaintext, "secret bookmarks"),
        }
    }

    #[test]
    fn test_garbage_is_rejected() {
        let crypto = crypto("correct horse");
        assert!(matches!(crypto.decrypt_data("not base64!"), Err(SyncError::Decryption(_))));
        assert!(matches!(crypto.decrypt_data("AAAA"), Err(SyncError::Decryption(_))));
    }

    #[test]
    fn test_empty_passphrase_is_invalid() {
        assert!(matches!(
            PassphraseCrypto::with_iterations("", "salt", 10),
            Err(SyncError::InvalidConfig(_))
        ));
    }
}
