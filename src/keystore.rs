//! Key Store
//!
//! One raw AES-256-GCM key per store, generated on first use and read back
//! verbatim afterwards. Losing a key file makes everything sealed under it
//! unrecoverable; there is no rotation.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;
use zeroize::Zeroizing;

use crate::error::{CoreError, Result};

/// Current sealed blob layout
pub const BLOB_VERSION: u32 = 1;

const NONCE_LEN: usize = 12;

/// Symmetric key loaded from (or written to) a key file
pub struct EncryptionKey {
    bytes: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("key_id", &self.key_id())
            .finish()
    }
}

/// Ciphertext plus everything needed to open it again
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedBlob {
    pub version: u32,
    /// Identifier of the key that sealed this blob
    pub key_id: String,
    pub nonce: String,
    pub ciphertext: String,
}

/// Return the key stored at `path`, creating it if the file is absent.
///
/// Existing bytes are returned as-is; their length is only checked when the
/// key is used.
pub fn get_or_create_key(path: &Path) -> Result<EncryptionKey> {
    if path.exists() {
        let bytes = std::fs::read(path).map_err(|e| {
            CoreError::Storage(format!("reading key {}: {}", path.display(), e))
        })?;
        return Ok(EncryptionKey::from_bytes(bytes));
    }

    let key = Aes256Gcm::generate_key(&mut OsRng);
    let bytes = Zeroizing::new(key.to_vec());

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_key_file(path, &bytes).map_err(|e| {
        CoreError::Storage(format!("writing key {}: {}", path.display(), e))
    })?;

    let key = EncryptionKey { bytes };
    info!("Created encryption key {} at {}", key.key_id(), path.display());
    Ok(key)
}

#[cfg(unix)]
fn write_key_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_key_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, bytes)
}

impl EncryptionKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Short fingerprint stored beside every ciphertext
    pub fn key_id(&self) -> String {
        let digest = Sha256::digest(self.bytes.as_slice());
        hex::encode(&digest[..8])
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.bytes).map_err(|_| {
            CoreError::Storage(format!(
                "key {} is {} bytes, expected 32",
                self.key_id(),
                self.bytes.len()
            ))
        })
    }

    /// Encrypt `plaintext` under a fresh random nonce
    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedBlob> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CoreError::Storage(format!("encryption failed: {}", e)))?;

        Ok(SealedBlob {
            version: BLOB_VERSION,
            key_id: self.key_id(),
            nonce: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(&ciphertext),
        })
    }

    /// Decrypt a blob sealed under this key
    pub fn open(&self, blob: &SealedBlob) -> Result<Vec<u8>> {
        if blob.version != BLOB_VERSION {
            return Err(CoreError::Storage(format!(
                "unsupported blob version {}",
                blob.version
            )));
        }

        let key_id = self.key_id();
        if blob.key_id != key_id {
            return Err(CoreError::Storage(format!(
                "blob sealed with key {}, current key is {}",
                blob.key_id, key_id
            )));
        }

        let nonce_bytes = BASE64
            .decode(&blob.nonce)
            .map_err(|e| CoreError::Storage(format!("bad nonce: {}", e)))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(CoreError::Storage("bad nonce length".to_string()));
        }
        let ciphertext = BASE64
            .decode(&blob.ciphertext)
            .map_err(|e| CoreError::Storage(format!("bad ciphertext: {}", e)))?;

        self.cipher()?
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| CoreError::Storage("decryption failed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_key_created_once_then_reused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys").join("test.key");

        let first = get_or_create_key(&path).unwrap();
        assert_eq!(first.as_bytes().len(), 32);
        assert!(path.exists());

        let second = get_or_create_key(&path).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(first.key_id(), second.key_id());
    }

    #[test]
    fn test_existing_key_returned_verbatim() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.key");
        std::fs::write(&path, b"not-a-real-key").unwrap();

        let key = get_or_create_key(&path).unwrap();
        assert_eq!(key.as_bytes(), b"not-a-real-key");

        // Wrong length only surfaces on use
        assert!(matches!(key.seal(b"data"), Err(CoreError::Storage(_))));
    }

    #[test]
    fn test_seal_and_open() {
        let key = EncryptionKey::from_bytes(vec![7u8; 32]);
        let blob = key.seal(b"https://app.powerbi.com/view?r=abc").unwrap();
        assert_eq!(blob.key_id, key.key_id());
        assert!(!blob.ciphertext.contains("powerbi"));

        let plain = key.open(&blob).unwrap();
        assert_eq!(plain, b"https://app.powerbi.com/view?r=abc");
    }

    #[test]
    fn test_open_with_other_key_reports_key_id() {
        let key_a = EncryptionKey::from_bytes(vec![1u8; 32]);
        let key_b = EncryptionKey::from_bytes(vec![2u8; 32]);
        let blob = key_a.seal(b"secret").unwrap();

        match key_b.open(&blob) {
            Err(CoreError::Storage(msg)) => assert!(msg.contains(&key_a.key_id())),
            other => panic!("expected storage error, got {:?}", other),
        }
    }

    #[test]
    fn test_tampered_blob_rejected() {
        let key = EncryptionKey::from_bytes(vec![3u8; 32]);
        let mut blob = key.seal(b"secret").unwrap();
        let mut raw = BASE64.decode(&blob.ciphertext).unwrap();
        raw[0] ^= 0xff;
        blob.ciphertext = BASE64.encode(&raw);

        assert!(matches!(key.open(&blob), Err(CoreError::Storage(_))));
    }
}
