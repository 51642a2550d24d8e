//! Per-entry encryption of object archive blobs.
//!
//! Each blob is sealed with ChaCha20-Poly1305 under a key derived from the
//! user-supplied passphrase. A fresh random nonce is prepended to every
//! sealed blob, so entries can be decrypted independently.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::util::fs::write_atomic;

/// Module the loader imports first to obtain the key.
pub const KEY_MODULE: &str = "pyimod00_crypto_key";

const NONCE_LEN: usize = 12;

/// Symmetric cipher for object archive entries.
#[derive(Clone)]
pub struct Cipher {
    key: [u8; 32],
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}

impl Cipher {
    /// Derive a cipher from a passphrase.
    pub fn new(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        Cipher { key }
    }

    /// Hex form of the derived key, as written into the key module.
    pub fn key_hex(&self) -> String {
        hex::encode(self.key)
    }

    fn aead(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key))
    }

    /// Seal `data`; output is `nonce || ciphertext || tag`.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let nonce: [u8; NONCE_LEN] = rand::random();
        let sealed = self
            .aead()
            .encrypt(Nonce::from_slice(&nonce), data)
            .map_err(|_| anyhow!("failed to encrypt archive entry"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open a blob produced by [`Cipher::encrypt`].
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < NONCE_LEN {
            return Err(anyhow!("encrypted entry is truncated"));
        }
        let (nonce, sealed) = blob.split_at(NONCE_LEN);
        self.aead()
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| anyhow!("failed to decrypt archive entry (wrong key?)"))
    }

    /// Source of the key module.
    pub fn key_module_source(&self) -> String {
        format!("# -*- coding: utf-8 -*-\nkey = '{}'\n", self.key_hex())
    }

    /// Write the key module into `dir` and return its path.
    ///
    /// An identical existing file is left untouched to keep its mtime.
    pub fn write_key_module(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(format!("{}.py", KEY_MODULE));
        let source = self.key_module_source();
        if std::fs::read_to_string(&path).ok().as_deref() != Some(source.as_str()) {
            write_atomic(&path, source.as_bytes())?;
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_seal_and_open() {
        let cipher = Cipher::new("s3cret");
        let blob = cipher.encrypt(b"code object").unwrap();
        assert_ne!(&blob[NONCE_LEN..], b"code object");
        assert_eq!(cipher.decrypt(&blob).unwrap(), b"code object");
    }

    #[test]
    fn test_nonces_differ_between_entries() {
        let cipher = Cipher::new("s3cret");
        let a = cipher.encrypt(b"same").unwrap();
        let b = cipher.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let blob = Cipher::new("right").encrypt(b"data").unwrap();
        let err = Cipher::new("wrong").decrypt(&blob).unwrap_err();
        assert!(err.to_string().contains("wrong key"));
    }

    #[test]
    fn test_key_module() {
        let tmp = TempDir::new().unwrap();
        let cipher = Cipher::new("s3cret");
        let path = cipher.write_key_module(tmp.path()).unwrap();

        assert!(path.ends_with("pyimod00_crypto_key.py"));
        let source = std::fs::read_to_string(path).unwrap();
        assert!(source.contains(&cipher.key_hex()));
    }
}
