//! Key generation and secret-store binding.
//!
//! This module provides [`KeyManager`] for generating AES-256 key/IV pairs and
//! keeping them in a [`SecretStore`] under deterministic labels.
//!
//! ## Labels
//!
//! Each pair occupies two entries, `<namespace>.key` and `<namespace>.iv`.
//! Archives build their namespace as `<tag>.<container id>` so that two
//! archives created by the same application never share key material.
//!
//! ## Security Features
//!
//! - Key material is zeroized on drop
//! - Key and IV bytes are never logged or written to the archive
//! - Generation uses the OS CSPRNG via `OsRng`

use crate::crypto::{IV_SIZE, KEY_SIZE};
use crate::error::{CryptoError, Result, SecretStoreError};
use crate::secret_store::SecretStore;
use rand_core::{OsRng, RngCore};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroize;

pub const KEY_SUFFIX: &str = "key";
pub const IV_SUFFIX: &str = "iv";

/// A 256-bit key and 128-bit IV.
pub struct KeyMaterial {
    key: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key", &"<redacted>")
            .field("iv", &"<redacted>")
            .finish()
    }
}

impl KeyMaterial {
    pub fn from_slices(key: &[u8], iv: &[u8]) -> std::result::Result<Self, CryptoError> {
        if key.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyMaterial {
                what: "key",
                expected: KEY_SIZE,
                found: key.len(),
            });
        }
        if iv.len() != IV_SIZE {
            return Err(CryptoError::InvalidKeyMaterial {
                what: "iv",
                expected: IV_SIZE,
                found: iv.len(),
            });
        }
        let mut material = Self {
            key: [0u8; KEY_SIZE],
            iv: [0u8; IV_SIZE],
        };
        material.key.copy_from_slice(key);
        material.iv.copy_from_slice(iv);
        Ok(material)
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }
}

/// Namespace under which one key/IV pair is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretLabel {
    namespace: String,
}

impl SecretLabel {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Label for a single archive: `<tag>.<container id>`.
    pub fn for_container(tag: &str, container_id: &Uuid) -> Self {
        Self::new(format!("{tag}.{container_id}"))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn entry(&self, suffix: &str) -> String {
        format!("{}.{}", self.namespace, suffix)
    }

    pub fn key_entry(&self) -> String {
        self.entry(KEY_SUFFIX)
    }

    pub fn iv_entry(&self) -> String {
        self.entry(IV_SUFFIX)
    }
}

impl fmt::Display for SecretLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.namespace)
    }
}

/// Handles key generation and persistence in a secret store.
#[derive(Clone)]
pub struct KeyManager {
    store: Arc<dyn SecretStore>,
}

impl KeyManager {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Fresh random key and IV from the OS random source.
    pub fn generate() -> Result<KeyMaterial> {
        let mut material = KeyMaterial {
            key: [0u8; KEY_SIZE],
            iv: [0u8; IV_SIZE],
        };
        OsRng
            .try_fill_bytes(&mut material.key)
            .map_err(|e| CryptoError::KeyGenerationFailed(e.to_string()))?;
        OsRng
            .try_fill_bytes(&mut material.iv)
            .map_err(|e| CryptoError::KeyGenerationFailed(e.to_string()))?;
        Ok(material)
    }

    /// Writes both entries. If the IV cannot be stored the key entry is
    /// removed again so the pair is never left half-written.
    pub fn store(&self, material: &KeyMaterial, label: &SecretLabel) -> Result<()> {
        info!(label = %label, store = self.store.name(), "storing key material");
        let key_entry = label.key_entry();
        self.store.add(&key_entry, material.key())?;

        if let Err(e) = self.store.add(&label.iv_entry(), material.iv()) {
            if let Err(cleanup) = self.store.delete(&key_entry) {
                warn!(label = %label, error = %cleanup, "failed to roll back key entry");
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Looks up both entries. A missing entry is `SecretStoreError::NotFound`.
    pub fn retrieve(&self, label: &SecretLabel) -> Result<KeyMaterial> {
        debug!(label = %label, "retrieving key material");
        let key = self.store.get(&label.key_entry())?;
        let iv = self.store.get(&label.iv_entry())?;
        Ok(KeyMaterial::from_slices(&key, &iv)?)
    }

    /// Removes both entries. Entries that are already gone count as removed.
    /// Returns how many entries were actually deleted.
    pub fn delete(&self, label: &SecretLabel) -> Result<usize> {
        info!(label = %label, "deleting key material");
        let mut removed = 0;
        let mut first_error: Option<SecretStoreError> = None;

        for entry in [label.key_entry(), label.iv_entry()] {
            match self.store.delete(&entry) {
                Ok(()) => removed += 1,
                Err(SecretStoreError::NotFound { .. }) => {
                    debug!(entry = %entry, "secret already absent");
                }
                Err(e) => {
                    warn!(entry = %entry, error = %e, "secret deletion failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(removed),
        }
    }
}
