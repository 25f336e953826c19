//! Secret-store contract and its adapters.
//!
//! Key material never touches the archive directory. It is kept in a
//! confidential key-value store addressed by a string label:
//!
//! - [`KeyringStore`]: the platform keychain (macOS Keychain, Secret Service,
//!   Windows Credential Manager) through the `keyring` crate
//! - [`MemoryStore`]: an in-process map for tests and throwaway sessions

use crate::error::SecretStoreError;
use base64::{engine::general_purpose, Engine as _};
use keyring::Entry;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};
use zeroize::Zeroizing;

type StoreResult<T> = std::result::Result<T, SecretStoreError>;

/// Store, retrieve and delete secrets by label.
pub trait SecretStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Exclusive create. Fails with `WriteFailed` if `label` already exists.
    fn add(&self, label: &str, secret: &[u8]) -> StoreResult<()>;

    fn get(&self, label: &str) -> StoreResult<Zeroizing<Vec<u8>>>;

    /// Fails with `NotFound` if `label` does not exist.
    fn delete(&self, label: &str) -> StoreResult<()>;
}

/// Platform keychain adapter.
///
/// Entries are created under `service` with the label as the account name.
/// Secrets are Base64-encoded because the portable keyring API only
/// carries strings. Availability follows the platform default, which on
/// every supported backend means "while the user session is unlocked".
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, label: &str) -> std::result::Result<Entry, keyring::Error> {
        Entry::new(&self.service, label)
    }
}

impl SecretStore for KeyringStore {
    fn name(&self) -> &str {
        "keyring"
    }

    fn add(&self, label: &str, secret: &[u8]) -> StoreResult<()> {
        let write_failed = |reason: String| SecretStoreError::WriteFailed {
            label: label.to_string(),
            reason,
        };

        let entry = self
            .entry(label)
            .map_err(|e| write_failed(format!("keyring init: {e}")))?;

        match entry.get_password() {
            Ok(_) => return Err(write_failed("entry already exists".into())),
            Err(keyring::Error::NoEntry) => {}
            Err(e) => return Err(write_failed(format!("probing entry: {e}"))),
        }

        let encoded = Zeroizing::new(general_purpose::STANDARD.encode(secret));
        entry
            .set_password(&encoded)
            .map_err(|e| write_failed(format!("store secret: {e}")))?;
        debug!(label, service = %self.service, "secret stored in keyring");
        Ok(())
    }

    fn get(&self, label: &str) -> StoreResult<Zeroizing<Vec<u8>>> {
        let not_found = || SecretStoreError::NotFound {
            label: label.to_string(),
        };

        let entry = self.entry(label).map_err(|e| {
            warn!(label, error = %e, "keyring init failed");
            not_found()
        })?;

        let encoded = match entry.get_password() {
            Ok(p) => Zeroizing::new(p),
            Err(keyring::Error::NoEntry) => return Err(not_found()),
            Err(e) => {
                warn!(label, error = %e, "keyring lookup failed");
                return Err(not_found());
            }
        };

        general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map(Zeroizing::new)
            .map_err(|e| {
                warn!(label, error = %e, "keyring entry is not valid base64");
                not_found()
            })
    }

    fn delete(&self, label: &str) -> StoreResult<()> {
        let entry = self.entry(label).map_err(|e| SecretStoreError::DeleteFailed {
            label: label.to_string(),
            reason: format!("keyring init: {e}"),
        })?;

        match entry.delete_password() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Err(SecretStoreError::NotFound {
                label: label.to_string(),
            }),
            Err(e) => Err(SecretStoreError::DeleteFailed {
                label: label.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// In-memory store. Contents are zeroized when removed or dropped.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, label: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(label)
    }
}

impl SecretStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn add(&self, label: &str, secret: &[u8]) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(label) {
            return Err(SecretStoreError::WriteFailed {
                label: label.to_string(),
                reason: "entry already exists".into(),
            });
        }
        entries.insert(label.to_string(), Zeroizing::new(secret.to_vec()));
        Ok(())
    }

    fn get(&self, label: &str) -> StoreResult<Zeroizing<Vec<u8>>> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(label)
            .cloned()
            .ok_or_else(|| SecretStoreError::NotFound {
                label: label.to_string(),
            })
    }

    fn delete(&self, label: &str) -> StoreResult<()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(label)
            .map(|_| ())
            .ok_or_else(|| SecretStoreError::NotFound {
                label: label.to_string(),
            })
    }
}
