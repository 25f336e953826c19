//! Configuration management with environment variable support.
//!
//! This module provides [`Config`] for loading and validating scribblefs
//! settings from JSON files and environment variables.
//!
//! ## Environment Variables
//!
//! - `SCRIBBLEFS_NAMESPACE`: Override the secret-store namespace tag
//! - `SCRIBBLEFS_SCRATCH_DIR`: Override the directory for decrypted working copies
//! - `SCRIBBLEFS_CONFIG`: Override config file path

use crate::archive::ScribbleArchive;
use crate::key_manager::KeyManager;
use crate::metadata::{MetadataDefaults, DEFAULT_ENCRYPTION_METHOD};
use crate::secret_store::{KeyringStore, MemoryStore, SecretStore};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Environment variable names for configuration overrides
pub const ENV_NAMESPACE: &str = "SCRIBBLEFS_NAMESPACE";
pub const ENV_SCRATCH_DIR: &str = "SCRIBBLEFS_SCRATCH_DIR";
pub const ENV_CONFIG_PATH: &str = "SCRIBBLEFS_CONFIG";

pub const DEFAULT_NAMESPACE: &str = "org.scribble.archive";

/// Which secret store backs the key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretStoreKind {
    /// Platform keychain / secret service.
    #[default]
    Keyring,
    /// Process-local; keys vanish when the process exits.
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub namespace: String,
    pub scratch_dir: Option<String>,
    pub secret_store: SecretStoreKind,
    pub author: String,
    pub editor_version: String,
    pub encoding: String,
    pub line_endings: String,
    pub encryption_method: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            scratch_dir: None,
            secret_store: SecretStoreKind::Keyring,
            author: String::new(),
            editor_version: env!("CARGO_PKG_VERSION").to_string(),
            encoding: "UTF-8".to_string(),
            line_endings: "LF".to_string(),
            encryption_method: DEFAULT_ENCRYPTION_METHOD.to_string(),
        }
    }
}

impl Config {
    /// Load config from file path
    pub fn load(path: &str) -> Result<Self> {
        let s =
            fs::read_to_string(path).with_context(|| format!("reading config file {}", path))?;
        let mut config: Config =
            serde_json::from_str(&s).with_context(|| format!("parsing config file {}", path))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config with environment variable overrides
    /// Priority: ENV vars > config file > defaults
    pub fn load_with_env(path: Option<&str>) -> Result<Self> {
        let config_path = path
            .map(String::from)
            .or_else(|| env::var(ENV_CONFIG_PATH).ok());

        let mut config = match config_path {
            Some(ref p) if Path::new(p).exists() => {
                info!(path = p, "loading config from file");
                let s = fs::read_to_string(p)
                    .with_context(|| format!("reading config file {}", p))?;
                serde_json::from_str(&s).with_context(|| format!("parsing config file {}", p))?
            }
            _ => {
                debug!("using default configuration");
                Config::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| env::var(name).ok());
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(namespace) = lookup(ENV_NAMESPACE) {
            debug!(namespace = %namespace, "overriding namespace from environment");
            self.namespace = namespace;
        }

        if let Some(scratch_dir) = lookup(ENV_SCRATCH_DIR) {
            debug!(scratch_dir = %scratch_dir, "overriding scratch_dir from environment");
            self.scratch_dir = Some(scratch_dir);
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            anyhow::bail!("namespace cannot be empty");
        }
        if self.namespace.chars().any(char::is_whitespace) {
            anyhow::bail!("namespace '{}' must not contain whitespace", self.namespace);
        }

        if let Some(dir) = &self.scratch_dir {
            if dir.trim().is_empty() {
                anyhow::bail!("scratch_dir cannot be empty when set");
            }
            // Plaintext working copies land here.
            let lowered = dir.to_lowercase();
            if lowered.contains("public") || lowered.contains("www") || lowered.contains("htdocs") {
                warn!(
                    path = %dir,
                    "scratch directory appears to be in a public directory - decrypted copies will be exposed"
                );
            }
        }

        if self.secret_store == SecretStoreKind::Memory {
            warn!("memory secret store selected - keys will not outlive this process");
        }

        Ok(())
    }

    /// Create a new config with explicit namespace and store.
    pub fn new(namespace: impl Into<String>, secret_store: SecretStoreKind) -> Self {
        Self {
            namespace: namespace.into(),
            secret_store,
            ..Self::default()
        }
    }

    pub fn scratch_dir(&self) -> PathBuf {
        match &self.scratch_dir {
            Some(dir) => PathBuf::from(dir),
            None => env::temp_dir(),
        }
    }

    pub fn secret_store(&self) -> Arc<dyn SecretStore> {
        match self.secret_store {
            SecretStoreKind::Keyring => Arc::new(KeyringStore::new(self.namespace.clone())),
            SecretStoreKind::Memory => Arc::new(MemoryStore::new()),
        }
    }

    /// Builds an archive handle wired to this configuration.
    pub fn archive(&self) -> ScribbleArchive {
        ScribbleArchive::new(KeyManager::new(self.secret_store()), self.namespace.clone())
            .with_scratch_dir(self.scratch_dir())
    }

    /// Metadata values for a new document called `name`.
    pub fn metadata_defaults(&self, name: impl Into<String>) -> MetadataDefaults {
        let mut defaults = MetadataDefaults::new(name).with_author(self.author.clone());
        defaults.editor_version = self.editor_version.clone();
        defaults.encoding = self.encoding.clone();
        defaults.line_endings = self.line_endings.clone();
        defaults.encryption_method = self.encryption_method.clone();
        defaults
    }
}
