//! # scribblefs - Encrypted Scribble Archives
//!
//! scribblefs reads and writes Scribble archives: directory containers whose
//! metadata and assets are encrypted at rest with AES-256-CBC, with the key
//! material held in a platform secret store.
//!
//! ## Features
//!
//! - **Archive lifecycle**: create, open, close and delete archives
//! - **Decrypt-to-temp sessions**: plaintext only exists in a scratch copy outside the archive
//! - **Secret store binding**: per-archive key/IV pairs under deterministic labels
//! - **Metadata codec**: a strict JSON encoder/decoder for the metadata document
//! - **Change watching**: modification reports for files inside an archive
//!
//! ## Quick Start
//!
//! ```no_run
//! use scribblefs::{config::Config, metadata::MetadataDefaults};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cfg = Config::load_with_env(None)?;
//!     let archive = cfg.archive();
//!
//!     archive.create("./thesis.sc", &MetadataDefaults::new("Thesis")).await?;
//!
//!     let session = archive.open("./thesis.sc").await?;
//!     session.set_favorite(true).await?;
//!     session.close().await?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod key_manager;
pub mod metadata;
pub mod secret_store;
pub mod warning;
pub mod watcher;

// Re-export common types for convenience
pub use archive::{ArchiveSession, AssetKind, ScribbleArchive};
pub use error::ScribbleError;
