//! Error types for archive, crypto, secret-store and codec operations.
//!
//! Every failure surfaces as a [`ScribbleError`]. The inner enums keep the
//! failure kinds of each component apart so callers can match on the stage
//! that failed, and [`ScribbleError::code`] maps each kind onto the legacy
//! negative status codes used by older archive tooling.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, ScribbleError>;

/// Kind of a filesystem failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoFailure {
    NotFound,
    PermissionDenied,
    AlreadyExists,
    /// A caller-supplied name or path was rejected before touching the disk.
    InvalidArgument,
    ReadFailed,
    WriteFailed,
}

impl IoFailure {
    /// Classify an OS error. Anything that is not one of the specific kinds
    /// becomes `fallback`, which callers pick by the direction of the I/O.
    pub fn classify(err: &std::io::Error, fallback: IoFailure) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound,
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            std::io::ErrorKind::AlreadyExists => Self::AlreadyExists,
            _ => fallback,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::NotFound => -3,
            Self::PermissionDenied => -4,
            Self::AlreadyExists => -5,
            Self::InvalidArgument => -6,
            Self::ReadFailed => -8,
            Self::WriteFailed => -9,
        }
    }
}

impl fmt::Display for IoFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not found",
            Self::PermissionDenied => "permission denied",
            Self::AlreadyExists => "already exists",
            Self::InvalidArgument => "invalid argument",
            Self::ReadFailed => "read failed",
            Self::WriteFailed => "write failed",
        };
        f.write_str(s)
    }
}

/// Failures of the block cipher and key generation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Also covers bad padding and truncated ciphertext.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("invalid key material: expected {expected}-byte {what}, found {found} bytes")]
    InvalidKeyMaterial {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("cipher initialization failed: {0}")]
    CipherInitFailed(String),
}

/// Failures reported by a [`crate::secret_store::SecretStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretStoreError {
    #[error("secret store rejected write of '{label}': {reason}")]
    WriteFailed { label: String, reason: String },

    #[error("secret '{label}' not found")]
    NotFound { label: String },

    #[error("failed to delete secret '{label}': {reason}")]
    DeleteFailed { label: String, reason: String },
}

/// Failures of the metadata decoder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unexpected token {found:?} at byte {position}, expected {expected}")]
    UnexpectedToken {
        position: usize,
        expected: &'static str,
        found: char,
    },

    #[error("unexpected end of input at byte {position}, expected {expected}")]
    UnexpectedEndOfInput {
        position: usize,
        expected: &'static str,
    },
}

/// Top-level error for scribblefs operations.
#[derive(Debug, Error)]
pub enum ScribbleError {
    #[error("I/O error ({kind}) at {}: {source}", .path.display())]
    Io {
        kind: IoFailure,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    SecretStore(#[from] SecretStoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("file watcher error at {}: {source}", .path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

impl ScribbleError {
    pub fn io(kind: IoFailure, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            kind,
            path: path.into(),
            source,
        }
    }

    /// An I/O failure that did not come from the OS, e.g. a rejected name.
    pub fn invalid_argument(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::io(
            IoFailure::InvalidArgument,
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, msg.into()),
        )
    }

    pub fn encryption(msg: impl Into<String>) -> Self {
        Self::Crypto(CryptoError::EncryptionFailed(msg.into()))
    }

    pub fn decryption(msg: impl Into<String>) -> Self {
        Self::Crypto(CryptoError::DecryptionFailed(msg.into()))
    }

    pub fn io_kind(&self) -> Option<IoFailure> {
        match self {
            Self::Io { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_secret_not_found(&self) -> bool {
        matches!(self, Self::SecretStore(SecretStoreError::NotFound { .. }))
    }

    /// Legacy status code for this error.
    ///
    /// Bands: generic I/O `-1..=-10`, crypto `-11..=-15`, secret store
    /// `-20..=-24`. Codec and watcher failures have no band of their own and
    /// report the generic failure code `-1`.
    pub fn code(&self) -> i32 {
        match self {
            Self::Io { kind, .. } => kind.code(),
            Self::Crypto(e) => match e {
                CryptoError::KeyGenerationFailed(_) => -11,
                CryptoError::EncryptionFailed(_) => -12,
                CryptoError::DecryptionFailed(_) => -13,
                CryptoError::CipherInitFailed(_) => -14,
                CryptoError::InvalidKeyMaterial { .. } => -15,
            },
            Self::SecretStore(e) => match e {
                SecretStoreError::WriteFailed { .. } => -22,
                SecretStoreError::NotFound { .. } => -23,
                SecretStoreError::DeleteFailed { .. } => -24,
            },
            Self::Codec(_) | Self::Watch { .. } => -1,
        }
    }
}

/// Attach a path and failure kind to a raw `std::io::Result`.
pub trait IoResultExt<T> {
    fn at(self, path: &Path, fallback: IoFailure) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at(self, path: &Path, fallback: IoFailure) -> Result<T> {
        self.map_err(|e| ScribbleError::io(IoFailure::classify(&e, fallback), path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_keeps_specific_kinds() {
        let err = std::io::Error::from(std::io::ErrorKind::AlreadyExists);
        assert_eq!(
            IoFailure::classify(&err, IoFailure::WriteFailed),
            IoFailure::AlreadyExists
        );

        let err = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        assert_eq!(
            IoFailure::classify(&err, IoFailure::ReadFailed),
            IoFailure::ReadFailed
        );
    }

    #[test]
    fn test_codes_follow_bands() {
        let not_found = ScribbleError::from(SecretStoreError::NotFound {
            label: "x.key".into(),
        });
        assert_eq!(not_found.code(), -23);
        assert!(not_found.is_secret_not_found());

        assert_eq!(ScribbleError::decryption("bad padding").code(), -13);

        let exists = std::io::Result::<()>::Err(std::io::ErrorKind::AlreadyExists.into())
            .at(Path::new("/tmp/doc.sc"), IoFailure::WriteFailed)
            .unwrap_err();
        assert_eq!(exists.code(), -5);
        assert_eq!(exists.io_kind(), Some(IoFailure::AlreadyExists));
    }
}
