//! Pluggable handling of non-fatal conditions.
//!
//! Archive operations report conditions that do not fail the operation
//! (a secret that was already gone, a temp file that could not be removed)
//! through an injected [`WarningHandler`]. The default does nothing.

use std::fmt;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// Deleting an archive found its key material already gone.
    SecretAlreadyAbsent { label: String },
    /// A plaintext temp file could not be removed.
    TempCleanupFailed { path: PathBuf, reason: String },
    /// A session was dropped without `close()`; its changes were discarded.
    SessionNotClosed { target: PathBuf },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::SecretAlreadyAbsent { label } => {
                write!(f, "key material for '{}' was already absent", label)
            }
            Warning::TempCleanupFailed { path, reason } => {
                write!(f, "failed to remove temp file {}: {}", path.display(), reason)
            }
            Warning::SessionNotClosed { target } => {
                write!(f, "session on {} dropped without close; changes discarded", target.display())
            }
        }
    }
}

pub trait WarningHandler: Send + Sync {
    fn on_warning(&self, warning: &Warning);
}

/// Ignores every warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWarnings;

impl WarningHandler for NoopWarnings {
    fn on_warning(&self, _warning: &Warning) {}
}

/// Forwards warnings to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWarnings;

impl WarningHandler for LogWarnings {
    fn on_warning(&self, warning: &Warning) {
        warn!(%warning, "archive warning");
    }
}
