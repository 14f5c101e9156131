//! Error types for the controller library
//!
//! One taxonomy for every operation the controller performs; callers branch
//! on the variant, nothing in here aborts the process.

use std::path::PathBuf;

use thiserror::Error;

use crate::capability::Capability;

/// Result type alias using [`ControlError`]
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur during controller operations
#[derive(Error, Debug)]
pub enum ControlError {
    /// No usable backend was detected for a capability
    #[error("no backend available for {0}")]
    Unavailable(Capability),

    /// An external command reported failure; recorded state is unchanged
    #[error("{action} failed: {detail}")]
    OperationFailed { action: String, detail: String },

    /// An external command exceeded its deadline and was killed
    #[error("{action} timed out after {timeout_secs}s")]
    TimedOut { action: String, timeout_secs: u64 },

    /// A restore entry already exists for the interface
    #[error("pending restore recorded for {0}; restore it first or pass --force")]
    PendingRestoreBlocks(String),

    /// The persisted ledger cannot be parsed; it is never deleted here
    #[error("restore ledger {} is unreadable: {detail}", path.display())]
    LedgerCorrupt { path: PathBuf, detail: String },

    /// Another process updated the same entry between read and write
    #[error("restore entry for {0} was changed by another process")]
    ConcurrentModification(String),

    /// Interface does not exist
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),

    /// Invalid MAC address format or value
    #[error("invalid MAC address: {0}")]
    InvalidMac(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControlError {
    /// Check whether this is a missing-capability refusal rather than a failure
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ControlError::Unavailable(_))
    }

    /// Check whether retrying the whole read-modify-write could help
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ControlError::ConcurrentModification(_))
    }

    /// Create an operation failure with captured diagnostics
    #[must_use]
    pub fn operation_failed(action: impl Into<String>, detail: impl Into<String>) -> Self {
        ControlError::OperationFailed {
            action: action.into(),
            detail: detail.into(),
        }
    }
}
