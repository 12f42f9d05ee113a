//! Error types for the file system host.

use thiserror::Error;

use crate::status::{
    NtStatus, STATUS_INVALID_DEVICE_REQUEST, STATUS_INVALID_HANDLE, STATUS_OBJECT_NAME_INVALID,
};

/// Errors surfaced by the [`FileSystemHost`](crate::FileSystemHost) lifecycle API.
#[derive(Error, Debug)]
pub enum HostError {
    /// A lifecycle step or native engine call returned a failure status.
    #[error("{operation} failed with status {status}")]
    Status {
        /// Step that failed.
        operation: &'static str,
        /// Status returned by that step.
        status: NtStatus,
    },

    /// The host already has a mounted volume.
    #[error("File system is already mounted")]
    AlreadyMounted,

    /// Volume configuration is frozen while a volume exists.
    #[error("Volume configuration is frozen while mounted")]
    ConfigurationFrozen,

    /// Path conversion error (UTF-16 <-> UTF-8).
    #[error("Path conversion error: {0}")]
    PathConversion(String),
}

impl HostError {
    /// Build a status error for a named step.
    ///
    /// # Arguments
    /// * `operation` - Step that failed
    /// * `status` - Native status it returned
    pub fn status(operation: &'static str, status: NtStatus) -> Self {
        HostError::Status { operation, status }
    }

    /// Native status equivalent of this error.
    ///
    /// # Returns
    /// The carried status, or a representative one for host-side errors.
    pub fn nt_status(&self) -> NtStatus {
        match self {
            HostError::Status { status, .. } => *status,
            HostError::AlreadyMounted | HostError::ConfigurationFrozen => {
                STATUS_INVALID_DEVICE_REQUEST
            }
            HostError::PathConversion(_) => STATUS_OBJECT_NAME_INVALID,
        }
    }
}

/// Errors from the per-open context registry.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// The native context has never been bound.
    #[error("File context is not bound")]
    Unbound,

    /// The native context already carries a binding.
    #[error("File context is already bound to key {0}")]
    AlreadyBound(u64),

    /// The binding was released (or never existed in this registry).
    #[error("File context key {0} is stale")]
    Stale(u64),

    /// The context was minted by a different volume.
    #[error("File context belongs to volume {found}, expected {expected}")]
    ForeignVolume {
        /// Registry tag of this volume.
        expected: u64,
        /// Tag carried by the context.
        found: u64,
    },
}

impl From<ContextError> for NtStatus {
    fn from(_: ContextError) -> Self {
        STATUS_INVALID_HANDLE
    }
}
