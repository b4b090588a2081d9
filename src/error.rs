//! Error types for the IPC data plane.
//!
//! `IpcError` is the crate-wide error enum. Using the `thiserror` crate, it
//! mirrors the failure taxonomy of the data plane:
//!
//! - **`Unavailable`**: a segment, semaphore, snapshot file or command pipe does
//!   not exist yet. Usually the producer has not started.
//! - **`Stale`**: data exists but is older than its freshness window.
//! - **`Corrupt`**: a frame failed magic, version or checksum validation.
//! - **`Timeout`**: the command channel saw no matching acknowledgment in time.
//!
//! All four are recoverable. The freshness cache absorbs the first three and
//! never surfaces them to callers; only the command channel returns a typed
//! timeout. The remaining variants wrap I/O, JSON and configuration failures
//! so `?` works across the crate.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::frame::DecodeError;

/// Convenience alias for results using the crate error type.
pub type IpcResult<T> = std::result::Result<T, IpcError>;

/// Primary error type for the IPC layer.
#[derive(Error, Debug)]
pub enum IpcError {
    /// A producer-owned resource does not exist (yet).
    ///
    /// **Recovery Strategy**: fall back to the next tier or the cached value;
    /// retry attaching later.
    #[error("{resource} unavailable at {path}: {reason}")]
    Unavailable {
        /// Kind of resource ("shared memory segment", "ack file", ...)
        resource: &'static str,
        /// Path or name that was probed
        path: PathBuf,
        /// Underlying cause
        reason: String,
    },

    /// Data exists but exceeded its freshness window.
    #[error("{what} is stale ({age_ms} ms old, window {max_age_ms} ms)")]
    Stale {
        /// Which data was stale
        what: String,
        /// Observed age in milliseconds
        age_ms: u64,
        /// Configured window in milliseconds
        max_age_ms: u64,
    },

    /// A binary frame was rejected by the codec.
    ///
    /// Corrupt frames are logged and dropped; they never update the cache.
    #[error("Corrupt frame: {0}")]
    Corrupt(#[from] DecodeError),

    /// No acknowledgment with the request's correlation id arrived in time.
    ///
    /// The request may still be processed by the producer; it is not retracted.
    #[error("Command {request_id} timed out after {waited:?}")]
    Timeout {
        /// Correlation id of the abandoned request
        request_id: String,
        /// How long the caller waited
        waited: Duration,
    },

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration values parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl From<figment::Error> for IpcError {
    fn from(err: figment::Error) -> Self {
        IpcError::Config(Box::new(err))
    }
}

impl IpcError {
    /// Build an [`IpcError::Unavailable`] from an I/O error on `path`.
    pub fn unavailable(
        resource: &'static str,
        path: impl Into<PathBuf>,
        reason: impl std::fmt::Display,
    ) -> Self {
        IpcError::Unavailable {
            resource,
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error is part of the recoverable data-plane taxonomy
    /// (unavailable, stale, corrupt, timeout) rather than an unexpected fault.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            IpcError::Unavailable { .. }
                | IpcError::Stale { .. }
                | IpcError::Corrupt(_)
                | IpcError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_recoverable() {
        let err = IpcError::Timeout {
            request_id: "abc".into(),
            waited: Duration::from_millis(100),
        };
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_io_is_not_recoverable() {
        let err: IpcError = std::io::Error::from(std::io::ErrorKind::PermissionDenied).into();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_decode_error_converts_to_corrupt() {
        let err: IpcError = DecodeError::BadMagic { found: 0xDEAD_BEEF }.into();
        assert!(matches!(err, IpcError::Corrupt(_)));
        assert!(err.to_string().contains("0xDEADBEEF"));
    }
}
