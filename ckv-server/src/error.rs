//! Server-side error types. Each converts into the shared `CkvError` so its
//! category can be reported uniformly.

use std::io;

use ckv_common::{CkvError, ErrorCategory};
use thiserror::Error;

use crate::protocol::RespError;

/// Failures owned by the transport: framing and socket I/O.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] RespError),
}

/// Failures raised by the profiling hooks. All of them are fatal.
#[derive(Debug, Error)]
pub enum DiagnosticsError {
    #[error("cpu profiling already in use")]
    AlreadyRunning,
    #[error("profile file: {0}")]
    Io(#[from] io::Error),
    #[error("profiler: {0}")]
    Profiler(#[from] pprof::Error),
    #[error("encode profile: {0}")]
    Encode(String),
}

/// Invalid startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl TransportError {
    pub const fn category(&self) -> ErrorCategory {
        ErrorCategory::Transport
    }
}

impl DiagnosticsError {
    pub const fn category(&self) -> ErrorCategory {
        ErrorCategory::Diagnostics
    }
}

impl From<TransportError> for CkvError {
    fn from(err: TransportError) -> Self {
        CkvError::Transport(err.to_string())
    }
}

impl From<DiagnosticsError> for CkvError {
    fn from(err: DiagnosticsError) -> Self {
        CkvError::Diagnostics(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_transport_category() {
        let err = TransportError::from(RespError::InvalidBulkLength);
        assert_eq!(err.category(), ErrorCategory::Transport);
        let err: CkvError = err.into();
        assert_eq!(err.category(), ErrorCategory::Transport);
        assert!(err.to_string().contains("invalid bulk length"));
    }

    #[test]
    fn diagnostics_errors_are_fatal() {
        assert!(DiagnosticsError::AlreadyRunning.category().is_fatal());
        let err: CkvError = DiagnosticsError::AlreadyRunning.into();
        assert!(err.category().is_fatal());
    }
}
