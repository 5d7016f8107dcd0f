//! The crate-wide error taxonomy. These are kinds, not wrapped foreign
//! errors: the HTTP layer needs exactly one type to map to status codes,
//! and the pipeline needs to tell a tolerated builder failure apart from
//! a fatal git failure.

use md5::{Digest, Md5};
use thiserror::Error;

use crate::correlation::CorrelationId;

/// A required external program failed to start, exited in a way the
/// caller did not tolerate, or was cancelled mid-run.
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct SubprocessError {
    pub message: String,
    pub exit_code: Option<i32>,
    pub cancelled: bool,
}

impl SubprocessError {
    pub fn new(message: impl Into<String>, exit_code: Option<i32>) -> Self {
        SubprocessError {
            message: message.into(),
            exit_code,
            cancelled: false,
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        SubprocessError {
            message: message.into(),
            exit_code: None,
            cancelled: true,
        }
    }
}

/// Raised when a Publication Transaction exhausts its push retry budget.
#[derive(Debug, Error, Clone)]
#[error("publication retry budget exhausted: {message}")]
pub struct DeployError {
    pub message: String,
}

impl DeployError {
    pub fn new(message: impl Into<String>) -> Self {
        DeployError { message: message.into() }
    }
}

/// The crate-wide error type. `ClientInput` maps to an HTTP 400 with a
/// structured envelope; everything else maps to 500 if raised before a
/// background task is spawned, or to an `error`-state status report
/// otherwise.
#[derive(Debug, Error)]
pub enum DockyardError {
    #[error("{0}")]
    ClientInput(String),

    #[error(transparent)]
    Subprocess(#[from] SubprocessError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error("{0}")]
    Internal(String),
}

impl DockyardError {
    /// The error class name as the original service's error envelopes use
    /// it: the `error_type` field posted back to the code-forge and to the
    /// webhook caller.
    pub fn class_name(&self) -> &'static str {
        match self {
            DockyardError::ClientInput(_) => "ClientError",
            DockyardError::Subprocess(_) => "SubprocessError",
            DockyardError::Deploy(_) => "DeployError",
            DockyardError::Internal(_) => "InternalError",
        }
    }

    /// A short, stable, non-secret tag a human can grep logs for. The
    /// original service hashes a formatted traceback with MD5; Rust has no
    /// equivalent string, so this hashes the error's `Debug` rendering
    /// together with the correlation id live when it was raised.
    pub fn trace_tag(&self, correlation: &CorrelationId) -> String {
        let mut hasher = Md5::new();
        hasher.update(format!("{:?}", self));
        hasher.update(correlation.as_str());
        format!("{:x}", hasher.finalize())
    }
}
