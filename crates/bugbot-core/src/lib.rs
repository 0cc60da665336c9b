//! BugBot Core - Data models, error taxonomy, scan store, and progress model
//!
//! This crate provides the foundational types shared by every BugBot service.
//!
//! # Modules
//!
//! - [`models`] - Scans, findings, validation jobs, pause requests
//! - [`store`] - The scan store contract and its in-memory implementation
//! - [`progress`] - Deterministic stage-to-progress mapping
//! - [`redaction`] - Secret and URL redaction for logs and error messages
//! - [`config`] - Environment-driven service configuration

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod config;
pub mod models;
pub mod progress;
pub mod redaction;
pub mod store;

pub use models::*;
pub use progress::*;
pub use redaction::*;
pub use store::*;

use thiserror::Error;

/// Platform-wide error taxonomy
///
/// Every service classifies its failures into one of these variants; the HTTP
/// layer maps each variant to a status code. Messages pass through redaction
/// before they are surfaced, so constructors here should receive already-safe
/// text or text that will be redacted at the edge.
#[derive(Error, Debug)]
pub enum Error {
    /// Request failed schema or semantic validation
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or invalid admin token on a protected route
    #[error("unauthorized")]
    Unauthorized,

    /// Unknown scan, job, monitor, or pause request id
    #[error("not found: {0}")]
    NotFound(String),

    /// Illegal state transition
    #[error("conflict: {0}")]
    Conflict(String),

    /// All LLM backends exhausted or no RPC provider is healthy
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A per-call or per-stage deadline elapsed
    #[error("timed out: {0}")]
    Timeout(String),

    /// A stage worker returned a fatal failure
    #[error("stage {stage} failed: {cause}")]
    StageFailure {
        /// Stage that failed
        stage: String,
        /// Cause reported by the worker
        cause: String,
    },

    /// Input rejected by a safety guard (PoC sanitization, live-write guard)
    #[error("unsafe input: {0}")]
    UnsafeInput(String),

    /// Cooperative cancellation
    #[error("cancelled")]
    Cancelled,

    /// Unclassified failure, with an id suitable for log correlation
    #[error("internal error [{id}]: {message}")]
    Internal {
        /// Correlation id present in the matching log record
        id: String,
        /// Redacted description
        message: String,
    },
}

impl Error {
    /// Build an [`Error::Internal`] with a fresh correlation id.
    pub fn internal(message: impl Into<String>) -> Self {
        let id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let message = message.into();
        tracing::error!(correlation_id = %id, "internal error: {}", message);
        Error::Internal { id, message }
    }

    /// Whether this error represents a terminal state for a scan.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::StageFailure { .. } | Error::Cancelled | Error::Timeout(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::internal(format!("io error: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::internal(format!("serialization error: {err}"))
    }
}

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;
