//! Error types for the edgequake-ocr-notes library.
//!
//! Three layers reflect three distinct failure modes:
//!
//! * [`BackendError`]: raised at the OCR backend boundary and tagged once
//!   with an [`ErrorKind`]. Callers never re-inspect status codes; they only
//!   look at the kind.
//!
//! * [`ExtractError`]: **run-level**, returned from the orchestrator when a
//!   run cannot start or must abort. [`ExtractError::user_message`] decides
//!   what the user sees.
//!
//! * [`SkipReason`]: not an error at all. Skips are logged and counted,
//!   never propagated.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Message shown to the user for errors that are not user-facing.
pub const GENERIC_FAILURE_MESSAGE: &str = "Failed to extract text";

/// How a [`BackendError`] must be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Transient failure; retried with backoff.
    Retryable,
    /// The attachment cannot be processed by this backend; skip it.
    Skip,
    /// Unrecoverable for the whole run (credentials, misconfiguration, timeout).
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Retryable => f.write_str("retryable"),
            ErrorKind::Skip => f.write_str("skip"),
            ErrorKind::Fatal => f.write_str("fatal"),
        }
    }
}

/// A classified error from an OCR backend.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: ErrorKind,
    /// HTTP status (cloud backends) or process exit code (external command).
    pub status: Option<u16>,
    pub message: String,
}

impl BackendError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Retryable,
            status: None,
            message: message.into(),
        }
    }

    pub fn skip(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Skip,
            status: None,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Fatal,
            status: None,
            message: message.into(),
        }
    }

    /// Classify an HTTP failure: 408, 429 and 5xx are transient, anything
    /// else is fatal. Backends with more specific rules match those first.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        let e = if status == 408 || status == 429 || (500..600).contains(&status) {
            Self::retryable(message)
        } else {
            Self::fatal(message)
        };
        e.with_status(status)
    }

    /// Attach an HTTP status or exit code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Retryable
    }
}

/// All run-level errors returned by the library.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// A run was requested while another one is in progress.
    #[error("Text extraction is already running")]
    AlreadyRunning,

    /// A fatal backend error; the message is safe to show to the user.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A retryable backend error did not clear after all retries.
    #[error("Backend still failing after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: BackendError },

    /// Reading or writing a document failed.
    #[error("Failed to access '{path}': {source}")]
    Document {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The host's interrupt source (e.g. the Ctrl-C handler) failed.
    #[error("Failed to listen for interrupts: {0}")]
    Interrupt(#[source] std::io::Error),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// Whether the message of this error is meant to be shown verbatim.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            ExtractError::AlreadyRunning
                | ExtractError::InvalidConfig(_)
                | ExtractError::Backend(BackendError {
                    kind: ErrorKind::Fatal,
                    ..
                })
        )
    }

    /// The message reported through `on_error`.
    ///
    /// Internal detail never leaks: anything that is not user-facing is
    /// reported as [`GENERIC_FAILURE_MESSAGE`] (the caller logs the full error).
    pub fn user_message(&self) -> String {
        if self.is_user_facing() {
            self.to_string()
        } else {
            GENERIC_FAILURE_MESSAGE.to_string()
        }
    }
}

/// Why an attachment reference did not receive a callout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// The link target does not resolve to a file.
    FileNotFound,
    /// The backend does not handle this MIME type.
    UnsupportedType(String),
    /// The backend returned no text (or asked to skip this file).
    NoText,
    /// Canceled while the OCR call was in flight.
    Canceled,
    /// The embed is no longer at its recorded offsets.
    Moved,
    /// The note changed between discovery and insertion.
    DocumentChanged,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::FileNotFound => f.write_str("file not found"),
            SkipReason::UnsupportedType(mime) => write!(f, "unsupported MIME type ({mime})"),
            SkipReason::NoText => f.write_str("no text to extract"),
            SkipReason::Canceled => f.write_str("canceled"),
            SkipReason::Moved => f.write_str("embed moved during processing"),
            SkipReason::DocumentChanged => f.write_str("note changed during processing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_backend_error_is_user_facing() {
        let e = ExtractError::from(BackendError::fatal("Unauthorized, check your API key"));
        assert!(e.is_user_facing());
        assert_eq!(e.user_message(), "Unauthorized, check your API key");
    }

    #[test]
    fn exhausted_retries_use_generic_message() {
        let e = ExtractError::RetriesExhausted {
            attempts: 4,
            last: BackendError::retryable("HTTP 503").with_status(503),
        };
        assert!(!e.is_user_facing());
        assert_eq!(e.user_message(), GENERIC_FAILURE_MESSAGE);
        assert!(e.to_string().contains("4 attempts"));
    }

    #[test]
    fn internal_error_does_not_leak() {
        let e = ExtractError::Internal("task panicked at src/foo.rs:12".into());
        assert_eq!(e.user_message(), GENERIC_FAILURE_MESSAGE);
    }

    #[test]
    fn backend_error_carries_status() {
        let e = BackendError::skip("file type not supported").with_status(422);
        assert_eq!(e.kind, ErrorKind::Skip);
        assert_eq!(e.status, Some(422));
        assert!(!e.is_retryable());
    }

    #[test]
    fn http_status_classification() {
        assert!(BackendError::http(503, "unavailable").is_retryable());
        assert!(BackendError::http(429, "slow down").is_retryable());
        assert_eq!(BackendError::http(403, "forbidden").kind, ErrorKind::Fatal);
        assert_eq!(BackendError::http(500, "x").status, Some(500));
    }

    #[test]
    fn skip_reason_display() {
        assert_eq!(
            SkipReason::UnsupportedType("text/plain".into()).to_string(),
            "unsupported MIME type (text/plain)"
        );
        assert_eq!(SkipReason::Moved.to_string(), "embed moved during processing");
    }
}
