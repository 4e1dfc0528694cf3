//! Error types for the imgenhance library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`EnhanceError`]: **Fatal** for one call: the input file cannot be
//!   read, the configuration is invalid, a download or output write failed.
//!   Returned as `Err(EnhanceError)` from the top-level functions.
//!
//! * [`NormalizeError`]: **Recovered locally**: the image could not be
//!   decoded or did not fit the byte budget. The pipeline falls back to the
//!   original bytes and never shows these to the user.
//!
//! * [`SubmitError`]: **Surfaced**: the remote service rejected the job or
//!   returned nothing usable. Converted into an [`ErrorInfo`] and stored in
//!   the `Failed` state; the session stays ready for the next file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the imgenhance library.
#[derive(Debug, Error)]
pub enum EnhanceError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Reading the file failed after it was opened.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// HTTP URL was syntactically valid but the download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Result errors ─────────────────────────────────────────────────────
    /// The session has no ready result, or the result carries no reference
    /// that can be downloaded.
    #[error("No downloadable result: {reason}")]
    NoDownloadableResult { reason: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why the normalizer could not produce an image within budget.
///
/// Both variants are recovered by submitting the original bytes verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// The bytes are not an image the decoder understands, or the decoded
    /// raster could not be re-encoded.
    #[error("image could not be decoded: {detail}")]
    DecodeFailed { detail: String },

    /// Re-encoding succeeded but the result is larger than the budget.
    #[error("re-encoded image is {size} bytes, budget is {max} bytes")]
    SizeExceeded { size: usize, max: usize },
}

/// A failed submission or status lookup.
///
/// Every variant means "the job did not produce a result"; the session turns
/// it into an [`ErrorInfo`] and moves to `Failed`. Nothing is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The endpoint answered with a non-2xx status.
    #[error("Enhancement service returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The request never got a response (connection refused, TLS, reset…).
    #[error("Could not reach the enhancement service: {reason}")]
    Transport { reason: String },

    /// The opt-in request timeout elapsed.
    #[error("Enhancement request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// 2xx with an empty body, `{}`, `null`, `""` or `[]`.
    #[error("Enhancement service returned an empty result")]
    EmptyResult,

    /// The reply carried an explicit error field.
    #[error("Enhancement failed: {message}")]
    Remote { message: String },

    /// The body was not JSON.
    #[error("Enhancement service returned an unreadable reply: {detail}")]
    InvalidResponse { detail: String },

    /// The job was still running when polling stopped (or was disabled).
    #[error("Prediction '{id}' is still '{status}' and no result was received")]
    PendingUnresolved { id: String, status: String },
}

/// User-facing description of a failed job.
///
/// Transient: cleared as soon as a new file is selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Human-readable message; never empty.
    pub message: String,
    /// Underlying cause, when one is known.
    pub cause: Option<String>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            "Unknown error".to_string()
        } else {
            message
        };
        Self {
            message,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

impl From<&SubmitError> for ErrorInfo {
    fn from(err: &SubmitError) -> Self {
        let info = ErrorInfo::new(err.to_string());
        match err {
            SubmitError::Status { status, .. } => info.with_cause(format!("HTTP {status}")),
            SubmitError::Transport { reason } => info.with_cause(reason.clone()),
            SubmitError::InvalidResponse { detail } => info.with_cause(detail.clone()),
            _ => info,
        }
    }
}

impl From<SubmitError> for ErrorInfo {
    fn from(err: SubmitError) -> Self {
        ErrorInfo::from(&err)
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{} ({})", self.message, cause),
            None => f.write_str(&self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_exceeded_display() {
        let e = NormalizeError::SizeExceeded {
            size: 600_000,
            max: 512_000,
        };
        let msg = e.to_string();
        assert!(msg.contains("600000"), "got: {msg}");
        assert!(msg.contains("512000"), "got: {msg}");
    }

    #[test]
    fn status_error_keeps_server_message() {
        let e = SubmitError::Status {
            status: 500,
            message: "model crashed".into(),
        };
        assert!(e.to_string().contains("500"));
        assert!(e.to_string().contains("model crashed"));
    }

    #[test]
    fn error_info_from_status_has_cause() {
        let info = ErrorInfo::from(SubmitError::Status {
            status: 502,
            message: "Bad Gateway".into(),
        });
        assert!(info.message.contains("Bad Gateway"));
        assert_eq!(info.cause.as_deref(), Some("HTTP 502"));
    }

    #[test]
    fn error_info_never_empty() {
        let info = ErrorInfo::new("   ");
        assert_eq!(info.message, "Unknown error");
        assert!(!ErrorInfo::from(SubmitError::EmptyResult).message.is_empty());
    }

    #[test]
    fn error_info_display_includes_cause() {
        let info = ErrorInfo::new("upload failed").with_cause("connection reset");
        assert_eq!(info.to_string(), "upload failed (connection reset)");
    }
}
