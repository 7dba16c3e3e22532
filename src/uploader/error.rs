//! Error types for the upload core

use std::time::Duration;
use thiserror::Error;

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Failures from the gzip step. Each maps a distinct compressor condition.
#[derive(Debug, Error)]
pub enum CompressError {
    #[error("compression failed: not enough memory")]
    OutOfMemory,

    #[error("compression failed: output buffer too small")]
    OutputBuffer,

    #[error("compression failed: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for CompressError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::OutOfMemory => CompressError::OutOfMemory,
            std::io::ErrorKind::WriteZero => CompressError::OutputBuffer,
            _ => CompressError::Io(err),
        }
    }
}

/// Upload error types
#[derive(Debug, Error)]
pub enum UploadError {
    /// Local file missing, or a seek/read failed. Fatal for the file.
    #[error("failed to read local file: {0}")]
    LocalIo(#[from] std::io::Error),

    /// Compressor returned a non-success condition. Chunk-level, retried.
    #[error(transparent)]
    Compress(#[from] CompressError),

    /// Part upload answered with a non-2xx status
    #[error("part upload failed with HTTP status {status}")]
    HttpStatus { status: u16 },

    /// Part upload failed below the HTTP layer
    #[error("part upload transport error: {0}")]
    HttpTransport(#[from] reqwest::Error),

    /// An RPC against the platform failed after backoff was exhausted
    #[error("remote call failed: {0}")]
    Rpc(#[from] depot_api::ApiError),

    /// More than one remote object matches the resume signature
    #[error("{count} resumable targets match the local file signature")]
    ResumeAmbiguous { count: usize },

    /// The remote reported a state that rules out uploading, e.g. a resume
    /// target that is no longer open when chunks are created
    #[error("remote file {file_id} is in state \"{state}\", expected \"open\"")]
    RemoteNotOpen { file_id: String, state: String },

    /// The remote rejected closure (e.g. undersized non-terminal parts)
    #[error("remote file failed to close: {0}")]
    CloseFailed(String),

    /// The remote never reached the closed state within the poll budget
    #[error("remote file did not reach \"closed\" within {waited:?}")]
    CloseTimeout { waited: Duration },

    /// The dispatcher queue was closed while chunks were still being
    /// produced; only happens if shutdown races file setup
    #[error("upload queue closed")]
    QueueClosed,
}

impl UploadError {
    /// Whether the dispatcher should re-enqueue the chunk while tries
    /// remain. Transport failures, throttling and server-side statuses
    /// qualify; client-side statuses other than 408/429 do not, and local
    /// I/O failures never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::HttpTransport(_) => true,
            UploadError::HttpStatus { status } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            UploadError::Compress(_) => true,
            UploadError::LocalIo(_) => false,
            UploadError::Rpc(e) => e.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_retry_classes() {
        assert!(UploadError::HttpStatus { status: 500 }.is_retryable());
        assert!(UploadError::HttpStatus { status: 503 }.is_retryable());
        assert!(UploadError::HttpStatus { status: 408 }.is_retryable());
        assert!(UploadError::HttpStatus { status: 429 }.is_retryable());
        assert!(!UploadError::HttpStatus { status: 403 }.is_retryable());
        assert!(!UploadError::HttpStatus { status: 404 }.is_retryable());
    }

    #[test]
    fn local_io_is_terminal() {
        let err = UploadError::LocalIo(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn compress_errors_classify_from_io() {
        let err = CompressError::from(std::io::Error::new(
            std::io::ErrorKind::OutOfMemory,
            "oom",
        ));
        assert!(matches!(err, CompressError::OutOfMemory));
        let err = CompressError::from(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "short",
        ));
        assert!(matches!(err, CompressError::OutputBuffer));
    }
}
