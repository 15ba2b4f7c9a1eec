//! Error types for a3s-ota

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Coarse failure classes reported by an update call.
///
/// Every [`UpdateError`] collapses to exactly one kind via
/// [`UpdateError::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    InsecureUrl,
    TransportFailure,
    MalformedResponse,
    BadStatus,
    IncompleteOffer,
    ChecksumMismatch,
    LocalIoFailure,
    ApplyFailure,
    ReportFailure,
}

/// Stage at which streaming a file through the digest failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestStage {
    Open,
    Update,
}

impl fmt::Display for DigestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Update => f.write_str("update"),
        }
    }
}

/// Errors that can occur during an update check-in
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Missing or empty required parameter
    #[error("Bad update args: {0}")]
    InvalidArgument(String),

    /// A formatted field does not fit its staging buffer
    #[error("{what} is too long ({len} bytes, limit {limit})")]
    TooLong {
        what: &'static str,
        len: usize,
        limit: usize,
    },

    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// URL does not use the https scheme
    #[error("Insecure URL (HTTPS required): {0}")]
    InsecureUrl(String),

    /// Socket, name resolution, TLS or read failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request could not be written in full
    #[error("Cannot send request: {0}")]
    TransportWrite(String),

    /// Unparseable status line or missing header boundary
    #[error("Bad response: {0}")]
    MalformedResponse(String),

    /// Any status other than 200
    #[error("Bad response status {status}")]
    BadStatus { status: u16, head: String },

    #[error("Missing Content-Length")]
    MissingContentLength,

    #[error("Invalid Content-Length: {0}")]
    InvalidContentLength(String),

    /// Update offer missing one or more required fields
    #[error("Incomplete update response: missing {0}")]
    IncompleteOffer(String),

    #[error("Checksum does not match\n{actual} vs\n{expected}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Cannot {stage} {} for checksum: {source}", .path.display())]
    Digest {
        stage: DigestStage,
        path: PathBuf,
        source: std::io::Error,
    },

    /// Local file operation failed
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    /// Destination is a symlink, FIFO, device or directory
    #[error("Refusing to write to non-regular file {}", .0.display())]
    NotRegularFile(PathBuf),

    /// Apply step could not run or exited non-zero
    #[error("Update step failed with status {0}")]
    ApplyFailed(i32),

    /// Status report could not be delivered
    #[error("Cannot post update-report: {0}")]
    Report(Box<UpdateError>),
}

impl UpdateError {
    /// Wrap an I/O error from a local file operation
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Failure class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) | Self::TooLong { .. } | Self::Config(_) => {
                ErrorKind::InvalidArgument
            }
            Self::InsecureUrl(_) => ErrorKind::InsecureUrl,
            Self::Transport(_) | Self::TransportWrite(_) => ErrorKind::TransportFailure,
            Self::MalformedResponse(_)
            | Self::MissingContentLength
            | Self::InvalidContentLength(_) => ErrorKind::MalformedResponse,
            Self::BadStatus { .. } => ErrorKind::BadStatus,
            Self::IncompleteOffer(_) => ErrorKind::IncompleteOffer,
            Self::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Self::Digest { .. } | Self::Io { .. } | Self::NotRegularFile(_) => {
                ErrorKind::LocalIoFailure
            }
            Self::ApplyFailed(_) => ErrorKind::ApplyFailure,
            Self::Report(_) => ErrorKind::ReportFailure,
        }
    }
}

impl From<toml::de::Error> for UpdateError {
    fn from(e: toml::de::Error) -> Self {
        UpdateError::Config(e.to_string())
    }
}

/// Result type alias for update operations
pub type Result<T> = std::result::Result<T, UpdateError>;
