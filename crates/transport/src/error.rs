//! Error types for the transport layer.

use std::io;
use std::path::PathBuf;

/// Boxed cause carried by [`TransportError::NetworkFailure`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the transport.
///
/// Nothing is retried internally; every error reaches the immediate caller.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The socket path does not exist. Usually the daemon is not installed or
    /// not running.
    #[error("local API socket not found at {}", path.display())]
    SocketNotFound { path: PathBuf },

    /// The endpoint exists but nothing is listening on it.
    #[error("connection refused by {endpoint}")]
    ConnectionRefused { endpoint: String },

    /// Any other I/O or HTTP client failure.
    #[error("network failure talking to {endpoint}: {source}")]
    NetworkFailure {
        endpoint: String,
        #[source]
        source: BoxError,
    },

    /// The bytes received could not be understood as the expected HTTP response.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The transport variant is not available on this platform.
    #[error("{0} not supported on this platform")]
    Unimplemented(&'static str),

    /// A URL could not be built from the configured endpoint and request.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl TransportError {
    pub(crate) fn network(endpoint: impl ToString, source: impl Into<BoxError>) -> Self {
        TransportError::NetworkFailure {
            endpoint: endpoint.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        TransportError::MalformedResponse(detail.into())
    }
}

/// Errors raised while decoding an event stream.
///
/// Kept separate from [`TransportError`] so the codec does not need to know
/// which endpoint it is reading from.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// An I/O error occurred while reading.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stream did not follow HTTP framing.
    #[error("{0}")]
    Malformed(String),

    /// A single event line grew past the configured limit.
    #[error("event line of {size} bytes exceeds maximum allowed {max}")]
    LineTooLong {
        /// Bytes buffered without seeing a newline.
        size: usize,
        /// The maximum allowed line length.
        max: usize,
    },
}

impl CodecError {
    pub(crate) fn into_transport(self, endpoint: &str) -> TransportError {
        match self {
            CodecError::Io(e) => TransportError::network(endpoint, e),
            CodecError::Malformed(detail) => TransportError::MalformedResponse(detail),
            e @ CodecError::LineTooLong { .. } => TransportError::MalformedResponse(e.to_string()),
        }
    }
}

impl From<TransportError> for CodecError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::MalformedResponse(detail) => CodecError::Malformed(detail),
            other => CodecError::Malformed(other.to_string()),
        }
    }
}

/// Map a connection failure on a socket path to the matching error kind.
pub(crate) fn connect_error(path: &std::path::Path, e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::NotFound => TransportError::SocketNotFound {
            path: path.to_path_buf(),
        },
        io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused {
            endpoint: path.display().to_string(),
        },
        _ => TransportError::network(path.display(), e),
    }
}
