//! Error types for dataset retrieval.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while retrieving data products.
#[derive(Debug, Error)]
pub enum RetrieveError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, ...)
    #[error("network error retrieving {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout retrieving {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} retrieving {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429/503 responses).
        retry_after: Option<String>,
    },

    /// The archive refused access to a proprietary file (401/403).
    #[error("access denied to {url} (HTTP {status}); log in with an entitled account")]
    AccessDenied {
        /// The URL that was refused.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The response carried no usable Content-Disposition filename.
    #[error("unable to determine a filename for {url}")]
    MissingFilename {
        /// The URL whose response lacked a filename.
        url: String,
    },

    /// File system error during retrieval (create file, write, rename, ...)
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// An unsupported calibration scope was requested.
    #[error("invalid calibration scope '{value}': expected 'raw' or 'processed'")]
    InvalidCalibScope {
        /// The rejected input.
        value: String,
    },

    /// The calibration-association service answered in an unexpected way.
    #[error("calibration association lookup failed: {reason}")]
    CalSelector {
        /// What went wrong.
        reason: String,
    },
}

impl RetrieveError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16, retry_after: Option<String>) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates an access-denied error.
    pub fn access_denied(url: impl Into<String>, status: u16) -> Self {
        Self::AccessDenied {
            url: url.into(),
            status,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a CalSelector error.
    pub fn calselector(reason: impl Into<String>) -> Self {
        Self::CalSelector {
            reason: reason.into(),
        }
    }
}
