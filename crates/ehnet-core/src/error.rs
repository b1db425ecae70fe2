//! Error types for the ehnet core library
//!
//! Library-level failures (configuration, IO, serialization, client
//! construction) live here. Failures of an individual request are reported
//! through [`EhError`](crate::http::EhError), which is the closed taxonomy
//! callers match on.

use crate::http::tls::TlsConfigError;
use crate::http::EhError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for ehnet library operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Building a transport tier (HTTP client or TLS config) failed
    #[error("Failed to build {tier} client: {message}")]
    ClientBuild {
        tier: String,
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Loading a certificate file failed
    #[error("Certificate error in {}: {message}", path.display())]
    Certificate { path: PathBuf, message: String },

    /// JSON parsing and serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    /// IO errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// A request failed
    #[error(transparent)]
    Transport(#[from] EhError),
}

/// Convenience type alias for Results using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error without a source
    pub fn config(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
            source: None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Error::Json {
            message: source.to_string(),
            source,
        }
    }
}

impl From<TlsConfigError> for Error {
    fn from(err: TlsConfigError) -> Self {
        match err {
            TlsConfigError::CaCertFileNotFound(path) => Error::Certificate {
                path,
                message: "file not found".to_string(),
            },
            TlsConfigError::InvalidPem { path, message } => Error::Certificate { path, message },
            other => Error::Configuration {
                message: other.to_string(),
                source: Some(other.into()),
            },
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::Io {
            message: source.to_string(),
            source,
        }
    }
}
