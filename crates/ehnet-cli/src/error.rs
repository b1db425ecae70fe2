//! Error types and handling for the CLI
//!
//! This module provides error types and utilities for handling
//! various failure modes in the CLI application.

use ehnet_core::http::EhError;
use std::io;
use std::path::PathBuf;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for CLI operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Error from ehnet-core outside a request
    #[error("Core error: {0}")]
    Core(#[from] ehnet_core::Error),

    /// A request failed
    #[error("{0}")]
    Transport(#[from] EhError),

    /// File not found
    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid argument combination or value
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// Generic error with context
    #[error("{message}")]
    Other { message: String },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an invalid arguments error
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::InvalidArgs(message.into())
    }

    /// Create a generic error with message
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io(_) => 1,
            Self::Core(_) => 2,
            Self::FileNotFound { .. } => 3,
            Self::Config(_) => 5,
            Self::InvalidArgs(_) => 6,
            Self::Transport(e) if e.is_soft_block() => 20,
            Self::Transport(EhError::InvalidSessionCookie) => 21,
            Self::Transport(EhError::HttpStatus { .. }) => 22,
            Self::Transport(EhError::ImageLimitReached) => 23,
            Self::Transport(EhError::Network { .. }) => 10,
            Self::Transport(EhError::Cancelled) => 130,
            Self::Transport(_) => 24,
            Self::Json(_) => 12,
            Self::Yaml(_) => 13,
            Self::TomlDe(_) | Self::TomlSer(_) => 14,
            Self::Other { .. } => 99,
        }
    }

    /// Check if this error should display usage help
    pub fn should_show_help(&self) -> bool {
        matches!(self, Self::InvalidArgs(_))
    }

    /// A suggestion the user can act on, if there is one
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Transport(e) => transport_hint(e),
            Self::Core(ehnet_core::Error::Transport(e)) => transport_hint(e),
            _ => None,
        }
    }
}

fn transport_hint(error: &EhError) -> Option<&'static str> {
    match error {
        EhError::SoftBlockSadPanda => {
            Some("Sign in again or check that the igneous cookie is valid for exhentai.org")
        }
        EhError::SoftBlockKokomade => Some("Slow down; the server throttled this client"),
        EhError::InvalidSessionCookie => {
            Some("The session cookies were rejected; import fresh cookies with 'ehnet cookies import'")
        }
        EhError::ImageLimitReached => Some("The image quota is used up; wait for it to reset"),
        _ => error.remedy().map(|r| r.hint()),
    }
}

/// Format an error for display to the user
pub fn format_error(error: &Error, use_color: bool) -> String {
    let mut message = if use_color {
        use colored::Colorize;
        format!("{} {}", "Error:".red().bold(), error)
    } else {
        format!("Error: {}", error)
    };

    if let Some(hint) = error.hint() {
        if use_color {
            use colored::Colorize;
            message.push_str(&format!("\n{} {}", "Hint:".yellow().bold(), hint));
        } else {
            message.push_str(&format!("\nHint: {}", hint));
        }
    }
    message
}
