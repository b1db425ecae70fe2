//! Logging setup for the ehnet CLI
//!
//! This module provides:
//! - Session ID generation
//! - Redaction of session cookies before they reach a log line
//! - Timing spans
//! - Subscriber setup for console and file output

use crate::config::LoggingSettings;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{field, Span};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Identifier of this CLI invocation
static SESSION_ID: OnceLock<String> = OnceLock::new();

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter
    pub level: String,
    /// Output format: compact, full, json
    pub format: LogFormat,
    /// Use ANSI colors on the console
    pub console: bool,
    /// Write to this file instead of stderr
    pub file: Option<PathBuf>,
    /// Include thread IDs
    pub thread_ids: bool,
    /// Include file and line numbers
    pub source_location: bool,
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Full,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "compact" => Some(LogFormat::Compact),
            "full" => Some(LogFormat::Full),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Compact,
            console: true,
            file: None,
            thread_ids: false,
            source_location: false,
        }
    }
}

impl LoggingConfig {
    /// Create logging config from verbosity level
    pub fn from_verbosity(verbosity: u8) -> Self {
        let mut config = Self::default();
        match verbosity {
            0 => {}
            1 => config.level = "info".to_string(),
            2 => {
                config.level = "debug".to_string();
                config.source_location = true;
            }
            _ => {
                config.level = "trace".to_string();
                config.format = LogFormat::Full;
                config.source_location = true;
                config.thread_ids = true;
            }
        }
        config
    }

    /// Apply the `logging` section of the config file. The file level only
    /// counts when no -v flag was given.
    pub fn apply_settings(&mut self, settings: &LoggingSettings, verbosity: u8) {
        if verbosity == 0 {
            if let Some(level) = &settings.level {
                self.level = level.clone();
            }
        }
        if let Some(format) = settings.format.as_deref() {
            match LogFormat::parse(format) {
                Some(format) => self.format = format,
                None => eprintln!("Warning: invalid log format '{format}' in config, ignoring"),
            }
        }
        if settings.file.is_some() {
            self.file = settings.file.clone();
        }
    }

    /// Apply environment overrides
    pub fn merge_with_env(&mut self) {
        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            self.level = rust_log;
        }

        if let Ok(format) = std::env::var("EHNET_LOG_FORMAT") {
            match LogFormat::parse(&format) {
                Some(format) => self.format = format,
                None => eprintln!("Warning: invalid EHNET_LOG_FORMAT '{format}', ignoring"),
            }
        }

        if let Ok(file) = std::env::var("EHNET_LOG_FILE") {
            self.file = Some(PathBuf::from(file));
        }

        if let Ok(console) = std::env::var("EHNET_LOG_CONSOLE") {
            self.console = console.eq_ignore_ascii_case("true") || console == "1";
        }
    }
}

/// Initialize the global subscriber.
///
/// When a log file is configured the returned guard must be held until
/// exit, or buffered lines are lost.
pub fn init_logging(config: LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = create_env_filter(&config)?;

    let (writer, guard, ansi) = match &config.file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| Error::config(format!("invalid log file path {}", path.display())))?;
            std::fs::create_dir_all(&directory)?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard), false)
        }
        None => {
            use is_terminal::IsTerminal;
            let ansi = config.console && std::io::stderr().is_terminal();
            (BoxMakeWriter::new(std::io::stderr), None, ansi)
        }
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(config.thread_ids)
        .with_file(config.source_location)
        .with_line_number(config.source_location);

    let installed = match config.format {
        LogFormat::Compact => {
            tracing::subscriber::set_global_default(builder.with_ansi(ansi).compact().finish())
        }
        LogFormat::Full => tracing::subscriber::set_global_default(builder.with_ansi(ansi).finish()),
        LogFormat::Json => {
            tracing::subscriber::set_global_default(builder.with_ansi(false).json().finish())
        }
    };
    installed.map_err(|e| Error::other(format!("Failed to initialize logging: {}", e)))?;

    let session_id = SESSION_ID.get_or_init(generate_session_id);
    tracing::debug!(session_id = %session_id, config = ?config, "logging initialized");

    Ok(guard)
}

fn create_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    EnvFilter::try_new(&config.level)
        .map_err(|e| Error::config(format!("invalid log level '{}': {}", config.level, e)))
}

/// Generate a unique ID for this invocation
pub fn generate_session_id() -> String {
    format!("run_{}", Uuid::new_v4().simple())
}

pub fn current_session_id() -> Option<&'static str> {
    SESSION_ID.get().map(|s| s.as_str())
}

/// Create a span carrying the session ID and a duration slot
pub fn create_operation_span(operation: &str, details: Option<&str>) -> Span {
    tracing::info_span!(
        "operation",
        operation = operation,
        session_id = current_session_id().unwrap_or("unknown"),
        details = details.unwrap_or(""),
        duration_ms = field::Empty,
    )
}

/// Masking of session secrets
pub mod redaction {
    use regex::Regex;
    use std::sync::OnceLock;

    /// Cookies that identify or authenticate a session
    pub const SECRET_COOKIES: &[&str] = &[
        "ipb_member_id",
        "ipb_pass_hash",
        "ipb_session_id",
        "igneous",
        "sk",
        "hath_perks",
        "star",
    ];

    static COOKIE_PAIR: OnceLock<Option<Regex>> = OnceLock::new();

    fn cookie_pair() -> Option<&'static Regex> {
        COOKIE_PAIR
            .get_or_init(|| {
                let names = SECRET_COOKIES.join("|");
                Regex::new(&format!(r"\b({names})=([^;,\s&]+)")).ok()
            })
            .as_ref()
    }

    /// Mask the values of session cookies in `input`
    pub fn redact_sensitive(input: &str) -> String {
        match cookie_pair() {
            Some(regex) => regex.replace_all(input, "$1=***").into_owned(),
            None => input.to_string(),
        }
    }

    pub fn is_secret_cookie(name: &str) -> bool {
        SECRET_COOKIES.contains(&name)
    }

    /// Keep a short prefix so values can still be told apart
    pub fn mask_value(value: &str) -> String {
        let prefix: String = value.chars().take(4).collect();
        if prefix.len() == value.len() {
            "***".to_string()
        } else {
            format!("{prefix}***")
        }
    }
}

/// Performance timing utilities
pub mod timing {
    use std::time::Instant;
    use tracing::Span;

    /// A timer that logs its duration when dropped
    pub struct Timer {
        start: Instant,
        span: Span,
        operation: String,
    }

    impl Timer {
        pub fn new(operation: &str) -> Self {
            Self {
                start: Instant::now(),
                span: super::create_operation_span(operation, None),
                operation: operation.to_string(),
            }
        }

        pub fn with_details(operation: &str, details: &str) -> Self {
            Self {
                start: Instant::now(),
                span: super::create_operation_span(operation, Some(details)),
                operation: operation.to_string(),
            }
        }
    }

    impl Drop for Timer {
        fn drop(&mut self) {
            let duration = self.start.elapsed();
            self.span.record("duration_ms", duration.as_millis() as u64);
            tracing::debug!(
                operation = %self.operation,
                duration_ms = duration.as_millis() as u64,
                "operation completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redaction() {
        let input = "cookie: ipb_member_id=42; ipb_pass_hash=0123abcd; nw=1; igneous=deadbeef";
        let redacted = redaction::redact_sensitive(input);
        assert_eq!(
            redacted,
            "cookie: ipb_member_id=***; ipb_pass_hash=***; nw=1; igneous=***"
        );
    }

    #[test]
    fn test_redaction_leaves_lookalikes() {
        let input = "risk=low ask=1";
        assert_eq!(redaction::redact_sensitive(input), input);
    }

    #[test]
    fn test_mask_value() {
        assert_eq!(redaction::mask_value("0123456789"), "0123***");
        assert_eq!(redaction::mask_value("ab"), "***");
        assert!(redaction::is_secret_cookie("igneous"));
        assert!(!redaction::is_secret_cookie("nw"));
    }

    #[test]
    fn test_logging_config_from_verbosity() {
        let config = LoggingConfig::from_verbosity(0);
        assert_eq!(config.level, "warn");
        assert!(!config.source_location);

        let config = LoggingConfig::from_verbosity(2);
        assert_eq!(config.level, "debug");
        assert!(config.source_location);

        let config = LoggingConfig::from_verbosity(3);
        assert_eq!(config.level, "trace");
        assert_eq!(config.format, LogFormat::Full);
        assert!(config.thread_ids);
    }

    #[test]
    fn test_settings_level_only_without_flags() {
        let settings = LoggingSettings {
            level: Some("debug".to_string()),
            format: Some("json".to_string()),
            file: None,
        };

        let mut config = LoggingConfig::from_verbosity(0);
        config.apply_settings(&settings, 0);
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);

        let mut config = LoggingConfig::from_verbosity(1);
        config.apply_settings(&settings, 1);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_session_id_format() {
        let id = generate_session_id();
        assert!(id.starts_with("run_"));
        assert_eq!(id.len(), 4 + 32);
    }
}
