//! Output formatting and writing utilities
//!
//! Results go to stdout in the selected format. Status messages (info,
//! success, warnings) go to a separate stream, stderr by default, so that a
//! fetched body can be piped.

use crate::cli::OutputFormat;
use crate::error::Result;
use crate::logging::redaction;
use colored::Colorize;
use ehnet_core::RawResponse;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{self, IsTerminal, Write};
use std::time::Duration;
use tracing::trace;

/// Serializable view of a response. Session cookie values in headers are
/// masked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseSummary {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body_bytes: usize,
    /// The body as text, or `None` when it is not UTF-8
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl ResponseSummary {
    pub fn from_response(url: &str, response: &RawResponse, include_body: bool) -> Self {
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    redaction::redact_sensitive(&String::from_utf8_lossy(value.as_bytes())),
                )
            })
            .collect();
        let body = if include_body {
            std::str::from_utf8(response.body()).ok().map(str::to_string)
        } else {
            None
        };
        Self {
            url: url.to_string(),
            status: response.status().as_u16(),
            headers,
            body_bytes: response.body().len(),
            body,
        }
    }
}

/// Formatting of values and responses per output format
pub trait OutputFormatter {
    /// Format a serializable value
    fn format<T: Serialize>(&self, value: &T) -> Result<String>;

    /// Format a response; `Human` renders a status line and headers only
    fn format_response(&self, summary: &ResponseSummary) -> Result<String>;
}

impl OutputFormatter for OutputFormat {
    fn format<T: Serialize>(&self, value: &T) -> Result<String> {
        match self {
            OutputFormat::Json => Ok(serde_json::to_string(value)?),
            OutputFormat::JsonPretty | OutputFormat::Human => Ok(serde_json::to_string_pretty(value)?),
            OutputFormat::Yaml => Ok(serde_yaml::to_string(value)?),
        }
    }

    fn format_response(&self, summary: &ResponseSummary) -> Result<String> {
        match self {
            OutputFormat::Human => Ok(format_response_head_human(summary)),
            _ => self.format(summary),
        }
    }
}

fn format_response_head_human(summary: &ResponseSummary) -> String {
    let reason = canonical_reason(summary.status);
    let mut output = format!("HTTP {} {}\n", summary.status, reason);
    for (name, value) in &summary.headers {
        output.push_str(&format!("{}: {}\n", name, value));
    }
    output
}

fn canonical_reason(status: u16) -> &'static str {
    ehnet_core::http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
}

/// Output writer that handles different output formats and colors
pub struct OutputWriter {
    format: OutputFormat,
    use_color: bool,
    show_progress: bool,
    quiet: bool,
    writer: Box<dyn Write>,
    messages: Box<dyn Write>,
}

impl OutputWriter {
    /// Create a new output writer on stdout and stderr
    pub fn new(format: OutputFormat, use_color: bool, quiet: bool) -> Self {
        Self {
            format,
            use_color,
            show_progress: !quiet && io::stderr().is_terminal(),
            quiet,
            writer: Box::new(io::stdout()),
            messages: Box::new(io::stderr()),
        }
    }

    /// Create an output writer with custom streams
    pub fn with_writers(
        format: OutputFormat,
        use_color: bool,
        quiet: bool,
        writer: Box<dyn Write>,
        messages: Box<dyn Write>,
    ) -> Self {
        Self {
            format,
            use_color,
            show_progress: false,
            quiet,
            writer,
            messages,
        }
    }

    pub fn is_human(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Write raw output
    pub fn write(&mut self, content: &str) -> Result<()> {
        write!(self.writer, "{}", content)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Write a line of output
    pub fn writeln(&mut self, content: &str) -> Result<()> {
        writeln!(self.writer, "{}", content)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Write bytes unchanged, for bodies that may not be text
    pub fn write_bytes(&mut self, content: &[u8]) -> Result<()> {
        self.writer.write_all(content)?;
        self.writer.flush()?;
        Ok(())
    }

    fn message(&mut self, content: &str) -> Result<()> {
        writeln!(self.messages, "{}", content)?;
        self.messages.flush()?;
        Ok(())
    }

    /// Write an info message
    pub fn info(&mut self, message: &str) -> Result<()> {
        if self.quiet || !self.is_human() {
            return Ok(());
        }
        if self.use_color {
            self.message(&format!("{} {}", "ℹ".blue(), message))
        } else {
            self.message(&format!("INFO: {}", message))
        }
    }

    /// Write a success message
    pub fn success(&mut self, message: &str) -> Result<()> {
        if self.quiet || !self.is_human() {
            return Ok(());
        }
        if self.use_color {
            self.message(&message.green().to_string())
        } else {
            self.message(message)
        }
    }

    /// Write a warning message
    pub fn warning(&mut self, message: &str) -> Result<()> {
        if !self.is_human() {
            return Ok(());
        }
        if self.use_color {
            self.message(&message.yellow().to_string())
        } else {
            self.message(&format!("WARNING: {}", message))
        }
    }

    /// Write a section header
    pub fn section(&mut self, title: &str) -> Result<()> {
        if self.quiet || !self.is_human() {
            return Ok(());
        }
        self.writeln("")?;
        if self.use_color {
            self.writeln(&format!("═══ {} ═══", title).bright_blue().to_string())
        } else {
            self.writeln(&format!("=== {} ===", title))
        }
    }

    /// Write data in the configured format
    pub fn data<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let formatted = self.format.format(value)?;
        trace!(bytes = formatted.len(), "writing data");
        self.data_string(formatted)
    }

    /// Write a response. In human format the head is printed only when
    /// `include_headers` is set, followed by the raw body.
    pub fn response(
        &mut self,
        url: &str,
        response: &RawResponse,
        include_headers: bool,
    ) -> Result<()> {
        if self.is_human() {
            if include_headers {
                let summary = ResponseSummary::from_response(url, response, false);
                let head = self.format.format_response(&summary)?;
                self.writeln(&head)?;
            }
            return self.write_bytes(response.body());
        }
        let summary = ResponseSummary::from_response(url, response, true);
        let formatted = self.format.format_response(&summary)?;
        self.data_string(formatted)
    }

    fn data_string(&mut self, formatted: String) -> Result<()> {
        if self.format == OutputFormat::Yaml {
            self.write(&formatted)
        } else {
            self.writeln(&formatted)
        }
    }

    /// Create a spinner for indeterminate progress
    pub fn spinner(&self, message: &str) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(default_spinner_style());
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    }

    /// Write a table (for human format)
    pub fn table(&mut self, headers: &[&str], rows: Vec<Vec<String>>) -> Result<()> {
        if self.format != OutputFormat::Human {
            return Ok(());
        }

        let mut widths = headers.iter().map(|h| h.chars().count()).collect::<Vec<_>>();
        for row in &rows {
            for (i, cell) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(cell.chars().count());
                }
            }
        }

        let header_row = headers
            .iter()
            .enumerate()
            .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
            .collect::<Vec<_>>()
            .join(" │ ");
        if self.use_color {
            self.writeln(header_row.trim_end().bold().to_string().as_str())?;
        } else {
            self.writeln(header_row.trim_end())?;
        }

        let separator = widths
            .iter()
            .map(|w| "─".repeat(*w))
            .collect::<Vec<_>>()
            .join("─┼─");
        self.writeln(&separator)?;

        for row in rows {
            let row_str = row
                .iter()
                .enumerate()
                .map(|(i, cell)| match widths.get(i) {
                    Some(width) => format!("{:width$}", cell, width = *width),
                    None => cell.clone(),
                })
                .collect::<Vec<_>>()
                .join(" │ ");
            self.writeln(row_str.trim_end())?;
        }

        Ok(())
    }
}

/// Spinner style used while a request is in flight
pub fn default_spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
