//! Shared utilities for command handlers

use crate::config::Config;
use crate::error::{Error, Result};
use ehnet_core::{EhTransport, MemoryCookieJar};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The cookie jar of this invocation and where it is persisted
pub struct Session {
    jar: Arc<MemoryCookieJar>,
    path: Option<PathBuf>,
}

impl Session {
    /// Load the jar named by the config, or start an empty unsaved one
    pub fn open(config: &Config, no_cookies: bool) -> Result<Self> {
        if no_cookies {
            return Ok(Self::ephemeral());
        }
        let path = config.paths.cookie_jar_path();
        let jar = MemoryCookieJar::load(&path)?;
        Ok(Self {
            jar: Arc::new(jar),
            path: Some(path),
        })
    }

    /// A jar that is never written to disk
    pub fn ephemeral() -> Self {
        Self {
            jar: Arc::new(MemoryCookieJar::new()),
            path: None,
        }
    }

    pub fn jar(&self) -> &Arc<MemoryCookieJar> {
        &self.jar
    }

    pub fn is_persistent(&self) -> bool {
        self.path.is_some()
    }

    /// Build a transport that shares this session's jar
    pub fn transport(&self, config: &Config) -> Result<EhTransport> {
        Ok(EhTransport::new(&config.transport, self.jar.clone())?)
    }

    /// Write the jar back, if it came from a file
    pub fn save(&self) -> Result<()> {
        if let Some(path) = &self.path {
            self.jar.save(path)?;
        }
        Ok(())
    }

    /// Save the jar after a command. The command's own error comes first;
    /// a save failure behind it is only logged.
    pub fn finish<T>(&self, result: Result<T>) -> Result<T> {
        match (result, self.save()) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(save_error)) => Err(save_error),
            (Err(error), Ok(())) => Err(error),
            (Err(error), Err(save_error)) => {
                warn!(error = %save_error, "failed to save the cookie jar");
                Err(error)
            }
        }
    }
}

/// A token cancelled by Ctrl-C
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received, cancelling");
            trigger.cancel();
        }
    });
    token
}

/// Split `key=value` arguments into form fields
pub fn parse_fields(fields: &[String]) -> Result<Vec<(String, String)>> {
    fields
        .iter()
        .map(|field| match field.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(Error::invalid_args(format!(
                "form field '{field}' must look like KEY=VALUE"
            ))),
        })
        .collect()
}

/// A JSON argument given inline or as `@FILE`
pub fn read_json_arg(arg: &str) -> Result<serde_json::Value> {
    let content = match arg.strip_prefix('@') {
        Some(file) => {
            let path = Path::new(file);
            if !path.exists() {
                return Err(Error::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
            std::fs::read_to_string(path)?
        }
        None => arg.to_string(),
    };
    Ok(serde_json::from_str(&content)?)
}
