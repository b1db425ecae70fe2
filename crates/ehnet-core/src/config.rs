//! Transport configuration
//!
//! [`TransportConfig`] gathers every knob of the transport in one serde
//! value so that it can be loaded from a file by the CLI or built in code.
//! Defaults match the behaviour of the stock client.

use crate::error::{Error, Result};
use crate::hosts::StaticFrontingTable;
use crate::http::fallback::FallbackConfig;
use crate::http::retry::RetryPolicy;
use crate::http::timeout::TierTimeouts;
use crate::http::tls::TlsSettings;
use serde::{Deserialize, Serialize};

/// Complete transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub retry: RetryPolicy,
    pub timeouts: TierTimeouts,
    pub fronting: FallbackConfig,
    pub tls: TlsSettings,
    /// Honour `HTTP(S)_PROXY` on the primary tiers
    pub use_system_proxy: bool,
    /// Replaces the default browser User-Agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeouts: TierTimeouts::default(),
            fronting: FallbackConfig::default(),
            tls: TlsSettings::default(),
            use_system_proxy: true,
            user_agent: None,
        }
    }
}

impl TransportConfig {
    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every section, reporting the first problem
    pub fn validate(&self) -> Result<()> {
        self.retry
            .validate()
            .map_err(|e| Error::config(format!("retry: {e}")))?;
        self.timeouts
            .validate()
            .map_err(|e| Error::config(format!("timeouts: {e}")))?;
        self.fronting
            .validate()
            .map_err(|e| Error::config(format!("fronting: {e}")))?;
        self.tls.validate()?;
        if let Some(ua) = &self.user_agent {
            if ua.trim().is_empty() {
                return Err(Error::config("user_agent cannot be empty"));
            }
        }
        Ok(())
    }

    /// The fronting table described by the `fronting` section
    pub fn fronting_table(&self) -> StaticFrontingTable {
        let table = if self.fronting.builtin_hosts {
            StaticFrontingTable::with_builtin()
        } else {
            StaticFrontingTable::empty()
        };
        table.with_user_hosts(&self.fronting.hosts)
    }
}
