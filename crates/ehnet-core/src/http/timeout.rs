//! Connect and request timeouts for the transport tiers
//!
//! Each tier gets its own pair. The fronted tiers wait longer because a
//! direct connection to a literal IP is often slower to establish than the
//! primary path.

use crate::http::tier::TierId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeout configuration for one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Connection timeout - time to establish a connection
    pub connect_timeout: Duration,
    /// Request timeout - total time for the exchange, body included
    pub request_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self::primary()
    }
}

impl TimeoutConfig {
    /// Create a new timeout configuration
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }

    /// Page and API requests over the primary path
    pub fn primary() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(30))
    }

    /// Image requests over the primary path
    pub fn primary_no_redirect() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(20))
    }

    /// Fronted page and API requests
    pub fn fallback() -> Self {
        Self::new(Duration::from_secs(15), Duration::from_secs(60))
    }

    /// Fronted image requests
    pub fn fallback_no_redirect() -> Self {
        Self::new(Duration::from_secs(15), Duration::from_secs(30))
    }

    /// Validate timeout configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout cannot be zero".to_string());
        }
        if self.request_timeout.is_zero() {
            return Err("Request timeout cannot be zero".to_string());
        }
        if self.request_timeout < self.connect_timeout {
            return Err("Request timeout should be >= connect timeout".to_string());
        }
        Ok(())
    }
}

/// Timeouts for all four tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierTimeouts {
    pub primary: TimeoutConfig,
    pub primary_no_redirect: TimeoutConfig,
    pub fallback: TimeoutConfig,
    pub fallback_no_redirect: TimeoutConfig,
}

impl Default for TierTimeouts {
    fn default() -> Self {
        Self {
            primary: TimeoutConfig::primary(),
            primary_no_redirect: TimeoutConfig::primary_no_redirect(),
            fallback: TimeoutConfig::fallback(),
            fallback_no_redirect: TimeoutConfig::fallback_no_redirect(),
        }
    }
}

impl TierTimeouts {
    /// The same timeouts on every tier
    pub fn uniform(config: TimeoutConfig) -> Self {
        Self {
            primary: config,
            primary_no_redirect: config,
            fallback: config,
            fallback_no_redirect: config,
        }
    }

    /// Timeouts for a tier
    pub fn for_tier(&self, tier: TierId) -> TimeoutConfig {
        match tier {
            TierId::Primary => self.primary,
            TierId::PrimaryNoRedirect => self.primary_no_redirect,
            TierId::Fallback => self.fallback,
            TierId::FallbackNoRedirect => self.fallback_no_redirect,
        }
    }

    /// Validate every tier
    pub fn validate(&self) -> Result<(), String> {
        for tier in TierId::ALL {
            self.for_tier(tier)
                .validate()
                .map_err(|e| format!("{tier}: {e}"))?;
        }
        Ok(())
    }
}
