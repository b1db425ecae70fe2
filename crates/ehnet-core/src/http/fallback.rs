//! Domain-fronting fallback
//!
//! When the primary path has given up on an error that looks like DNS
//! poisoning or IP/SNI blocking, the request is sent once more straight to a
//! known IP of the origin, with the real hostname in the `Host` header. The
//! fallback is best effort: if it fails too, the caller sees the primary
//! error.

use crate::hosts::FrontingTable;
use crate::http::builder::RequestDescriptor;
use crate::http::error::EhError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fallback configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Enable fronted re-attempts
    pub enabled: bool,
    /// Include the built-in host table
    pub builtin_hosts: bool,
    /// User entries, consulted before the built-in table
    pub hosts: BTreeMap<String, Vec<IpAddr>>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            builtin_hosts: true,
            hosts: BTreeMap::new(),
        }
    }
}

impl FallbackConfig {
    /// Add a user host entry
    pub fn with_host(mut self, host: impl Into<String>, ips: Vec<IpAddr>) -> Self {
        self.hosts.insert(host.into(), ips);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some((host, _)) = self.hosts.iter().find(|(host, _)| host.trim().is_empty()) {
            return Err(format!("fronting host name cannot be empty ('{host}')"));
        }
        Ok(())
    }
}

/// What the selector will do with a failed request
#[derive(Debug, Clone)]
pub enum FallbackDecision {
    /// Fallback turned off by configuration
    Disabled,
    /// The error is not one fronting can help with
    NotEligible,
    /// No known address for the host
    NoAddress,
    /// Send this fronted request once
    Attempt(RequestDescriptor),
}

/// Decides on and runs the fronted re-attempt
#[derive(Clone)]
pub struct FallbackSelector {
    table: Arc<dyn FrontingTable>,
    enabled: bool,
}

impl std::fmt::Debug for FallbackSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackSelector")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl FallbackSelector {
    pub fn new(table: Arc<dyn FrontingTable>, enabled: bool) -> Self {
        Self { table, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Decide what to do after the primary path failed with `error`
    pub fn decide(&self, request: &RequestDescriptor, error: &EhError) -> FallbackDecision {
        if !self.enabled {
            return FallbackDecision::Disabled;
        }
        if !error.triggers_fallback() {
            return FallbackDecision::NotEligible;
        }
        let Some(host) = request.url().host_str() else {
            return FallbackDecision::NoAddress;
        };
        let Some(ip) = self.table.literal_ip_for(host) else {
            return FallbackDecision::NoAddress;
        };
        match request.fronted(ip) {
            Ok(fronted) => FallbackDecision::Attempt(fronted),
            Err(e) => {
                debug!(host, %ip, error = %e, "cannot derive fronted request");
                FallbackDecision::NoAddress
            }
        }
    }

    /// Try the fronted request once, or hand back `error`.
    ///
    /// On success the fallback response is returned as-is. On failure the
    /// original error is returned and the fallback error is only logged.
    pub async fn recover<T, F, Fut>(
        &self,
        request: &RequestDescriptor,
        error: EhError,
        send: F,
    ) -> Result<T, EhError>
    where
        F: FnOnce(RequestDescriptor) -> Fut,
        Fut: Future<Output = Result<T, EhError>>,
    {
        let fronted = match self.decide(request, &error) {
            FallbackDecision::Attempt(fronted) => fronted,
            decision => {
                debug!(url = %request.url(), ?decision, error = %error, "no fallback");
                return Err(error);
            }
        };

        info!(
            url = %request.url(),
            via = %fronted.url(),
            error = %error,
            "primary path failed, trying fronted request"
        );
        match send(fronted).await {
            Ok(response) => {
                info!(url = %request.url(), "fronted request succeeded");
                Ok(response)
            }
            Err(fallback_error) => {
                warn!(
                    url = %request.url(),
                    error = %fallback_error,
                    "fronted request failed, reporting primary error"
                );
                Err(error)
            }
        }
    }
}
