//! Transport tiers
//!
//! A tier is one configured HTTP client. The transport owns four: a
//! redirect-following and a no-redirect client for the primary path, and
//! the same pair for the fronted fallback path. Tiers are built once and
//! shared; the [`Tier`] trait is the seam the retry engine and the fallback
//! selector drive.

use crate::cookie::JarCookieStore;
use crate::error::{Error, Result};
use crate::http::builder::RequestDescriptor;
use crate::http::error::EhError;
use crate::http::timeout::TimeoutConfig;
use crate::http::tls::{self, TlsSettings};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, LOCATION};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Redirect hops followed by the redirect-following tiers
pub const MAX_REDIRECTS: usize = 10;

/// Tier identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierId {
    Primary,
    PrimaryNoRedirect,
    Fallback,
    FallbackNoRedirect,
}

impl TierId {
    pub const ALL: [TierId; 4] = [
        TierId::Primary,
        TierId::PrimaryNoRedirect,
        TierId::Fallback,
        TierId::FallbackNoRedirect,
    ];

    pub fn follows_redirects(&self) -> bool {
        matches!(self, TierId::Primary | TierId::Fallback)
    }

    /// Direct connection to a literal IP: no proxy, host-override TLS checks
    pub fn uses_direct_connect(&self) -> bool {
        matches!(self, TierId::Fallback | TierId::FallbackNoRedirect)
    }
}

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TierId::Primary => "primary",
            TierId::PrimaryNoRedirect => "primary_no_redirect",
            TierId::Fallback => "fallback",
            TierId::FallbackNoRedirect => "fallback_no_redirect",
        })
    }
}

/// Which pair of tiers a request travels through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierRoute {
    #[default]
    FollowRedirects,
    /// 3xx responses come back to the caller as-is
    NoRedirect,
}

impl TierRoute {
    pub fn primary(&self) -> TierId {
        match self {
            TierRoute::FollowRedirects => TierId::Primary,
            TierRoute::NoRedirect => TierId::PrimaryNoRedirect,
        }
    }

    pub fn fallback(&self) -> TierId {
        match self {
            TierRoute::FollowRedirects => TierId::Fallback,
            TierRoute::NoRedirect => TierId::FallbackNoRedirect,
        }
    }
}

/// A fully read response
///
/// Responses from the primary and fallback paths are indistinguishable.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl RawResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// A header value as text
    pub fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The body decoded as UTF-8, invalid sequences replaced
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The `Location` header of a redirect
    pub fn location(&self) -> Option<&str> {
        if self.status.is_redirection() {
            self.header_str(&LOCATION)
        } else {
            None
        }
    }

    /// Decode the body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> std::result::Result<T, EhError> {
        serde_json::from_slice(&self.body).map_err(|e| EhError::ParseFailure(e.to_string()))
    }
}

/// One configured HTTP client
#[async_trait]
pub trait Tier: Send + Sync {
    fn id(&self) -> TierId;

    /// Perform one exchange. No retries, no fallback, no validation.
    async fn send(&self, request: &RequestDescriptor) -> std::result::Result<RawResponse, EhError>;

    /// Whether the tier already wrote the `Set-Cookie` headers of every
    /// hop into the jar
    fn stores_cookies(&self) -> bool {
        false
    }
}

/// Settings needed to build a tier
#[derive(Debug, Clone)]
pub struct TierOptions {
    pub timeouts: TimeoutConfig,
    pub tls: TlsSettings,
    /// Honour `HTTP(S)_PROXY` on the primary tiers
    pub use_system_proxy: bool,
    /// Jar consulted on each redirect hop of the primary tiers
    pub cookie_store: Option<Arc<JarCookieStore>>,
}

/// A tier backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpTier {
    id: TierId,
    client: reqwest::Client,
    stores_cookies: bool,
}

impl HttpTier {
    /// Build the client for a tier
    pub fn new(id: TierId, options: &TierOptions) -> Result<Self> {
        let build_error = |message: String| Error::ClientBuild {
            tier: id.to_string(),
            message,
            source: None,
        };

        let redirect = if id.follows_redirects() {
            Policy::limited(MAX_REDIRECTS)
        } else {
            Policy::none()
        };
        let mut stores_cookies = false;
        let mut builder = reqwest::Client::builder()
            .connect_timeout(options.timeouts.connect_timeout)
            .timeout(options.timeouts.request_timeout)
            .redirect(redirect);

        if id.uses_direct_connect() {
            let tls_config = tls::fronting_client_config(&options.tls)
                .map_err(|e| build_error(e.to_string()))?;
            builder = builder
                .no_proxy()
                .pool_max_idle_per_host(0)
                .http1_only()
                .use_preconfigured_tls(tls_config);
        } else {
            if !options.use_system_proxy {
                builder = builder.no_proxy();
            }
            if let Some(store) = &options.cookie_store {
                builder = builder.cookie_provider(store.clone());
                stores_cookies = true;
            }
            let roots = options
                .tls
                .load_extra_roots()
                .map_err(|e| build_error(e.to_string()))?;
            for cert in roots {
                let cert = reqwest::Certificate::from_der(cert.as_ref())
                    .map_err(|e| build_error(e.to_string()))?;
                builder = builder.add_root_certificate(cert);
            }
        }

        let client = builder.build().map_err(|e| Error::ClientBuild {
            tier: id.to_string(),
            message: e.to_string(),
            source: Some(e.into()),
        })?;
        Ok(Self {
            id,
            client,
            stores_cookies,
        })
    }

    async fn exchange(&self, request: &RequestDescriptor) -> std::result::Result<RawResponse, EhError> {
        let response = self
            .client
            .execute(request.to_reqwest())
            .await
            .map_err(|e| EhError::from_reqwest(&e))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| EhError::from_reqwest(&e))?;
        trace!(tier = %self.id, %status, bytes = body.len(), "exchange complete");
        Ok(RawResponse::new(status, headers, body))
    }
}

#[async_trait]
impl Tier for HttpTier {
    fn id(&self) -> TierId {
        self.id
    }

    async fn send(&self, request: &RequestDescriptor) -> std::result::Result<RawResponse, EhError> {
        let expected = if self.id.uses_direct_connect() {
            request.expected_tls_name()
        } else {
            None
        };
        tls::with_expected_host(expected, self.exchange(request)).await
    }

    fn stores_cookies(&self) -> bool {
        self.stores_cookies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_tier_properties() {
        assert!(TierId::Primary.follows_redirects());
        assert!(!TierId::PrimaryNoRedirect.follows_redirects());
        assert!(TierId::Fallback.follows_redirects());
        assert!(!TierId::FallbackNoRedirect.follows_redirects());

        assert!(!TierId::Primary.uses_direct_connect());
        assert!(TierId::Fallback.uses_direct_connect());
        assert!(TierId::FallbackNoRedirect.uses_direct_connect());
    }

    #[test]
    fn test_route_pairs() {
        assert_eq!(TierRoute::FollowRedirects.primary(), TierId::Primary);
        assert_eq!(TierRoute::FollowRedirects.fallback(), TierId::Fallback);
        assert_eq!(TierRoute::NoRedirect.primary(), TierId::PrimaryNoRedirect);
        assert_eq!(TierRoute::NoRedirect.fallback(), TierId::FallbackNoRedirect);
    }

    #[test]
    fn test_all_tiers_build() {
        let options = TierOptions {
            timeouts: TimeoutConfig::primary(),
            tls: TlsSettings::default(),
            use_system_proxy: false,
            cookie_store: None,
        };
        for id in TierId::ALL {
            let tier = HttpTier::new(id, &options).unwrap();
            assert_eq!(tier.id(), id);
            assert!(!tier.stores_cookies());
        }
    }

    #[test]
    fn test_cookie_store_only_on_primary_tiers() {
        let jar: Arc<dyn crate::cookie::CookieJar> = Arc::new(crate::cookie::MemoryCookieJar::new());
        let options = TierOptions {
            timeouts: TimeoutConfig::primary(),
            tls: TlsSettings::default(),
            use_system_proxy: false,
            cookie_store: Some(Arc::new(JarCookieStore::new(jar))),
        };
        for id in TierId::ALL {
            let tier = HttpTier::new(id, &options).unwrap();
            assert_eq!(tier.stores_cookies(), !id.uses_direct_connect(), "{id}");
        }
    }

    #[test]
    fn test_location_only_on_redirects() {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("/s/abc/1-1"));
        let redirect = RawResponse::new(StatusCode::FOUND, headers.clone(), Bytes::new());
        assert_eq!(redirect.location(), Some("/s/abc/1-1"));
        let ok = RawResponse::new(StatusCode::OK, headers, Bytes::new());
        assert_eq!(ok.location(), None);
    }

    #[test]
    fn test_json_decode_failure() {
        let response = RawResponse::new(StatusCode::OK, HeaderMap::new(), "not json");
        let err = response.json::<serde_json::Value>().unwrap_err();
        assert!(matches!(err, EhError::ParseFailure(_)));
    }
}
