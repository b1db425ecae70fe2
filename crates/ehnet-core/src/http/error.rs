//! Request error taxonomy and network error classification
//!
//! Every request the transport executes ends in either a [`RawResponse`]
//! or one [`EhError`]. The set is closed: callers match on it, the retry
//! engine and the fallback selector decide through predicates over it.
//!
//! Transport failures reported by `reqwest` are mapped to a fine-grained
//! [`NetworkErrorCode`] by walking the error's source chain. The code drives
//! retry and fallback decisions; its coarser [`NetworkErrorKind`] drives the
//! message and remedy shown to users.
//!
//! [`RawResponse`]: crate::http::RawResponse

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Fine-grained network failure codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorCode {
    TimedOut,
    CannotConnectToHost,
    NetworkConnectionLost,
    SecureConnectionFailed,
    NotConnectedToInternet,
    CannotFindHost,
    DnsLookupFailed,
    InternationalRoamingOff,
    DataNotAllowed,
    /// A transport failure that fits none of the above
    Other,
}

impl NetworkErrorCode {
    /// Whether the retry engine may re-send the request
    pub fn is_retryable(&self) -> bool {
        !matches!(self, NetworkErrorCode::Other)
    }

    /// Whether the failure can plausibly be caused by DNS poisoning, IP or
    /// SNI blocking, so that a fronted re-attempt is worth trying
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            NetworkErrorCode::CannotConnectToHost
                | NetworkErrorCode::CannotFindHost
                | NetworkErrorCode::DnsLookupFailed
                | NetworkErrorCode::TimedOut
                | NetworkErrorCode::NetworkConnectionLost
                | NetworkErrorCode::SecureConnectionFailed
        )
    }

    /// The user-facing kind for this code
    pub fn kind(&self) -> NetworkErrorKind {
        match self {
            NetworkErrorCode::TimedOut => NetworkErrorKind::Timeout,
            NetworkErrorCode::CannotConnectToHost => NetworkErrorKind::CannotConnect,
            NetworkErrorCode::CannotFindHost | NetworkErrorCode::DnsLookupFailed => {
                NetworkErrorKind::DnsFailure
            }
            NetworkErrorCode::NetworkConnectionLost => NetworkErrorKind::ConnectionLost,
            NetworkErrorCode::SecureConnectionFailed => NetworkErrorKind::TlsFailure,
            NetworkErrorCode::NotConnectedToInternet => NetworkErrorKind::NoInternet,
            NetworkErrorCode::InternationalRoamingOff | NetworkErrorCode::DataNotAllowed => {
                NetworkErrorKind::CellularRestricted
            }
            NetworkErrorCode::Other => NetworkErrorKind::Other,
        }
    }
}

impl fmt::Display for NetworkErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetworkErrorCode::TimedOut => "timed_out",
            NetworkErrorCode::CannotConnectToHost => "cannot_connect_to_host",
            NetworkErrorCode::NetworkConnectionLost => "network_connection_lost",
            NetworkErrorCode::SecureConnectionFailed => "secure_connection_failed",
            NetworkErrorCode::NotConnectedToInternet => "not_connected_to_internet",
            NetworkErrorCode::CannotFindHost => "cannot_find_host",
            NetworkErrorCode::DnsLookupFailed => "dns_lookup_failed",
            NetworkErrorCode::InternationalRoamingOff => "international_roaming_off",
            NetworkErrorCode::DataNotAllowed => "data_not_allowed",
            NetworkErrorCode::Other => "other",
        };
        f.write_str(name)
    }
}

/// User-facing network failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorKind {
    Timeout,
    CannotConnect,
    DnsFailure,
    ConnectionLost,
    TlsFailure,
    NoInternet,
    CellularRestricted,
    Other,
}

impl NetworkErrorKind {
    /// Human-readable message for this kind
    pub fn message(&self) -> &'static str {
        match self {
            NetworkErrorKind::Timeout => {
                "The request timed out. Check your network connection or proxy settings."
            }
            NetworkErrorKind::CannotConnect => {
                "Cannot connect to the server. Try enabling a proxy or VPN."
            }
            NetworkErrorKind::DnsFailure => {
                "The server address could not be resolved. Check your DNS settings or enable a proxy or VPN."
            }
            NetworkErrorKind::ConnectionLost => {
                "The network connection was lost. Try again later."
            }
            NetworkErrorKind::TlsFailure => {
                "The secure connection failed. Check your proxy or VPN configuration."
            }
            NetworkErrorKind::NoInternet => {
                "No internet connection. Check your network settings."
            }
            NetworkErrorKind::CellularRestricted => {
                "Cellular data is restricted for this device. Check your cellular settings."
            }
            NetworkErrorKind::Other => "A network error occurred.",
        }
    }

    /// Suggested remedy category
    pub fn remedy(&self) -> Option<Remedy> {
        match self {
            NetworkErrorKind::Timeout | NetworkErrorKind::NoInternet => {
                Some(Remedy::CheckConnectivity)
            }
            NetworkErrorKind::CannotConnect | NetworkErrorKind::TlsFailure => {
                Some(Remedy::UseProxyOrVpn)
            }
            NetworkErrorKind::DnsFailure => Some(Remedy::CheckDns),
            NetworkErrorKind::ConnectionLost => Some(Remedy::RetryLater),
            NetworkErrorKind::CellularRestricted => Some(Remedy::CheckCellularSettings),
            NetworkErrorKind::Other => None,
        }
    }
}

/// Remedy categories surfaced alongside network errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remedy {
    UseProxyOrVpn,
    CheckDns,
    CheckConnectivity,
    CheckCellularSettings,
    RetryLater,
}

impl Remedy {
    /// Short suggestion text
    pub fn hint(&self) -> &'static str {
        match self {
            Remedy::UseProxyOrVpn => "enable a proxy or VPN, or turn on domain fronting",
            Remedy::CheckDns => "check DNS settings or turn on domain fronting",
            Remedy::CheckConnectivity => "check the network connection and proxy settings",
            Remedy::CheckCellularSettings => "allow cellular data for this application",
            Remedy::RetryLater => "retry in a moment",
        }
    }
}

/// Outcome error of a single logical request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EhError {
    /// The URL could not be parsed as an absolute http(s) URL
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The origin served the "sad panda" placeholder instead of content
    #[error("Access denied (sad panda). Sign in again or check the ExHentai cookies.")]
    SoftBlockSadPanda,

    /// The origin served the "kokomade" access-limit page
    #[error("Access to ExHentai is limited for this account or IP (kokomade).")]
    SoftBlockKokomade,

    /// The secure origin answered its root with an empty page
    #[error("The igneous session cookie was rejected. Remove it and sign in again.")]
    InvalidSessionCookie,

    /// Non-success HTTP status
    #[error("HTTP {code}: {body_snippet}")]
    HttpStatus { code: u16, body_snippet: String },

    /// The image viewing quota is exhausted
    #[error("Image limit reached (509). Wait for the quota to reset or reset it from the home page.")]
    ImageLimitReached,

    /// Transport-level failure
    #[error("{}", .code.kind().message())]
    Network {
        code: NetworkErrorCode,
        detail: String,
    },

    /// The caller cancelled the request
    #[error("Request cancelled")]
    Cancelled,

    /// A body decoder could not make sense of a successful response
    #[error("Failed to parse response: {0}")]
    ParseFailure(String),
}

impl EhError {
    /// Create a network error
    pub fn network(code: NetworkErrorCode, detail: impl Into<String>) -> Self {
        EhError::Network {
            code,
            detail: detail.into(),
        }
    }

    /// Classify a `reqwest` failure
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        if error.is_builder() {
            return EhError::InvalidRequest(error.to_string());
        }

        let code = if error.is_timeout() {
            NetworkErrorCode::TimedOut
        } else {
            // The top-level message embeds the URL; only the causes are inspected.
            error
                .source()
                .and_then(classify_source_chain)
                .unwrap_or_else(|| {
                    if error.is_connect() {
                        NetworkErrorCode::CannotConnectToHost
                    } else if error.is_body() || error.is_decode() || error.is_request() {
                        NetworkErrorCode::NetworkConnectionLost
                    } else {
                        NetworkErrorCode::Other
                    }
                })
        };

        EhError::network(code, error_chain_text(error))
    }

    /// The network code, if this is a network error
    pub fn network_code(&self) -> Option<NetworkErrorCode> {
        match self {
            EhError::Network { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the retry engine may re-send the request
    pub fn is_retryable(&self) -> bool {
        self.network_code().map_or(false, |code| code.is_retryable())
    }

    /// Whether this failure is eligible for a fronted re-attempt
    pub fn triggers_fallback(&self) -> bool {
        self.network_code()
            .map_or(false, |code| code.triggers_fallback())
    }

    /// Whether the origin answered with a soft-block page
    pub fn is_soft_block(&self) -> bool {
        matches!(self, EhError::SoftBlockSadPanda | EhError::SoftBlockKokomade)
    }

    /// Suggested remedy for network failures
    pub fn remedy(&self) -> Option<Remedy> {
        self.network_code().and_then(|code| code.kind().remedy())
    }

    /// Stable machine-readable identifier
    pub fn code(&self) -> &'static str {
        match self {
            EhError::InvalidUrl { .. } => "invalid_url",
            EhError::InvalidRequest(_) => "invalid_request",
            EhError::SoftBlockSadPanda => "soft_block_sad_panda",
            EhError::SoftBlockKokomade => "soft_block_kokomade",
            EhError::InvalidSessionCookie => "invalid_session_cookie",
            EhError::HttpStatus { .. } => "http_status",
            EhError::ImageLimitReached => "image_limit_reached",
            EhError::Network { .. } => "network",
            EhError::Cancelled => "cancelled",
            EhError::ParseFailure(_) => "parse_failure",
        }
    }
}

/// Map a chain of error causes to a network code.
///
/// Typed causes win over message inspection: a rustls error anywhere in the
/// chain is a TLS failure, an `io::Error` kind is trusted next. Resolver
/// failures carry no useful kind and are recognised by hyper's `dns error`
/// wrapper text.
pub fn classify_source_chain(root: &(dyn StdError + 'static)) -> Option<NetworkErrorCode> {
    let mut io_code = None;
    let mut text = String::new();
    let mut current = Some(root);

    while let Some(err) = current {
        if is_rustls_error(err) {
            return Some(NetworkErrorCode::SecureConnectionFailed);
        }
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if let Some(inner) = io_err.get_ref() {
                if inner.downcast_ref::<rustls::Error>().is_some() {
                    return Some(NetworkErrorCode::SecureConnectionFailed);
                }
            }
            if io_code.is_none() {
                io_code = classify_io_kind(io_err.kind());
            }
        }
        text.push_str(&err.to_string().to_ascii_lowercase());
        text.push('\n');
        current = err.source();
    }

    if text.contains("dns error") || text.contains("failed to lookup address") {
        let missing = [
            "name or service not known",
            "nodename nor servname",
            "no address associated",
            "no such host",
        ];
        return Some(if missing.iter().any(|m| text.contains(m)) {
            NetworkErrorCode::CannotFindHost
        } else {
            NetworkErrorCode::DnsLookupFailed
        });
    }
    if io_code.is_some() {
        return io_code;
    }
    if text.contains("network is unreachable") || text.contains("no route to host") {
        return Some(NetworkErrorCode::NotConnectedToInternet);
    }
    if text.contains("tls") || text.contains("certificate") || text.contains("handshake") {
        return Some(NetworkErrorCode::SecureConnectionFailed);
    }
    None
}

fn is_rustls_error(err: &(dyn StdError + 'static)) -> bool {
    err.downcast_ref::<rustls::Error>().is_some()
}

fn classify_io_kind(kind: io::ErrorKind) -> Option<NetworkErrorCode> {
    match kind {
        io::ErrorKind::ConnectionRefused => Some(NetworkErrorCode::CannotConnectToHost),
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::NotConnected => Some(NetworkErrorCode::NetworkConnectionLost),
        io::ErrorKind::TimedOut => Some(NetworkErrorCode::TimedOut),
        io::ErrorKind::AddrNotAvailable => Some(NetworkErrorCode::NotConnectedToInternet),
        _ => None,
    }
}

fn error_chain_text(error: &reqwest::Error) -> String {
    let mut parts = vec![error.to_string()];
    let mut current = error.source();
    while let Some(err) = current {
        parts.push(err.to_string());
        current = err.source();
    }
    parts.join(": ")
}
