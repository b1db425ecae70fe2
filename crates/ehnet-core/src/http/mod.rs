//! HTTP transport for the origin family
//!
//! This module provides a resilient client with:
//! - Browser-like request building (form, JSON, multipart bodies)
//! - Four transport tiers (primary and fronted, each with and without redirects)
//! - Bounded retry with linear backoff
//! - Domain-fronting fallback with host-checked TLS
//! - Soft-block detection and a closed error taxonomy

pub mod builder;
pub mod client;
pub mod error;
pub mod fallback;
pub mod retry;
pub mod tier;
pub mod timeout;
pub mod tls;
pub mod validator;

pub use builder::{HeaderOptions, MultipartPart, RequestBody, RequestBuilder, RequestDescriptor};
pub use client::{EhTransport, TransportBuilder, TransportResult, Validation};
pub use error::{EhError, NetworkErrorCode, NetworkErrorKind, Remedy};
pub use fallback::{FallbackConfig, FallbackDecision, FallbackSelector};
pub use retry::{Attempt, RetryDecision, RetryPolicy};
pub use tier::{HttpTier, RawResponse, Tier, TierId, TierRoute};
pub use timeout::{TierTimeouts, TimeoutConfig};
pub use tls::{FrontingCertVerifier, TlsSettings};
pub use validator::{ResponseOutcome, SoftBlockKind};

// Re-export commonly used types
pub use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
pub use reqwest::{Method, StatusCode};
