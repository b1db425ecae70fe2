//! ehnet core - resilient HTTP transport for the E-Hentai origin family
//!
//! The origin is often reachable only with some effort: DNS answers get
//! poisoned, SNI gets inspected, and the server itself answers automated
//! clients with soft blocks instead of errors. This crate wraps `reqwest`
//! with retries, a domain-fronting fallback path, and response validation,
//! while keeping one cookie session across every path.
//!
//! # Main Components
//!
//! - **Transport**: [`EhTransport`], one async call per logical operation
//! - **Configuration**: [`TransportConfig`], serde-loadable
//! - **Cookies**: [`CookieJar`] and [`CookieSanitizer`] collaborators with defaults
//! - **Fronting table**: [`FrontingTable`] with the built-in host map
//! - **DNS-over-HTTPS**: [`DohResolver`] for fresh fronting addresses
//!
//! # Example
//!
//! ```no_run
//! use ehnet_core::{EhTransport, MemoryCookieJar, TransportConfig};
//! use std::sync::Arc;
//!
//! async fn example() -> ehnet_core::Result<()> {
//!     let jar = Arc::new(MemoryCookieJar::new());
//!     let transport = EhTransport::new(&TransportConfig::default(), jar)?;
//!     let page = transport.get("https://e-hentai.org/", None).await?;
//!     println!("{}", page.text_lossy());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cookie;
pub mod doh;
pub mod error;
pub mod hosts;
pub mod http;

pub use config::TransportConfig;
pub use cookie::{CookieJar, CookieSanitizer, EhCookieSanitizer, LoginState, MemoryCookieJar, StoredCookie};
pub use doh::{DohProvider, DohResolver};
pub use error::{Error, Result};
pub use hosts::{FrontingTable, HostSource, StaticFrontingTable};
pub use http::{EhError, EhTransport, NetworkErrorCode, RawResponse, TierRoute};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
