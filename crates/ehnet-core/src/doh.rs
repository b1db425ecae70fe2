//! DNS-over-HTTPS lookups
//!
//! Asks a public resolver's JSON API for the A records of a host. Useful
//! when the system resolver is poisoned and the built-in fronting table is
//! stale: the answers can be added as user fronting entries.

use crate::error::{Error, Result};
use crate::http::EhError;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Media type of the JSON DNS API
pub const DNS_JSON: &str = "application/dns-json";

/// Per-lookup timeout
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

const RECORD_TYPE_A: u16 = 1;

/// Public resolvers with a JSON API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DohProvider {
    #[default]
    Cloudflare,
    Google,
    AliDns,
}

impl DohProvider {
    pub const ALL: [DohProvider; 3] = [DohProvider::Cloudflare, DohProvider::Google, DohProvider::AliDns];

    pub fn endpoint(&self) -> &'static str {
        match self {
            DohProvider::Cloudflare => "https://cloudflare-dns.com/dns-query",
            DohProvider::Google => "https://dns.google/resolve",
            DohProvider::AliDns => "https://dns.alidns.com/resolve",
        }
    }
}

impl fmt::Display for DohProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DohProvider::Cloudflare => "cloudflare",
            DohProvider::Google => "google",
            DohProvider::AliDns => "alidns",
        })
    }
}

#[derive(Debug, Deserialize)]
struct DnsJsonResponse {
    #[serde(rename = "Status", default)]
    status: u32,
    #[serde(rename = "Answer")]
    answer: Option<Vec<DnsAnswer>>,
}

#[derive(Debug, Deserialize)]
struct DnsAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    data: String,
}

/// Extract the IPv4 addresses from a JSON DNS answer.
///
/// CNAME and other records in the answer are skipped. A response without
/// an answer section is a parse failure.
pub fn parse_answers(body: &[u8]) -> std::result::Result<Vec<IpAddr>, EhError> {
    let response: DnsJsonResponse = serde_json::from_slice(body)
        .map_err(|e| EhError::ParseFailure(format!("DNS response: {e}")))?;
    let Some(answers) = response.answer else {
        return Err(EhError::ParseFailure(format!(
            "DNS response has no answer (status {})",
            response.status
        )));
    };
    Ok(answers
        .into_iter()
        .filter(|answer| answer.record_type == RECORD_TYPE_A)
        .filter_map(|answer| answer.data.parse::<Ipv4Addr>().ok())
        .map(IpAddr::V4)
        .collect())
}

/// Resolver bound to one DoH endpoint
#[derive(Debug, Clone)]
pub struct DohResolver {
    client: reqwest::Client,
    endpoint: Url,
}

impl DohResolver {
    pub fn new(provider: DohProvider) -> Result<Self> {
        Self::with_endpoint(provider.endpoint())
    }

    /// Resolver for any endpoint speaking the JSON API
    pub fn with_endpoint(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::config(format!("invalid DoH endpoint '{endpoint}': {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .map_err(|e| Error::ClientBuild {
                tier: "doh".to_string(),
                message: e.to_string(),
                source: Some(e.into()),
            })?;
        Ok(Self { client, endpoint })
    }

    /// A records of `host`
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn resolve(&self, host: &str) -> std::result::Result<Vec<IpAddr>, EhError> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("name", host)
            .append_pair("type", "A");

        let response = self
            .client
            .get(url)
            .header(ACCEPT, DNS_JSON)
            .send()
            .await
            .map_err(|e| EhError::from_reqwest(&e))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| EhError::from_reqwest(&e))?;
        if !status.is_success() {
            return Err(EhError::HttpStatus {
                code: status.as_u16(),
                body_snippet: String::from_utf8_lossy(&body).chars().take(200).collect(),
            });
        }

        let addresses = parse_answers(&body)?;
        debug!(host, count = addresses.len(), "resolved over DoH");
        Ok(addresses)
    }
}
