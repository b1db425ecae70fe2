//! Request construction
//!
//! [`RequestBuilder`] produces immutable [`RequestDescriptor`] values that
//! look like requests from a desktop Chrome: fixed User-Agent, Accept and
//! Accept-Language headers, optional Referer/Origin, and one of the body
//! encodings the origin's forms and APIs expect. Building is pure; nothing
//! here touches the network or the cookie jar.

use crate::http::error::EhError;
use bytes::{BufMut, Bytes, BytesMut};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, COOKIE, HOST,
    ORIGIN, REFERER, USER_AGENT,
};
use reqwest::Method;
use std::fmt::Write as _;
use std::net::IpAddr;
use url::Url;

/// Desktop Chrome user agent
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36";
pub const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
pub const ACCEPT_IMAGE: &str = "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8";
pub const ACCEPT_JSON: &str = "application/json, */*;q=0.8";
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7";
pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";
pub const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";
pub const MULTIPART_BOUNDARY_PREFIX: &str = "----WebKitFormBoundary";

/// An immutable, fully built request
///
/// The body is reference counted so every retry sends the same bytes
/// without copying them.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl RequestDescriptor {
    /// A descriptor with no headers and no body
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Copy with a header set, replacing any previous value
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Copy with a body
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// A header value as text, if present and valid UTF-8
    pub fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Derive the fronted variant of this request.
    ///
    /// The URL host is replaced with `ip` (scheme, port, path and query are
    /// kept) and a `Host` header carries the original `host[:port]`.
    pub fn fronted(&self, ip: IpAddr) -> Result<Self, EhError> {
        let host = self.url.host_str().ok_or_else(|| EhError::InvalidUrl {
            url: self.url.to_string(),
            reason: "URL has no host".to_string(),
        })?;
        let host_value = match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let host_header = HeaderValue::from_str(&host_value)
            .map_err(|e| EhError::InvalidRequest(format!("invalid Host header: {e}")))?;

        let mut url = self.url.clone();
        url.set_ip_host(ip).map_err(|()| EhError::InvalidUrl {
            url: self.url.to_string(),
            reason: "host cannot be replaced with an IP address".to_string(),
        })?;

        let mut headers = self.headers.clone();
        headers.insert(HOST, host_header);

        Ok(Self {
            method: self.method.clone(),
            url,
            headers,
            body: self.body.clone(),
        })
    }

    /// The DNS name the peer certificate must be valid for, when this
    /// request is addressed to a different host than its `Host` header says
    pub fn expected_tls_name(&self) -> Option<String> {
        let host = strip_port(self.header_str(&HOST)?);
        if host.starts_with('[') || host.parse::<IpAddr>().is_ok() {
            return None;
        }
        match self.url.host_str() {
            Some(url_host) if url_host.eq_ignore_ascii_case(host) => None,
            _ => Some(host.to_ascii_lowercase()),
        }
    }

    /// Copy with jar cookies appended to any `Cookie` header already set
    pub fn with_cookies(&self, cookie_header: &str) -> Result<Self, EhError> {
        if cookie_header.is_empty() {
            return Ok(self.clone());
        }
        let merged = match self.header_str(&COOKIE) {
            Some(existing) if !existing.is_empty() => format!("{existing}; {cookie_header}"),
            _ => cookie_header.to_string(),
        };
        let value = HeaderValue::from_str(&merged)
            .map_err(|e| EhError::InvalidRequest(format!("invalid Cookie header: {e}")))?;
        Ok(self.clone().with_header(COOKIE, value))
    }

    /// Convert to a `reqwest` request
    pub fn to_reqwest(&self) -> reqwest::Request {
        let mut request = reqwest::Request::new(self.method.clone(), self.url.clone());
        *request.headers_mut() = self.headers.clone();
        if let Some(body) = &self.body {
            *request.body_mut() = Some(reqwest::Body::from(body.clone()));
        }
        request
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host;
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Which Accept header a request carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcceptProfile {
    /// HTML for everything except JSON payloads
    #[default]
    Auto,
    /// Image accept header
    Image,
}

/// Optional per-request headers
#[derive(Debug, Clone, Default)]
pub struct HeaderOptions {
    pub referer: Option<String>,
    pub origin: Option<String>,
    pub accept: AcceptProfile,
}

impl HeaderOptions {
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn image(mut self) -> Self {
        self.accept = AcceptProfile::Image;
        self
    }
}

/// One part of a multipart/form-data body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl MultipartPart {
    /// A plain text field
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: None,
            content_type: None,
            data: Bytes::from(value.into()),
        }
    }

    /// A file upload
    pub fn file(
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            filename: Some(filename.into()),
            content_type: Some(content_type.into()),
            data: data.into(),
        }
    }
}

/// Request body encodings
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Key/value pairs, URL-form encoded
    Form(Vec<(String, String)>),
    /// An already encoded form body
    RawForm(String),
    /// Serialized JSON
    Json(Bytes),
    /// Multipart parts; the boundary is generated unless given
    Multipart {
        parts: Vec<MultipartPart>,
        boundary: Option<String>,
    },
}

/// Builder for browser-like requests
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    user_agent: HeaderValue,
    accept_language: HeaderValue,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self {
            user_agent: HeaderValue::from_static(DEFAULT_USER_AGENT),
            accept_language: HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE),
        }
    }
}

impl RequestBuilder {
    /// Create a builder with the default browser identity
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the User-Agent
    pub fn with_user_agent(mut self, user_agent: &str) -> Result<Self, EhError> {
        self.user_agent = HeaderValue::from_str(user_agent)
            .map_err(|e| EhError::InvalidRequest(format!("invalid User-Agent: {e}")))?;
        Ok(self)
    }

    /// Build a request
    pub fn build(
        &self,
        method: Method,
        url: &str,
        options: &HeaderOptions,
        body: RequestBody,
    ) -> Result<RequestDescriptor, EhError> {
        let url = parse_url(url)?;
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, self.user_agent.clone());

        let accept = match (&body, options.accept) {
            (_, AcceptProfile::Image) => ACCEPT_IMAGE,
            (RequestBody::Json(_), AcceptProfile::Auto) => ACCEPT_JSON,
            _ => ACCEPT_HTML,
        };
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        headers.insert(ACCEPT_LANGUAGE, self.accept_language.clone());

        if let Some(referer) = &options.referer {
            headers.insert(REFERER, header_value("Referer", referer)?);
        }
        if let Some(origin) = &options.origin {
            headers.insert(ORIGIN, header_value("Origin", origin)?);
        }

        let body = match body {
            RequestBody::Empty => None,
            RequestBody::Form(fields) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_FORM));
                Some(Bytes::from(form_urlencode(&fields)))
            }
            RequestBody::RawForm(encoded) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_FORM));
                Some(Bytes::from(encoded))
            }
            RequestBody::Json(json) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
                Some(json)
            }
            RequestBody::Multipart { parts, boundary } => {
                let boundary = boundary.unwrap_or_else(new_boundary);
                let content_type = format!("multipart/form-data; boundary={boundary}");
                headers.insert(CONTENT_TYPE, header_value("Content-Type", &content_type)?);
                Some(encode_multipart(&parts, &boundary)?)
            }
        };

        Ok(RequestDescriptor {
            method,
            url,
            headers,
            body,
        })
    }

    /// GET for an HTML page or API
    pub fn get(&self, url: &str, referer: Option<&str>) -> Result<RequestDescriptor, EhError> {
        let options = HeaderOptions {
            referer: referer.map(str::to_string),
            ..HeaderOptions::default()
        };
        self.build(Method::GET, url, &options, RequestBody::Empty)
    }

    /// GET for an image
    pub fn image(&self, url: &str, referer: Option<&str>) -> Result<RequestDescriptor, EhError> {
        let options = HeaderOptions {
            referer: referer.map(str::to_string),
            accept: AcceptProfile::Image,
            ..HeaderOptions::default()
        };
        self.build(Method::GET, url, &options, RequestBody::Empty)
    }

    /// POST with a JSON body
    pub fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
        options: &HeaderOptions,
    ) -> Result<RequestDescriptor, EhError> {
        let json = serde_json::to_vec(payload)
            .map_err(|e| EhError::InvalidRequest(format!("failed to serialize JSON body: {e}")))?;
        self.build(Method::POST, url, options, RequestBody::Json(Bytes::from(json)))
    }
}

fn parse_url(raw: &str) -> Result<Url, EhError> {
    let invalid = |reason: String| EhError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("URL has no host".to_string()));
    }
    Ok(url)
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, EhError> {
    HeaderValue::from_str(value)
        .map_err(|e| EhError::InvalidRequest(format!("invalid {name} header: {e}")))
}

/// Encode one form component: alphanumerics and `-_.*` pass through, space
/// becomes `+`, every other UTF-8 byte is percent-encoded in upper-case hex
pub fn form_encode_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'*' => {
                out.push(byte as char)
            }
            b' ' => out.push('+'),
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

/// Encode key/value pairs as `application/x-www-form-urlencoded`
pub fn form_urlencode(fields: &[(String, String)]) -> String {
    fields
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                form_encode_component(key),
                form_encode_component(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// A fresh multipart boundary
pub fn new_boundary() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{MULTIPART_BOUNDARY_PREFIX}{}", &id[..16])
}

/// Encode multipart parts with the given boundary
pub fn encode_multipart(parts: &[MultipartPart], boundary: &str) -> Result<Bytes, EhError> {
    let mut body = BytesMut::new();
    for part in parts {
        if part.name.is_empty() {
            return Err(EhError::InvalidRequest(
                "multipart part without a name".to_string(),
            ));
        }
        body.put_slice(format!("--{boundary}\r\n").as_bytes());
        body.put_slice(format!("Content-Disposition: form-data; name=\"{}\"", part.name).as_bytes());
        if let Some(filename) = &part.filename {
            body.put_slice(format!("; filename=\"{filename}\"").as_bytes());
        }
        body.put_slice(b"\r\n");
        if let Some(content_type) = &part.content_type {
            body.put_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.put_slice(b"\r\n");
        body.put_slice(&part.data);
        body.put_slice(b"\r\n");
    }
    body.put_slice(format!("--{boundary}--\r\n").as_bytes());
    Ok(body.freeze())
}
