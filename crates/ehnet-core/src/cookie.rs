//! Cookie jar and per-request cookie sanitation
//!
//! The transport never owns session state. It reads and writes cookies
//! through the [`CookieJar`] it was given, and lets a [`CookieSanitizer`]
//! adjust the jar right before every attempt. The defaults are an in-memory
//! jar that can be persisted as JSON, and the E-Hentai sanitizer that keeps
//! the content warning disabled and hides the `uconfig` cookie.

use crate::error::Result;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};
use url::Url;

pub const KEY_IPB_MEMBER_ID: &str = "ipb_member_id";
pub const KEY_IPB_PASS_HASH: &str = "ipb_pass_hash";
pub const KEY_IGNEOUS: &str = "igneous";
/// `nw=1` skips the content warning page
pub const KEY_NW: &str = "nw";
pub const KEY_UCONFIG: &str = "uconfig";

pub const DOMAIN_EHENTAI: &str = ".e-hentai.org";
pub const DOMAIN_EXHENTAI: &str = ".exhentai.org";
pub const DOMAIN_FORUMS: &str = "forums.e-hentai.org";

/// Shared cookie storage
pub trait CookieJar: Send + Sync {
    /// Name/value pairs that would be sent to `url`
    fn cookies_for(&self, url: &Url) -> BTreeMap<String, String>;

    /// Store a cookie. A `domain` with a leading dot covers subdomains,
    /// otherwise the cookie is host-only.
    fn set_cookie(&self, name: &str, value: &str, domain: &str, path: &str);

    /// Remove every cookie named `name` that would be sent to `url`
    fn delete_cookie(&self, url: &Url, name: &str);
}

/// Adjusts the jar before each attempt
pub trait CookieSanitizer: Send + Sync {
    fn sanitize(&self, jar: &dyn CookieJar, url: &Url);
}

/// One stored cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    "/".to_string()
}

impl StoredCookie {
    fn matches(&self, host: &str, path: &str) -> bool {
        domain_matches(&self.domain, host) && path_matches(&self.path, path)
    }

    fn same_slot(&self, name: &str, domain: &str, path: &str) -> bool {
        self.name == name && self.domain.eq_ignore_ascii_case(domain) && self.path == path
    }
}

fn domain_matches(cookie_domain: &str, host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    match cookie_domain.strip_prefix('.') {
        Some(base) => {
            let base = base.to_ascii_lowercase();
            host == base || host.ends_with(&format!(".{base}"))
        }
        None => host == cookie_domain.to_ascii_lowercase(),
    }
}

fn path_matches(cookie_path: &str, request_path: &str) -> bool {
    if cookie_path == "/" || cookie_path == request_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/')
            || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/'))
}

/// In-memory jar, optionally backed by a JSON file
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    cookies: RwLock<Vec<StoredCookie>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cookies(cookies: Vec<StoredCookie>) -> Self {
        let jar = Self::new();
        for cookie in cookies {
            jar.set_cookie(&cookie.name, &cookie.value, &cookie.domain, &cookie.path);
        }
        jar
    }

    /// Copy of every stored cookie
    pub fn snapshot(&self) -> Vec<StoredCookie> {
        self.cookies.read().clone()
    }

    pub fn len(&self) -> usize {
        self.cookies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.read().is_empty()
    }

    /// Remove every cookie sent to `domain`
    pub fn clear_domain(&self, domain: &str) {
        let host = domain.trim_start_matches('.');
        self.cookies
            .write()
            .retain(|cookie| !domain_matches(&cookie.domain, host));
    }

    pub fn clear(&self) {
        self.cookies.write().clear();
    }

    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    pub fn import_json(&self, json: &str) -> Result<usize> {
        let cookies: Vec<StoredCookie> = serde_json::from_str(json)?;
        let count = cookies.len();
        for cookie in cookies {
            self.set_cookie(&cookie.name, &cookie.value, &cookie.domain, &cookie.path);
        }
        Ok(count)
    }

    /// Load a jar saved with [`save`](Self::save); a missing file is an
    /// empty jar
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let jar = Self::new();
        let count = jar.import_json(&std::fs::read_to_string(path)?)?;
        debug!(path = %path.display(), count, "loaded cookie jar");
        Ok(jar)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.export_json()?)?;
        debug!(path = %path.display(), count = self.len(), "saved cookie jar");
        Ok(())
    }
}

impl CookieJar for MemoryCookieJar {
    fn cookies_for(&self, url: &Url) -> BTreeMap<String, String> {
        let Some(host) = url.host_str() else {
            return BTreeMap::new();
        };
        let mut matching: Vec<StoredCookie> = self
            .cookies
            .read()
            .iter()
            .filter(|cookie| cookie.matches(host, url.path()))
            .cloned()
            .collect();
        // Longer paths are more specific and win on name clashes.
        matching.sort_by_key(|cookie| cookie.path.len());
        matching
            .into_iter()
            .map(|cookie| (cookie.name, cookie.value))
            .collect()
    }

    fn set_cookie(&self, name: &str, value: &str, domain: &str, path: &str) {
        let path = if path.is_empty() { "/" } else { path };
        let mut cookies = self.cookies.write();
        match cookies
            .iter_mut()
            .find(|cookie| cookie.same_slot(name, domain, path))
        {
            Some(existing) => existing.value = value.to_string(),
            None => cookies.push(StoredCookie {
                name: name.to_string(),
                value: value.to_string(),
                domain: domain.to_ascii_lowercase(),
                path: path.to_string(),
            }),
        }
    }

    fn delete_cookie(&self, url: &Url, name: &str) {
        let Some(host) = url.host_str() else {
            return;
        };
        self.cookies
            .write()
            .retain(|cookie| !(cookie.name == name && cookie.matches(host, url.path())));
    }
}

/// Keeps `nw=1` set and `uconfig` out of requests to e-hentai.org
#[derive(Debug, Clone, Copy, Default)]
pub struct EhCookieSanitizer;

impl CookieSanitizer for EhCookieSanitizer {
    fn sanitize(&self, jar: &dyn CookieJar, url: &Url) {
        let Some(host) = url.host_str() else {
            return;
        };
        if !host.ends_with("e-hentai.org") {
            return;
        }
        let cookies = jar.cookies_for(url);
        if cookies.get(KEY_NW).map(String::as_str) != Some("1") {
            trace!(host, "injecting nw=1");
            jar.set_cookie(KEY_NW, "1", DOMAIN_EHENTAI, "/");
        }
        if cookies.contains_key(KEY_UCONFIG) {
            trace!(host, "dropping uconfig");
            jar.delete_cookie(url, KEY_UCONFIG);
        }
    }
}

/// Render a `Cookie` header value
pub fn cookie_header(cookies: &BTreeMap<String, String>) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Write `Set-Cookie` headers from a response for `url` into the jar.
///
/// Returns the number of cookies stored or removed. A `Domain` attribute
/// that does not cover the request host is ignored.
pub fn store_response_cookies(jar: &dyn CookieJar, url: &Url, headers: &HeaderMap) -> usize {
    store_set_cookies(jar, url, headers.get_all(SET_COOKIE).iter())
}

/// Write raw `Set-Cookie` values received from `url` into the jar
pub fn store_set_cookies<'a>(
    jar: &dyn CookieJar,
    url: &Url,
    values: impl Iterator<Item = &'a HeaderValue>,
) -> usize {
    let Some(host) = url.host_str() else {
        return 0;
    };
    let mut changed = 0;
    for raw in values {
        let Ok(raw) = raw.to_str() else { continue };
        let Ok(parsed) = cookie::Cookie::parse(raw) else {
            debug!(host, "ignoring malformed Set-Cookie");
            continue;
        };

        let domain = match parsed.domain() {
            Some(attr) => {
                let attr = attr.trim_start_matches('.').to_ascii_lowercase();
                if !domain_matches(&format!(".{attr}"), host) {
                    debug!(host, domain = %attr, "ignoring Set-Cookie for foreign domain");
                    continue;
                }
                format!(".{attr}")
            }
            None => host.to_ascii_lowercase(),
        };
        let path = parsed.path().unwrap_or("/");

        let expired = parsed.max_age().map_or(false, |age| age <= cookie::time::Duration::ZERO)
            || parsed
                .expires_datetime()
                .map_or(false, |at| at <= cookie::time::OffsetDateTime::now_utc());
        if expired {
            remove_exact(jar, parsed.name(), &domain, path);
        } else {
            jar.set_cookie(parsed.name(), parsed.value(), &domain, path);
        }
        changed += 1;
    }
    changed
}

/// Lets a redirect-following client read and write the jar on every hop
pub struct JarCookieStore {
    jar: Arc<dyn CookieJar>,
}

impl JarCookieStore {
    pub fn new(jar: Arc<dyn CookieJar>) -> Self {
        Self { jar }
    }
}

impl fmt::Debug for JarCookieStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JarCookieStore").finish_non_exhaustive()
    }
}

impl reqwest::cookie::CookieStore for JarCookieStore {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let stored = store_set_cookies(self.jar.as_ref(), url, cookie_headers);
        if stored > 0 {
            trace!(url = %url, stored, "cookies updated during exchange");
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        cookie_header(&self.jar.cookies_for(url)).and_then(|header| HeaderValue::from_str(&header).ok())
    }
}

fn remove_exact(jar: &dyn CookieJar, name: &str, domain: &str, path: &str) {
    let host = domain.trim_start_matches('.');
    if let Ok(url) = Url::parse(&format!("https://{host}{path}")) {
        jar.delete_cookie(&url, name);
    }
}

/// Put `nw=1` on both main domains
pub fn inject_nw_cookie(jar: &dyn CookieJar) {
    jar.set_cookie(KEY_NW, "1", DOMAIN_EHENTAI, "/");
    jar.set_cookie(KEY_NW, "1", DOMAIN_EXHENTAI, "/");
}

/// Copy the member id and pass hash from e-hentai.org to exhentai.org
pub fn sync_login_cookies(jar: &dyn CookieJar) -> bool {
    let cookies = cookies_for_domain(jar, DOMAIN_EHENTAI);
    let (Some(member_id), Some(pass_hash)) =
        (cookies.get(KEY_IPB_MEMBER_ID), cookies.get(KEY_IPB_PASS_HASH))
    else {
        return false;
    };
    jar.set_cookie(KEY_IPB_MEMBER_ID, member_id, DOMAIN_EXHENTAI, "/");
    jar.set_cookie(KEY_IPB_PASS_HASH, pass_hash, DOMAIN_EXHENTAI, "/");
    inject_nw_cookie(jar);
    true
}

/// Remove the session cookies of every origin domain
pub fn sign_out(jar: &dyn CookieJar) {
    for domain in [DOMAIN_EHENTAI, DOMAIN_EXHENTAI, DOMAIN_FORUMS] {
        let Some(url) = domain_url(domain) else { continue };
        for name in jar.cookies_for(&url).keys() {
            jar.delete_cookie(&url, name);
        }
    }
}

/// What the jar says about the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoginState {
    pub signed_in: bool,
    pub exhentai_access: bool,
}

impl LoginState {
    pub fn inspect(jar: &dyn CookieJar) -> Self {
        let eh = cookies_for_domain(jar, DOMAIN_EHENTAI);
        let ex = cookies_for_domain(jar, DOMAIN_EXHENTAI);
        let has_login = |cookies: &BTreeMap<String, String>| {
            cookies.contains_key(KEY_IPB_MEMBER_ID) && cookies.contains_key(KEY_IPB_PASS_HASH)
        };
        Self {
            signed_in: has_login(&eh),
            exhentai_access: has_login(&ex) && ex.contains_key(KEY_IGNEOUS),
        }
    }
}

fn domain_url(domain: &str) -> Option<Url> {
    Url::parse(&format!("https://{}/", domain.trim_start_matches('.'))).ok()
}

fn cookies_for_domain(jar: &dyn CookieJar, domain: &str) -> BTreeMap<String, String> {
    domain_url(domain)
        .map(|url| jar.cookies_for(&url))
        .unwrap_or_default()
}
