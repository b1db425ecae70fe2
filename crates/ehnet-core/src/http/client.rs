//! The transport facade
//!
//! [`EhTransport`] wires the pieces together. A request goes through the
//! cookie sanitizer and the retry engine on its primary tier; when the
//! primary path gives up on a fronting-eligible error the fallback selector
//! sends it once more over the matching fallback tier. Whatever response
//! comes back is then classified by the validator.
//!
//! Cookies are attached here, not in the tiers, and always for the original
//! URL so that a fronted attempt carries the same session as a primary one.
//! The primary tiers also read and write the jar on each redirect hop; for
//! the fronted tiers the facade stores the final `Set-Cookie` headers
//! against the original URL.

use crate::config::TransportConfig;
use crate::cookie::{
    cookie_header, store_response_cookies, CookieJar, CookieSanitizer, EhCookieSanitizer, JarCookieStore,
};
use crate::error::{Error, Result};
use crate::hosts::FrontingTable;
use crate::http::builder::{HeaderOptions, MultipartPart, RequestBody, RequestBuilder, RequestDescriptor};
use crate::http::error::EhError;
use crate::http::fallback::FallbackSelector;
use crate::http::retry::{execute_with_retry, RetryPolicy};
use crate::http::tier::{HttpTier, RawResponse, Tier, TierId, TierOptions, TierRoute};
use crate::http::validator::{classify, classify_page};
use reqwest::Method;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};
use url::Url;

/// How a response is checked before it reaches the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Validation {
    /// Soft blocks, session check, error statuses
    #[default]
    Standard,
    /// [`Validation::Standard`] plus image-quota detection
    Page,
}

/// Result of a transport call
pub type TransportResult = std::result::Result<RawResponse, EhError>;

/// Resilient HTTP client for the origin family
#[derive(Clone)]
pub struct EhTransport {
    tiers: [Arc<dyn Tier>; 4],
    builder: RequestBuilder,
    jar: Arc<dyn CookieJar>,
    sanitizer: Arc<dyn CookieSanitizer>,
    fallback: FallbackSelector,
    retry: RetryPolicy,
}

impl std::fmt::Debug for EhTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EhTransport")
            .field("retry", &self.retry)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl EhTransport {
    /// Build a transport from configuration, sharing `jar`
    pub fn new(config: &TransportConfig, jar: Arc<dyn CookieJar>) -> Result<Self> {
        TransportBuilder::new(config.clone()).cookie_jar(jar).build()
    }

    pub fn builder(config: TransportConfig) -> TransportBuilder {
        TransportBuilder::new(config)
    }

    pub fn cookie_jar(&self) -> &Arc<dyn CookieJar> {
        &self.jar
    }

    pub fn request_builder(&self) -> &RequestBuilder {
        &self.builder
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn tier(&self, id: TierId) -> &Arc<dyn Tier> {
        match id {
            TierId::Primary => &self.tiers[0],
            TierId::PrimaryNoRedirect => &self.tiers[1],
            TierId::Fallback => &self.tiers[2],
            TierId::FallbackNoRedirect => &self.tiers[3],
        }
    }

    /// Run a prepared request through retry, fallback and validation
    pub async fn execute(&self, request: &RequestDescriptor, route: TierRoute) -> TransportResult {
        self.perform(request, route, Validation::Standard, None).await
    }

    /// [`EhTransport::execute`] that stops when `cancel` fires
    pub async fn execute_with_cancel(
        &self,
        request: &RequestDescriptor,
        route: TierRoute,
        cancel: &CancellationToken,
    ) -> TransportResult {
        self.perform(request, route, Validation::Standard, Some(cancel))
            .await
    }

    /// Full control over route, validation and cancellation
    #[instrument(
        name = "transport",
        skip(self, request, cancel),
        fields(method = %request.method(), url = %request.url())
    )]
    pub async fn perform(
        &self,
        request: &RequestDescriptor,
        route: TierRoute,
        validation: Validation,
        cancel: Option<&CancellationToken>,
    ) -> TransportResult {
        let pipeline = self.run(request, route, validation);
        match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        debug!("request cancelled");
                        Err(EhError::Cancelled)
                    }
                    result = pipeline => result,
                }
            }
            None => pipeline.await,
        }
    }

    async fn run(
        &self,
        request: &RequestDescriptor,
        route: TierRoute,
        validation: Validation,
    ) -> TransportResult {
        let origin = request.url();
        let primary = self.tier(route.primary());
        let response = match execute_with_retry(primary.id(), &self.retry, || {
            self.dispatch(primary.as_ref(), request, origin)
        })
        .await
        {
            Ok(response) => response,
            Err(error) => {
                let fallback = self.tier(route.fallback());
                self.fallback
                    .recover(request, error, |fronted| async move {
                        self.dispatch(fallback.as_ref(), &fronted, origin).await
                    })
                    .await?
            }
        };

        let request_url = (*request.method() == Method::GET).then_some(origin);
        let outcome = match validation {
            Validation::Standard => classify(response, request_url),
            Validation::Page => classify_page(response, request_url),
        };
        let result = outcome.into_result();
        match &result {
            Ok(response) => debug!(status = %response.status(), bytes = response.body().len(), "request complete"),
            Err(error) => debug!(error = %error, "request rejected"),
        }
        result
    }

    /// One attempt on one tier, with the cookies of `origin`
    async fn dispatch(
        &self,
        tier: &dyn Tier,
        request: &RequestDescriptor,
        origin: &Url,
    ) -> TransportResult {
        self.sanitizer.sanitize(self.jar.as_ref(), origin);
        let outgoing = match cookie_header(&self.jar.cookies_for(origin)) {
            Some(header) => request.with_cookies(&header)?,
            None => request.clone(),
        };

        let response = tier.send(&outgoing).await?;
        if tier.stores_cookies() {
            return Ok(response);
        }

        let stored = store_response_cookies(self.jar.as_ref(), origin, response.headers());
        if stored > 0 {
            trace!(tier = %tier.id(), stored, "cookies updated from response");
        }
        Ok(response)
    }

    /// GET a page or API endpoint
    pub async fn get(&self, url: &str, referer: Option<&str>) -> TransportResult {
        self.get_inner(url, referer, None).await
    }

    pub async fn get_with_cancel(
        &self,
        url: &str,
        referer: Option<&str>,
        cancel: &CancellationToken,
    ) -> TransportResult {
        self.get_inner(url, referer, Some(cancel)).await
    }

    async fn get_inner(
        &self,
        url: &str,
        referer: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> TransportResult {
        let request = self.builder.get(url, referer)?;
        self.perform(&request, TierRoute::FollowRedirects, Validation::Standard, cancel)
            .await
    }

    /// GET an image over the no-redirect tiers, with image-quota detection
    pub async fn get_image(&self, url: &str, referer: Option<&str>) -> TransportResult {
        self.get_image_inner(url, referer, None).await
    }

    pub async fn get_image_with_cancel(
        &self,
        url: &str,
        referer: Option<&str>,
        cancel: &CancellationToken,
    ) -> TransportResult {
        self.get_image_inner(url, referer, Some(cancel)).await
    }

    async fn get_image_inner(
        &self,
        url: &str,
        referer: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> TransportResult {
        let request = self.builder.image(url, referer)?;
        self.perform(&request, TierRoute::NoRedirect, Validation::Page, cancel)
            .await
    }

    /// GET without following redirects; 3xx comes back as success
    pub async fn get_no_redirect(&self, url: &str, referer: Option<&str>) -> TransportResult {
        self.get_no_redirect_inner(url, referer, None).await
    }

    pub async fn get_no_redirect_with_cancel(
        &self,
        url: &str,
        referer: Option<&str>,
        cancel: &CancellationToken,
    ) -> TransportResult {
        self.get_no_redirect_inner(url, referer, Some(cancel)).await
    }

    async fn get_no_redirect_inner(
        &self,
        url: &str,
        referer: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> TransportResult {
        let request = self.builder.get(url, referer)?;
        self.perform(&request, TierRoute::NoRedirect, Validation::Standard, cancel)
            .await
    }

    /// POST URL-form encoded fields
    pub async fn post_form(
        &self,
        url: &str,
        fields: &[(String, String)],
        referer: Option<&str>,
        origin: Option<&str>,
    ) -> TransportResult {
        let body = RequestBody::Form(fields.to_vec());
        self.post_inner(url, body, referer, origin, TierRoute::FollowRedirects, None)
            .await
    }

    pub async fn post_form_with_cancel(
        &self,
        url: &str,
        fields: &[(String, String)],
        referer: Option<&str>,
        origin: Option<&str>,
        cancel: &CancellationToken,
    ) -> TransportResult {
        let body = RequestBody::Form(fields.to_vec());
        self.post_inner(url, body, referer, origin, TierRoute::FollowRedirects, Some(cancel))
            .await
    }

    /// POST an already encoded form body
    pub async fn post_raw_form(
        &self,
        url: &str,
        body: &str,
        referer: Option<&str>,
        origin: Option<&str>,
    ) -> TransportResult {
        let body = RequestBody::RawForm(body.to_string());
        self.post_inner(url, body, referer, origin, TierRoute::FollowRedirects, None)
            .await
    }

    pub async fn post_raw_form_with_cancel(
        &self,
        url: &str,
        body: &str,
        referer: Option<&str>,
        origin: Option<&str>,
        cancel: &CancellationToken,
    ) -> TransportResult {
        let body = RequestBody::RawForm(body.to_string());
        self.post_inner(url, body, referer, origin, TierRoute::FollowRedirects, Some(cancel))
            .await
    }

    /// POST a JSON payload
    pub async fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
        referer: Option<&str>,
        origin: Option<&str>,
    ) -> TransportResult {
        let body = json_body(payload)?;
        self.post_inner(url, body, referer, origin, TierRoute::FollowRedirects, None)
            .await
    }

    pub async fn post_json_with_cancel<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
        referer: Option<&str>,
        origin: Option<&str>,
        cancel: &CancellationToken,
    ) -> TransportResult {
        let body = json_body(payload)?;
        self.post_inner(url, body, referer, origin, TierRoute::FollowRedirects, Some(cancel))
            .await
    }

    /// POST multipart/form-data over the no-redirect tiers
    pub async fn post_multipart(
        &self,
        url: &str,
        parts: Vec<MultipartPart>,
        referer: Option<&str>,
        origin: Option<&str>,
    ) -> TransportResult {
        let body = RequestBody::Multipart { parts, boundary: None };
        self.post_inner(url, body, referer, origin, TierRoute::NoRedirect, None)
            .await
    }

    pub async fn post_multipart_with_cancel(
        &self,
        url: &str,
        parts: Vec<MultipartPart>,
        referer: Option<&str>,
        origin: Option<&str>,
        cancel: &CancellationToken,
    ) -> TransportResult {
        let body = RequestBody::Multipart { parts, boundary: None };
        self.post_inner(url, body, referer, origin, TierRoute::NoRedirect, Some(cancel))
            .await
    }

    async fn post_inner(
        &self,
        url: &str,
        body: RequestBody,
        referer: Option<&str>,
        origin: Option<&str>,
        route: TierRoute,
        cancel: Option<&CancellationToken>,
    ) -> TransportResult {
        let options = HeaderOptions {
            referer: referer.map(str::to_string),
            origin: origin.map(str::to_string),
            ..HeaderOptions::default()
        };
        let request = self.builder.build(Method::POST, url, &options, body)?;
        self.perform(&request, route, Validation::Standard, cancel)
            .await
    }

    /// Follow a redirect returned by a no-redirect call.
    ///
    /// `request_url` resolves a relative `Location`. A response that is not
    /// a redirect is returned unchanged.
    pub async fn follow_redirect(
        &self,
        response: RawResponse,
        request_url: &Url,
        referer: Option<&str>,
    ) -> TransportResult {
        let Some(location) = response.location() else {
            return Ok(response);
        };
        let target = request_url
            .join(location)
            .map_err(|e| EhError::InvalidUrl {
                url: location.to_string(),
                reason: e.to_string(),
            })?;
        debug!(from = %request_url, to = %target, "following redirect");
        self.get(target.as_str(), referer).await
    }
}

fn json_body<T: serde::Serialize + ?Sized>(payload: &T) -> std::result::Result<RequestBody, EhError> {
    let json = serde_json::to_vec(payload)
        .map_err(|e| EhError::InvalidRequest(format!("failed to serialize JSON body: {e}")))?;
    Ok(RequestBody::Json(json.into()))
}

/// Assembles an [`EhTransport`], with hooks for replacing any collaborator
pub struct TransportBuilder {
    config: TransportConfig,
    jar: Option<Arc<dyn CookieJar>>,
    sanitizer: Option<Arc<dyn CookieSanitizer>>,
    table: Option<Arc<dyn FrontingTable>>,
    tiers: HashMap<TierId, Arc<dyn Tier>>,
}

impl TransportBuilder {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            jar: None,
            sanitizer: None,
            table: None,
            tiers: HashMap::new(),
        }
    }

    pub fn cookie_jar(mut self, jar: Arc<dyn CookieJar>) -> Self {
        self.jar = Some(jar);
        self
    }

    pub fn sanitizer(mut self, sanitizer: Arc<dyn CookieSanitizer>) -> Self {
        self.sanitizer = Some(sanitizer);
        self
    }

    pub fn fronting_table(mut self, table: Arc<dyn FrontingTable>) -> Self {
        self.table = Some(table);
        self
    }

    /// Use `tier` in place of the HTTP client for its id
    pub fn tier(mut self, tier: Arc<dyn Tier>) -> Self {
        self.tiers.insert(tier.id(), tier);
        self
    }

    pub fn build(mut self) -> Result<EhTransport> {
        let config = self.config;
        config.validate()?;

        let mut builder = RequestBuilder::new();
        if let Some(ua) = &config.user_agent {
            builder = builder
                .with_user_agent(ua)
                .map_err(|e| Error::config(e.to_string()))?;
        }

        let jar = match self.jar {
            Some(jar) => jar,
            None => Arc::new(crate::cookie::MemoryCookieJar::new()),
        };
        let cookie_store = Arc::new(JarCookieStore::new(jar.clone()));

        let mut make_tier = |id: TierId| -> Result<Arc<dyn Tier>> {
            if let Some(tier) = self.tiers.remove(&id) {
                return Ok(tier);
            }
            let options = TierOptions {
                timeouts: config.timeouts.for_tier(id),
                tls: config.tls.clone(),
                use_system_proxy: config.use_system_proxy,
                cookie_store: Some(cookie_store.clone()),
            };
            Ok(Arc::new(HttpTier::new(id, &options)?))
        };
        let tiers = [
            make_tier(TierId::Primary)?,
            make_tier(TierId::PrimaryNoRedirect)?,
            make_tier(TierId::Fallback)?,
            make_tier(TierId::FallbackNoRedirect)?,
        ];

        let table = match self.table {
            Some(table) => table,
            None => Arc::new(config.fronting_table()),
        };
        let sanitizer = match self.sanitizer {
            Some(sanitizer) => sanitizer,
            None => Arc::new(EhCookieSanitizer),
        };

        debug!(
            max_retries = config.retry.max_retries,
            fronting = config.fronting.enabled,
            "transport ready"
        );
        Ok(EhTransport {
            tiers,
            builder,
            jar,
            sanitizer,
            fallback: FallbackSelector::new(table, config.fronting.enabled),
            retry: config.retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookie::MemoryCookieJar;
    use crate::http::error::NetworkErrorCode;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use reqwest::header::{HeaderMap, HeaderValue, COOKIE, LOCATION};
    use reqwest::StatusCode;
    use std::time::Duration;

    /// Replays scripted results and records what it was sent
    struct ScriptedTier {
        id: TierId,
        script: Mutex<Vec<TransportResult>>,
        sent: Mutex<Vec<RequestDescriptor>>,
    }

    impl ScriptedTier {
        fn new(id: TierId, script: Vec<TransportResult>) -> Arc<Self> {
            Arc::new(Self {
                id,
                script: Mutex::new(script),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Tier for ScriptedTier {
        fn id(&self) -> TierId {
            self.id
        }

        async fn send(&self, request: &RequestDescriptor) -> TransportResult {
            self.sent.lock().push(request.clone());
            let mut script = self.script.lock();
            if script.is_empty() {
                return Ok(RawResponse::new(StatusCode::OK, HeaderMap::new(), "ok"));
            }
            script.remove(0)
        }
    }

    fn ok(body: &'static str) -> TransportResult {
        Ok(RawResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from(body)))
    }

    fn transport(tiers: &[Arc<ScriptedTier>], jar: Arc<MemoryCookieJar>) -> EhTransport {
        let mut config = TransportConfig::default();
        config.retry = RetryPolicy::default().with_backoff_unit(Duration::from_millis(10));
        config.fronting.builtin_hosts = false;
        let mut builder = EhTransport::builder(config).cookie_jar(jar);
        for tier in tiers {
            builder = builder.tier(tier.clone());
        }
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn test_cookies_attached_and_sanitized() {
        let jar = Arc::new(MemoryCookieJar::new());
        jar.set_cookie("ipb_member_id", "42", ".e-hentai.org", "/");
        jar.set_cookie("uconfig", "dm_t", ".e-hentai.org", "/");
        let primary = ScriptedTier::new(TierId::Primary, vec![ok("page")]);
        let transport = transport(&[primary.clone()], jar.clone());

        let response = transport.get("https://e-hentai.org/", None).await.unwrap();
        assert_eq!(response.body(), &Bytes::from("page"));

        let sent = primary.sent.lock();
        let cookie = sent[0].header_str(&COOKIE).unwrap().to_string();
        assert!(cookie.contains("ipb_member_id=42"));
        assert!(cookie.contains("nw=1"));
        assert!(!cookie.contains("uconfig"));
    }

    #[tokio::test]
    async fn test_set_cookie_stored_for_origin() {
        let mut headers = HeaderMap::new();
        headers.insert("set-cookie", HeaderValue::from_static("sk=abc; Path=/"));
        let primary = ScriptedTier::new(
            TierId::Primary,
            vec![Ok(RawResponse::new(StatusCode::OK, headers, "ok"))],
        );
        let jar = Arc::new(MemoryCookieJar::new());
        let transport = transport(&[primary], jar.clone());
        transport.get("https://exhentai.org/uconfig.php", None).await.unwrap();

        let url = Url::parse("https://exhentai.org/").unwrap();
        assert_eq!(jar.cookies_for(&url).get("sk").map(String::as_str), Some("abc"));
    }

    #[tokio::test]
    async fn test_route_selects_tiers() {
        let primary = ScriptedTier::new(TierId::Primary, vec![]);
        let no_redirect = ScriptedTier::new(TierId::PrimaryNoRedirect, vec![]);
        let transport = transport(
            &[primary.clone(), no_redirect.clone()],
            Arc::new(MemoryCookieJar::new()),
        );

        transport.get("https://exhentai.org/g/1/a/", None).await.unwrap();
        transport.get_image("https://ehgt.org/t/1.jpg", None).await.unwrap();
        transport
            .post_multipart(
                "https://upld.exhentai.org/upld/image_lookup.php",
                vec![MultipartPart::text("f_sfile", "search")],
                None,
                None,
            )
            .await
            .unwrap();

        assert_eq!(primary.sent.lock().len(), 1);
        assert_eq!(no_redirect.sent.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_follow_redirect() {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("/?f_shash=abc"));
        let redirect = RawResponse::new(StatusCode::FOUND, headers, Bytes::new());
        let primary = ScriptedTier::new(TierId::Primary, vec![ok("results")]);
        let transport = transport(&[primary.clone()], Arc::new(MemoryCookieJar::new()));

        let base = Url::parse("https://upld.e-hentai.org/image_lookup.php").unwrap();
        let response = transport.follow_redirect(redirect, &base, None).await.unwrap();
        assert_eq!(response.body(), &Bytes::from("results"));
        assert_eq!(
            primary.sent.lock()[0].url().as_str(),
            "https://upld.e-hentai.org/?f_shash=abc"
        );
    }

    #[tokio::test]
    async fn test_follow_redirect_passes_through_non_redirect() {
        let primary = ScriptedTier::new(TierId::Primary, vec![]);
        let transport = transport(&[primary.clone()], Arc::new(MemoryCookieJar::new()));
        let plain = RawResponse::new(StatusCode::OK, HeaderMap::new(), "done");
        let base = Url::parse("https://e-hentai.org/").unwrap();
        let response = transport.follow_redirect(plain.clone(), &base, None).await.unwrap();
        assert_eq!(response, plain);
        assert!(primary.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_url_never_dispatches() {
        let primary = ScriptedTier::new(TierId::Primary, vec![]);
        let transport = transport(&[primary.clone()], Arc::new(MemoryCookieJar::new()));
        let err = transport.get("not a url", None).await.unwrap_err();
        assert!(matches!(err, EhError::InvalidUrl { .. }));
        assert!(primary.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_already_cancelled_token() {
        let primary = ScriptedTier::new(TierId::Primary, vec![]);
        let transport = transport(&[primary.clone()], Arc::new(MemoryCookieJar::new()));
        let token = CancellationToken::new();
        token.cancel();
        let err = transport
            .get_with_cancel("https://e-hentai.org/", None, &token)
            .await
            .unwrap_err();
        assert_eq!(err, EhError::Cancelled);
        assert!(primary.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_http_error_is_not_retried() {
        let primary = ScriptedTier::new(
            TierId::Primary,
            vec![Ok(RawResponse::new(StatusCode::NOT_FOUND, HeaderMap::new(), "gone"))],
        );
        let transport = transport(&[primary.clone()], Arc::new(MemoryCookieJar::new()));
        let err = transport.get("https://e-hentai.org/g/0/x/", None).await.unwrap_err();
        assert!(matches!(err, EhError::HttpStatus { code: 404, .. }));
        assert_eq!(primary.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_network_error_without_fronting() {
        let primary = ScriptedTier::new(
            TierId::Primary,
            vec![
                Err(EhError::network(NetworkErrorCode::CannotConnectToHost, "refused")),
                Err(EhError::network(NetworkErrorCode::CannotConnectToHost, "refused")),
                Err(EhError::network(NetworkErrorCode::CannotConnectToHost, "refused")),
            ],
        );
        let fallback = ScriptedTier::new(TierId::Fallback, vec![]);
        let transport = transport(
            &[primary.clone(), fallback.clone()],
            Arc::new(MemoryCookieJar::new()),
        );
        let err = transport.get("https://unknown.test/", None).await.unwrap_err();
        assert_eq!(err.network_code(), Some(NetworkErrorCode::CannotConnectToHost));
        assert_eq!(primary.sent.lock().len(), 3);
        assert!(fallback.sent.lock().is_empty());
    }
}
