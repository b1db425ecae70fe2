//! Retry, fallback and validation behaviour of the transport, driven through
//! scripted tiers so that no network is involved.

use async_trait::async_trait;
use bytes::Bytes;
use ehnet_core::cookie::{CookieJar, CookieSanitizer, MemoryCookieJar};
use ehnet_core::hosts::StaticFrontingTable;
use ehnet_core::http::builder::{form_encode_component, RequestBuilder, RequestDescriptor};
use ehnet_core::http::validator::{SAD_PANDA_DISPOSITION, SAD_PANDA_LENGTH, SAD_PANDA_TYPE};
use ehnet_core::http::{
    EhError, EhTransport, NetworkErrorCode, RawResponse, RetryPolicy, StatusCode, Tier, TierId,
    TierRoute,
};
use ehnet_core::TransportConfig;
use parking_lot::Mutex;
use proptest::prelude::*;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

type Outcome = Result<RawResponse, EhError>;

/// A tier that replays a script and records every request it receives
struct FakeTier {
    id: TierId,
    script: Mutex<Vec<Outcome>>,
    sent: Mutex<Vec<(RequestDescriptor, Instant)>>,
}

impl FakeTier {
    fn new(id: TierId, script: Vec<Outcome>) -> Arc<Self> {
        Arc::new(Self {
            id,
            script: Mutex::new(script),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<RequestDescriptor> {
        self.sent.lock().iter().map(|(r, _)| r.clone()).collect()
    }

    fn times(&self) -> Vec<Instant> {
        self.sent.lock().iter().map(|(_, t)| *t).collect()
    }
}

#[async_trait]
impl Tier for FakeTier {
    fn id(&self) -> TierId {
        self.id
    }

    async fn send(&self, request: &RequestDescriptor) -> Outcome {
        self.sent.lock().push((request.clone(), Instant::now()));
        let mut script = self.script.lock();
        if script.is_empty() {
            return Err(EhError::network(NetworkErrorCode::Other, "script exhausted"));
        }
        script.remove(0)
    }
}

/// Counts calls and otherwise leaves the jar alone
#[derive(Default)]
struct CountingSanitizer {
    calls: AtomicUsize,
}

impl CookieSanitizer for CountingSanitizer {
    fn sanitize(&self, _jar: &dyn CookieJar, _url: &Url) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn timeout() -> EhError {
    EhError::network(NetworkErrorCode::TimedOut, "operation timed out")
}

fn ok(body: &'static str) -> Outcome {
    Ok(RawResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from(body)))
}

fn fronting(host: &str, ip: &str) -> Arc<StaticFrontingTable> {
    let mut hosts = BTreeMap::new();
    hosts.insert(host.to_string(), vec![ip.parse::<IpAddr>().unwrap()]);
    Arc::new(StaticFrontingTable::empty().with_user_hosts(&hosts))
}

struct Harness {
    transport: EhTransport,
    primary: Arc<FakeTier>,
    fallback: Arc<FakeTier>,
    sanitizer: Arc<CountingSanitizer>,
    jar: Arc<MemoryCookieJar>,
}

fn harness(primary: Vec<Outcome>, fallback: Vec<Outcome>, table: Arc<StaticFrontingTable>) -> Harness {
    harness_with(TransportConfig::default(), primary, fallback, table)
}

fn harness_with(
    config: TransportConfig,
    primary: Vec<Outcome>,
    fallback: Vec<Outcome>,
    table: Arc<StaticFrontingTable>,
) -> Harness {
    let primary = FakeTier::new(TierId::Primary, primary);
    let fallback = FakeTier::new(TierId::Fallback, fallback);
    let sanitizer = Arc::new(CountingSanitizer::default());
    let jar = Arc::new(MemoryCookieJar::new());
    let transport = EhTransport::builder(config)
        .tier(primary.clone())
        .tier(fallback.clone())
        .sanitizer(sanitizer.clone())
        .cookie_jar(jar.clone())
        .fronting_table(table)
        .build()
        .unwrap();
    Harness {
        transport,
        primary,
        fallback,
        sanitizer,
        jar,
    }
}

#[tokio::test(start_paused = true)]
async fn retry_bound_and_linear_delays() {
    let h = harness(
        vec![Err(timeout()), Err(timeout()), Err(timeout())],
        vec![],
        Arc::new(StaticFrontingTable::empty()),
    );
    let started = Instant::now();
    let err = h.transport.get("https://example-origin/x", None).await.unwrap_err();

    assert_eq!(err, timeout());
    let times = h.primary.times();
    assert_eq!(times.len(), 3);
    assert_eq!(times[0] - started, Duration::ZERO);
    assert_eq!(times[1] - times[0], Duration::from_millis(1500));
    assert_eq!(times[2] - times[1], Duration::from_millis(3000));
}

#[tokio::test(start_paused = true)]
async fn no_fronting_address_means_no_fallback_attempt() {
    let h = harness(
        vec![Err(timeout()), Err(timeout()), Err(timeout())],
        vec![ok("never")],
        Arc::new(StaticFrontingTable::empty()),
    );
    let err = h.transport.get("https://example-origin/x", None).await.unwrap_err();
    assert_eq!(err.network_code(), Some(NetworkErrorCode::TimedOut));
    assert_eq!(h.primary.requests().len(), 3);
    assert!(h.fallback.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn fronted_attempt_after_exhaustion() {
    let h = harness(
        vec![Err(timeout()), Err(timeout()), Err(timeout())],
        vec![ok("fronted body")],
        fronting("example-origin", "203.0.113.5"),
    );
    let response = h.transport.get("https://example-origin/x", None).await.unwrap();

    let fallback = h.fallback.requests();
    assert_eq!(fallback.len(), 1);
    assert_eq!(fallback[0].url().as_str(), "https://203.0.113.5/x");
    assert_eq!(fallback[0].header_str(&HOST), Some("example-origin"));

    // indistinguishable from a primary response
    let expected = RawResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from("fronted body"));
    assert_eq!(response, expected);
}

#[tokio::test(start_paused = true)]
async fn fallback_only_after_the_last_retry() {
    let h = harness(
        vec![Err(timeout()), Err(timeout()), Err(timeout())],
        vec![ok("fronted")],
        fronting("example-origin", "203.0.113.5"),
    );
    h.transport.get("https://example-origin/x", None).await.unwrap();
    let last_primary = *h.primary.times().last().unwrap();
    let fallback_at = h.fallback.times()[0];
    assert!(fallback_at >= last_primary);
    assert_eq!(h.primary.requests().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn double_failure_reports_the_primary_error() {
    let h = harness(
        vec![Err(timeout()), Err(timeout()), Err(timeout())],
        vec![Err(EhError::network(
            NetworkErrorCode::SecureConnectionFailed,
            "certificate not valid for name",
        ))],
        fronting("example-origin", "203.0.113.5"),
    );
    let err = h.transport.get("https://example-origin/x", None).await.unwrap_err();
    assert_eq!(err, timeout());
    assert_eq!(h.fallback.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn errors_outside_the_trigger_set_do_not_fall_back() {
    let offline = || EhError::network(NetworkErrorCode::NotConnectedToInternet, "offline");
    let h = harness(
        vec![Err(offline()), Err(offline()), Err(offline())],
        vec![ok("never")],
        fronting("example-origin", "203.0.113.5"),
    );
    let err = h.transport.get("https://example-origin/x", None).await.unwrap_err();
    assert_eq!(err, offline());
    assert_eq!(h.primary.requests().len(), 3);
    assert!(h.fallback.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn disabled_fronting_keeps_the_primary_error() {
    let mut config = TransportConfig::default();
    config.fronting.enabled = false;
    let h = harness_with(
        config,
        vec![Err(timeout()), Err(timeout()), Err(timeout())],
        vec![ok("never")],
        fronting("example-origin", "203.0.113.5"),
    );
    let err = h.transport.get("https://example-origin/x", None).await.unwrap_err();
    assert_eq!(err, timeout());
    assert!(h.fallback.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn http_errors_neither_retry_nor_fall_back() {
    let h = harness(
        vec![Ok(RawResponse::new(StatusCode::SERVICE_UNAVAILABLE, HeaderMap::new(), "busy"))],
        vec![ok("never")],
        fronting("example-origin", "203.0.113.5"),
    );
    let err = h.transport.get("https://example-origin/x", None).await.unwrap_err();
    assert!(matches!(err, EhError::HttpStatus { code: 503, .. }));
    assert_eq!(h.primary.requests().len(), 1);
    assert!(h.fallback.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn retries_resend_identical_requests() {
    let h = harness(
        vec![Err(timeout()), Err(timeout()), Err(timeout())],
        vec![ok("fronted")],
        fronting("example-origin", "203.0.113.5"),
    );
    let fields = vec![("apikey".to_string(), "a b&c".to_string())];
    h.transport
        .post_form("https://example-origin/api.php", &fields, Some("https://example-origin/"), None)
        .await
        .unwrap();

    let primary = h.primary.requests();
    for request in &primary[1..] {
        assert_eq!(request.method(), primary[0].method());
        assert_eq!(request.url(), primary[0].url());
        assert_eq!(request.headers(), primary[0].headers());
        assert_eq!(request.body(), primary[0].body());
    }

    let fronted = &h.fallback.requests()[0];
    assert_eq!(fronted.body(), primary[0].body());
    assert_eq!(fronted.url().path(), primary[0].url().path());
    let mut headers = fronted.headers().clone();
    headers.remove(HOST);
    assert_eq!(&headers, primary[0].headers());
}

#[tokio::test(start_paused = true)]
async fn sanitizer_runs_once_per_attempt() {
    let h = harness(
        vec![Err(timeout()), Err(timeout()), Err(timeout())],
        vec![ok("fronted")],
        fronting("example-origin", "203.0.113.5"),
    );
    h.transport.get("https://example-origin/x", None).await.unwrap();
    assert_eq!(h.sanitizer.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn fronted_request_carries_the_session() {
    let h = harness(
        vec![Err(timeout()), Err(timeout()), Err(timeout())],
        vec![ok("fronted")],
        fronting("example-origin", "203.0.113.5"),
    );
    h.jar.set_cookie("ipb_member_id", "42", "example-origin", "/");
    h.transport.get("https://example-origin/x", None).await.unwrap();
    let fronted = &h.fallback.requests()[0];
    assert_eq!(fronted.header_str(&COOKIE), Some("ipb_member_id=42"));
}

#[tokio::test(start_paused = true)]
async fn soft_block_wins_over_status() {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_DISPOSITION, HeaderValue::from_static(SAD_PANDA_DISPOSITION));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(SAD_PANDA_TYPE));
    headers.insert(CONTENT_LENGTH, HeaderValue::from_static(SAD_PANDA_LENGTH));
    let panda = RawResponse::new(StatusCode::OK, headers, Bytes::from(vec![0u8; 9615]));

    let h = harness(vec![Ok(panda)], vec![], Arc::new(StaticFrontingTable::empty()));
    let err = h.transport.get("https://exhentai.org/", None).await.unwrap_err();
    assert_eq!(err, EhError::SoftBlockSadPanda);
    assert!(err.is_soft_block());
    assert_eq!(h.primary.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_secure_root_is_a_bad_session() {
    let h = harness(vec![ok("")], vec![], Arc::new(StaticFrontingTable::empty()));
    let err = h.transport.get("https://exhentai.org/", None).await.unwrap_err();
    assert_eq!(err, EhError::InvalidSessionCookie);
}

#[tokio::test(start_paused = true)]
async fn soft_block_from_the_fallback_path_is_still_detected() {
    let kokomade = Ok(RawResponse::new(
        StatusCode::OK,
        HeaderMap::new(),
        Bytes::from("<img src=\"https://exhentai.org/img/kokomade.jpg\">"),
    ));
    let h = harness(
        vec![Err(timeout()), Err(timeout()), Err(timeout())],
        vec![kokomade],
        fronting("exhentai.org", "178.175.128.251"),
    );
    let err = h.transport.get("https://exhentai.org/g/1/a/", None).await.unwrap_err();
    assert_eq!(err, EhError::SoftBlockKokomade);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_backoff() {
    let h = harness(
        vec![Err(timeout()), Err(timeout()), Err(timeout())],
        vec![ok("never")],
        fronting("example-origin", "203.0.113.5"),
    );
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let request = RequestBuilder::new().get("https://example-origin/x", None).unwrap();
    let started = Instant::now();
    let err = h
        .transport
        .execute_with_cancel(&request, TierRoute::FollowRedirects, &token)
        .await
        .unwrap_err();

    assert_eq!(err, EhError::Cancelled);
    assert_eq!(started.elapsed(), Duration::from_millis(500));
    assert_eq!(h.primary.requests().len(), 1);
    assert!(h.fallback.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn zero_retries_goes_straight_to_fallback() {
    let mut config = TransportConfig::default();
    config.retry = RetryPolicy::disabled();
    let h = harness_with(
        config,
        vec![Err(EhError::network(NetworkErrorCode::CannotFindHost, "no such host"))],
        vec![ok("fronted")],
        fronting("example-origin", "203.0.113.5"),
    );
    let started = Instant::now();
    h.transport.get("https://example-origin/x", None).await.unwrap();
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(h.primary.requests().len(), 1);
    assert_eq!(h.fallback.requests().len(), 1);
}

fn form_decode(encoded: &str) -> Vec<u8> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap();
                out.push(u8::from_str_radix(hex, 16).unwrap());
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    out
}

proptest! {
    #[test]
    fn form_encoding_is_reversible(input in "\\PC*") {
        let encoded = form_encode_component(&input);
        prop_assert!(encoded.bytes().all(|b| b.is_ascii_alphanumeric() || b"-_.*+%".contains(&b)));
        prop_assert_eq!(form_decode(&encoded), input.as_bytes().to_vec());
    }

    #[test]
    fn fronting_keeps_path_and_query(
        path in "(/[a-z0-9]{1,8}){0,4}",
        query in proptest::option::of("[a-z]{1,5}=[a-z0-9]{0,5}"),
        port in proptest::option::of(1024u16..65535),
        ip in any::<[u8; 4]>(),
    ) {
        let mut url = String::from("https://example-origin");
        if let Some(port) = port {
            url.push_str(&format!(":{port}"));
        }
        url.push_str(if path.is_empty() { "/" } else { &path });
        if let Some(query) = &query {
            url.push('?');
            url.push_str(query);
        }
        let request = RequestBuilder::new().get(&url, None).unwrap();
        let ip = IpAddr::from(ip);
        let fronted = request.fronted(ip).unwrap();

        prop_assert_eq!(fronted.url().path(), request.url().path());
        prop_assert_eq!(fronted.url().query(), request.url().query());
        prop_assert_eq!(fronted.url().scheme(), "https");
        prop_assert_eq!(fronted.url().port(), request.url().port());
        let ip_str = ip.to_string();
        prop_assert_eq!(fronted.url().host_str(), Some(ip_str.as_str()));
        let expected_host = match port {
            Some(port) => format!("example-origin:{port}"),
            None => "example-origin".to_string(),
        };
        prop_assert_eq!(fronted.header_str(&HOST), Some(expected_host.as_str()));
    }
}
