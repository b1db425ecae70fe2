//! Response validation
//!
//! The origin reports most failures with a normal-looking response: a 9615
//! byte GIF of a sad panda, a page linking the kokomade image, or an empty
//! 200 for the secure root when the `igneous` cookie is bad. [`classify`]
//! turns a raw response into a typed outcome, checking in a fixed order so
//! that soft blocks win over whatever the status line says.

use crate::http::error::EhError;
use crate::http::tier::RawResponse;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::StatusCode;
use url::Url;

pub const SAD_PANDA_DISPOSITION: &str = "inline; filename=\"sadpanda.jpg\"";
pub const SAD_PANDA_TYPE: &str = "image/gif";
pub const SAD_PANDA_LENGTH: &str = "9615";
pub const KOKOMADE_URL: &str = "https://exhentai.org/img/kokomade.jpg";
pub const IMAGE_LIMIT_MARKER: &str = "/509.gif";
pub const SECURE_ORIGIN_HOST: &str = "exhentai.org";
/// Characters of body kept in `HttpStatus` errors
pub const BODY_SNIPPET_CHARS: usize = 512;

/// Soft-block flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftBlockKind {
    SadPanda,
    Kokomade,
}

/// Typed outcome of one response
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Success(RawResponse),
    SoftBlock(SoftBlockKind),
    HardError(EhError),
}

impl ResponseOutcome {
    pub fn into_result(self) -> Result<RawResponse, EhError> {
        match self {
            ResponseOutcome::Success(response) => Ok(response),
            ResponseOutcome::SoftBlock(SoftBlockKind::SadPanda) => Err(EhError::SoftBlockSadPanda),
            ResponseOutcome::SoftBlock(SoftBlockKind::Kokomade) => Err(EhError::SoftBlockKokomade),
            ResponseOutcome::HardError(err) => Err(err),
        }
    }
}

/// Classify a response.
///
/// `request_url` enables the empty-secure-root check; pass it for page
/// fetches of the gallery list.
pub fn classify(response: RawResponse, request_url: Option<&Url>) -> ResponseOutcome {
    if is_sad_panda(&response) {
        return ResponseOutcome::SoftBlock(SoftBlockKind::SadPanda);
    }
    if contains(response.body(), KOKOMADE_URL.as_bytes()) {
        return ResponseOutcome::SoftBlock(SoftBlockKind::Kokomade);
    }
    if response.status() == StatusCode::OK
        && response.body().is_empty()
        && request_url.map_or(false, is_secure_root)
    {
        return ResponseOutcome::HardError(EhError::InvalidSessionCookie);
    }
    if response.status().as_u16() >= 400 {
        return ResponseOutcome::HardError(EhError::HttpStatus {
            code: response.status().as_u16(),
            body_snippet: snippet(&response),
        });
    }
    ResponseOutcome::Success(response)
}

/// [`classify`] plus image-quota detection, for page and image fetches
pub fn classify_page(response: RawResponse, request_url: Option<&Url>) -> ResponseOutcome {
    let limit_reached = response.status().as_u16() == 509
        || contains(response.body(), IMAGE_LIMIT_MARKER.as_bytes());
    match classify(response, request_url) {
        ResponseOutcome::Success(_) | ResponseOutcome::HardError(EhError::HttpStatus { code: 509, .. })
            if limit_reached =>
        {
            ResponseOutcome::HardError(EhError::ImageLimitReached)
        }
        outcome => outcome,
    }
}

fn is_sad_panda(response: &RawResponse) -> bool {
    response.header_str(&CONTENT_DISPOSITION) == Some(SAD_PANDA_DISPOSITION)
        && response.header_str(&CONTENT_TYPE) == Some(SAD_PANDA_TYPE)
        && response.header_str(&CONTENT_LENGTH) == Some(SAD_PANDA_LENGTH)
}

fn is_secure_root(url: &Url) -> bool {
    url.scheme() == "https"
        && url.host_str() == Some(SECURE_ORIGIN_HOST)
        && url.port().is_none()
        && url.path() == "/"
        && url.query().is_none()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn snippet(response: &RawResponse) -> String {
    response
        .text_lossy()
        .chars()
        .take(BODY_SNIPPET_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::header::{HeaderMap, HeaderValue};

    fn response(status: u16, body: impl Into<Bytes>) -> RawResponse {
        RawResponse::new(StatusCode::from_u16(status).unwrap(), HeaderMap::new(), body)
    }

    fn sad_panda(status: u16) -> RawResponse {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_DISPOSITION, HeaderValue::from_static(SAD_PANDA_DISPOSITION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(SAD_PANDA_TYPE));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static(SAD_PANDA_LENGTH));
        RawResponse::new(
            StatusCode::from_u16(status).unwrap(),
            headers,
            Bytes::from(vec![0u8; 9615]),
        )
    }

    #[test]
    fn test_plain_success() {
        let outcome = classify(response(200, "<html>ok</html>"), None);
        assert!(matches!(outcome, ResponseOutcome::Success(_)));
    }

    #[test]
    fn test_sad_panda_regardless_of_status() {
        for status in [200, 403, 500] {
            assert_eq!(
                classify(sad_panda(status), None),
                ResponseOutcome::SoftBlock(SoftBlockKind::SadPanda)
            );
        }
    }

    #[test]
    fn test_partial_sad_panda_headers_are_not_a_block() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(SAD_PANDA_TYPE));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static(SAD_PANDA_LENGTH));
        let response = RawResponse::new(StatusCode::OK, headers, Bytes::from(vec![0u8; 9615]));
        assert!(matches!(classify(response, None), ResponseOutcome::Success(_)));
    }

    #[test]
    fn test_kokomade() {
        let body = "<img src=\"https://exhentai.org/img/kokomade.jpg\" />";
        assert_eq!(
            classify(response(200, body), None),
            ResponseOutcome::SoftBlock(SoftBlockKind::Kokomade)
        );
    }

    #[test]
    fn test_empty_secure_root() {
        for raw in ["https://exhentai.org/", "https://exhentai.org"] {
            let url = Url::parse(raw).unwrap();
            assert_eq!(
                classify(response(200, ""), Some(&url)),
                ResponseOutcome::HardError(EhError::InvalidSessionCookie)
            );
        }
    }

    #[test]
    fn test_empty_body_elsewhere_is_success() {
        let url = Url::parse("https://exhentai.org/g/1/abc/").unwrap();
        assert!(matches!(
            classify(response(200, ""), Some(&url)),
            ResponseOutcome::Success(_)
        ));
        assert!(matches!(
            classify(response(200, ""), None),
            ResponseOutcome::Success(_)
        ));
    }

    #[test]
    fn test_http_status_snippet_is_truncated() {
        match classify(response(503, "x".repeat(2000)), None) {
            ResponseOutcome::HardError(EhError::HttpStatus { code, body_snippet }) => {
                assert_eq!(code, 503);
                assert_eq!(body_snippet.chars().count(), BODY_SNIPPET_CHARS);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_redirect_is_success() {
        assert!(matches!(
            classify(response(302, ""), None),
            ResponseOutcome::Success(_)
        ));
    }

    #[test]
    fn test_image_limit() {
        assert_eq!(
            classify_page(response(509, ""), None),
            ResponseOutcome::HardError(EhError::ImageLimitReached)
        );
        assert_eq!(
            classify_page(response(200, "<img src=\"https://ehgt.org/g/509.gif\">"), None),
            ResponseOutcome::HardError(EhError::ImageLimitReached)
        );
        assert!(matches!(
            classify_page(response(200, "<html></html>"), None),
            ResponseOutcome::Success(_)
        ));
    }

    #[test]
    fn test_image_limit_does_not_mask_soft_block() {
        assert_eq!(
            classify_page(sad_panda(509), None),
            ResponseOutcome::SoftBlock(SoftBlockKind::SadPanda)
        );
    }

    #[test]
    fn test_outcome_into_result() {
        assert_eq!(
            ResponseOutcome::SoftBlock(SoftBlockKind::Kokomade).into_result(),
            Err(EhError::SoftBlockKokomade)
        );
    }
}
