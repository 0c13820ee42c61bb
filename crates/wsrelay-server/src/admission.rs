//! Handshake admission: shared-secret check, then the hub header.
//!
//! Runs before the upgrade completes, so a rejected client gets a plain HTTP
//! error and never touches the relay.

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use wsrelay_core::SessionKey;
use wsrelay_settings::SharedSecret;

/// Header carrying the session key (`X-HUB`; lowercase for `HeaderName`).
pub const HUB_HEADER: &str = "x-hub";

/// Why a handshake was refused.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    /// A secret is configured and the `Authorization` header does not match.
    #[error("Invalid or missing Authorization header.")]
    Unauthorized,
    /// The hub header is absent or empty.
    #[error("X-HUB header not found.")]
    MissingHub,
}

impl AdmissionError {
    /// HTTP status for this rejection.
    pub fn status(self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::MissingHub => StatusCode::BAD_REQUEST,
        }
    }

    /// Metric label.
    pub fn reason(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::MissingHub => "missing_hub",
        }
    }
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Check the handshake headers and extract the session key.
///
/// Authorization is checked first: an unauthorized client learns nothing
/// about the hub header.
pub fn admit(headers: &HeaderMap, api_key: Option<&SharedSecret>) -> Result<SessionKey, AdmissionError> {
    if let Some(secret) = api_key {
        let authorized = header_str(headers, AUTHORIZATION.as_str()).is_some_and(|v| secret.matches(v));
        if !authorized {
            return Err(AdmissionError::Unauthorized);
        }
    }
    header_str(headers, HUB_HEADER)
        .and_then(|hub| SessionKey::parse(hub).ok())
        .ok_or(AdmissionError::MissingHub)
}

/// Header value as UTF-8, if present.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| std::str::from_utf8(v.as_bytes()).ok())
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            let _ = map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn hub_header_is_required() {
        assert_eq!(admit(&headers(&[]), None), Err(AdmissionError::MissingHub));
        assert_eq!(
            admit(&headers(&[("x-hub", "")]), None),
            Err(AdmissionError::MissingHub)
        );
        assert_eq!(admit(&headers(&[("x-hub", "abc")]), None).unwrap().as_str(), "abc");
    }

    #[test]
    fn secret_is_checked_before_hub() {
        let secret = SharedSecret::new("k");
        assert_eq!(
            admit(&headers(&[]), Some(&secret)),
            Err(AdmissionError::Unauthorized)
        );
        assert_eq!(
            admit(&headers(&[("authorization", "nope"), ("x-hub", "abc")]), Some(&secret)),
            Err(AdmissionError::Unauthorized)
        );
        assert_eq!(
            admit(&headers(&[("authorization", "k")]), Some(&secret)),
            Err(AdmissionError::MissingHub)
        );
        assert!(admit(&headers(&[("authorization", "k"), ("x-hub", "abc")]), Some(&secret)).is_ok());
    }

    #[test]
    fn no_secret_means_no_auth() {
        assert!(admit(&headers(&[("authorization", "anything"), ("x-hub", "h")]), None).is_ok());
    }

    #[test]
    fn rejection_responses() {
        assert_eq!(AdmissionError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AdmissionError::MissingHub.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AdmissionError::Unauthorized.to_string(),
            "Invalid or missing Authorization header."
        );
        assert_eq!(AdmissionError::MissingHub.to_string(), "X-HUB header not found.");
        assert_eq!(
            AdmissionError::MissingHub.into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
