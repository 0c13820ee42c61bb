//! `/ping`: dial our own listener as a relay client and time the round trip.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use rand::Rng;
use thiserror::Error;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, InvalidHeaderValue};
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{info, warn};
use uuid::Uuid;
use wsrelay_settings::{RelaySettings, SharedSecret};

use crate::admission::{HUB_HEADER, header_str};
use crate::metrics::{PING_DURATION_SECONDS, PINGS_TOTAL};

/// Header carrying the platform pairing token on the self-dial.
pub const PAIRING_TOKEN_HEADER: &str = "x-pairing-token";

/// Body returned when the server has no address to dial.
pub const NO_ADDRESS: &str = "No server address supported.";

/// Self-dial settings.
#[derive(Clone, Debug)]
pub struct PingConfig {
    /// Sent as `Authorization` when set.
    pub api_key: Option<SharedSecret>,
    /// Sent as `X-Pairing-Token` when set.
    pub pairing_token: Option<SharedSecret>,
    /// Bound on the whole dial/send/close sequence.
    pub timeout: Duration,
    /// Random payload size.
    pub payload_bytes: usize,
}

impl PingConfig {
    /// Extract the self-dial settings.
    pub fn from_settings(settings: &RelaySettings) -> Self {
        Self {
            api_key: settings.auth.api_key.clone(),
            pairing_token: settings.diagnostics.pairing_token.clone(),
            timeout: Duration::from_millis(settings.diagnostics.ping_timeout_ms),
            payload_bytes: settings.diagnostics.ping_payload_bytes,
        }
    }
}

/// Why a self-dial failed.
#[derive(Debug, Error)]
pub enum PingError {
    /// Connecting, sending or closing failed.
    #[error("{0}")]
    Dial(Box<tungstenite::Error>),
    /// A configured header value is not a valid HTTP header value.
    #[error("invalid header value: {0}")]
    Header(#[from] InvalidHeaderValue),
    /// The sequence did not finish in time.
    #[error("ping timed out after {} ms", .0.as_millis())]
    TimedOut(Duration),
}

impl From<tungstenite::Error> for PingError {
    fn from(e: tungstenite::Error) -> Self {
        Self::Dial(Box::new(e))
    }
}

/// Handle `GET /ping`.
pub async fn respond(config: &PingConfig, self_addr: Option<SocketAddr>, headers: &HeaderMap) -> Response {
    let Some(addr) = self_addr else {
        counter!(PINGS_TOTAL, "outcome" => "unavailable").increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, NO_ADDRESS).into_response();
    };

    let uri = dial_uri(addr);
    let hub = header_str(headers, HUB_HEADER)
        .filter(|h| !h.is_empty())
        .map_or_else(|| format!("ping_{}", Uuid::now_v7()), str::to_string);

    info!(%uri, "pinging");
    match self_dial(config, &uri, &hub).await {
        Ok(elapsed) => {
            counter!(PINGS_TOTAL, "outcome" => "ok").increment(1);
            histogram!(PING_DURATION_SECONDS).record(elapsed.as_secs_f64());
            info!(%uri, elapsed_ms = elapsed_millis(elapsed), "ping acknowledged");
            Html(ack_page(elapsed)).into_response()
        }
        Err(error) => {
            counter!(PINGS_TOTAL, "outcome" => "failed").increment(1);
            warn!(%uri, %error, "ping failed");
            (StatusCode::SERVICE_UNAVAILABLE, format!("{error}: {uri}")).into_response()
        }
    }
}

/// Dial `uri` under session `hub`, send one random binary message, close
/// normally. Returns the elapsed time.
pub async fn self_dial(
    config: &PingConfig,
    uri: &str,
    hub: &str,
) -> Result<Duration, PingError> {
    let payload = random_payload(config.payload_bytes);
    let started = Instant::now();
    tokio::time::timeout(config.timeout, dial_and_send(config, uri, hub, payload))
        .await
        .map_err(|_| PingError::TimedOut(config.timeout))??;
    Ok(started.elapsed())
}

async fn dial_and_send(
    config: &PingConfig,
    uri: &str,
    hub: &str,
    payload: Vec<u8>,
) -> Result<(), PingError> {
    let mut request = uri.into_client_request()?;
    let headers = request.headers_mut();
    if let Some(key) = &config.api_key {
        let _ = headers.insert(AUTHORIZATION, HeaderValue::from_str(key.expose())?);
    }
    let _ = headers.insert(HeaderName::from_static(HUB_HEADER), HeaderValue::from_str(hub)?);
    if let Some(token) = &config.pairing_token {
        let _ = headers.insert(
            HeaderName::from_static(PAIRING_TOKEN_HEADER),
            HeaderValue::from_str(token.expose())?,
        );
    }

    let (mut ws, _response) = connect_async(request).await?;
    ws.send(tungstenite::Message::Binary(payload.into())).await?;
    ws.close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "Closing".into(),
    }))
    .await?;
    // Drain until the server's close reply ends the stream.
    while let Some(msg) = ws.next().await {
        if msg.is_err() {
            break;
        }
    }
    Ok(())
}

/// `ws://` URI for our own listener. Wildcard binds are dialled through
/// loopback.
pub fn dial_uri(addr: SocketAddr) -> String {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    format!("ws://{}/", SocketAddr::new(ip, addr.port()))
}

fn random_payload(len: usize) -> Vec<u8> {
    let mut payload = vec![0u8; len];
    rand::rng().fill(&mut payload[..]);
    payload
}

fn elapsed_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn ack_page(elapsed: Duration) -> String {
    format!(
        "<!DOCTYPE html>
<html>
<head>
    <meta charset='utf-8' />
    <title>WebSockets Relay</title>
</head>
<body>
    <p>ack in {} ms</p>
</body>
</html>
",
        elapsed_millis(elapsed)
    )
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn config() -> PingConfig {
        PingConfig::from_settings(&RelaySettings::default())
    }

    #[test]
    fn wildcard_binds_dial_loopback() {
        assert_eq!(dial_uri("0.0.0.0:8080".parse().unwrap()), "ws://127.0.0.1:8080/");
        assert_eq!(dial_uri("[::]:8080".parse().unwrap()), "ws://[::1]:8080/");
        assert_eq!(dial_uri("10.1.2.3:9000".parse().unwrap()), "ws://10.1.2.3:9000/");
    }

    #[test]
    fn ack_page_reports_millis() {
        let page = ack_page(Duration::from_millis(42));
        assert!(page.contains("ack in 42 ms"));
        assert!(page.starts_with("<!DOCTYPE html>"));
    }

    #[test]
    fn payload_has_requested_size() {
        assert_eq!(random_payload(8192).len(), 8192);
        assert!(random_payload(0).is_empty());
    }

    #[test]
    fn config_from_defaults() {
        let config = config();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.payload_bytes, 8192);
        assert!(config.api_key.is_none());
    }

    #[tokio::test]
    async fn no_address_is_unavailable() {
        let response = respond(&config(), None, &HeaderMap::new()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body.as_ref(), NO_ADDRESS.as_bytes());
    }

    #[tokio::test]
    async fn refused_dial_is_an_error() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let uri = format!("ws://127.0.0.1:{port}/");
        let result = self_dial(&config(), &uri, "hub").await;
        assert_matches!(result, Err(PingError::Dial(_)));
    }

    #[test]
    fn bad_header_value_is_reported() {
        let err = HeaderValue::from_str("bad\nvalue").unwrap_err();
        let err = PingError::from(err);
        assert!(err.to_string().starts_with("invalid header value"));
    }
}
