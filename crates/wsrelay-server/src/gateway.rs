//! Single fallback handler in front of every request.
//!
//! Upgrades are admitted and routed to the relay or the echo loop; plain
//! requests go to `/ping` or to the static file directory.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::{debug, warn};
use wsrelay_hub::{Relay, echo};
use wsrelay_settings::SharedSecret;

use crate::admission::admit;
use crate::metrics::{ECHO_SESSIONS_TOTAL, HANDSHAKES_REJECTED_TOTAL};
use crate::ping::{self, PingConfig};
use crate::transport;

/// Shared state of the gateway handler.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Relay engine.
    pub relay: Relay,
    /// Secret required in `Authorization`, if any.
    pub api_key: Option<SharedSecret>,
    /// Upgrade size limit.
    pub max_message_size: Option<usize>,
    /// Static file service.
    pub static_files: ServeDir,
    /// `/ping` settings.
    pub ping: Arc<PingConfig>,
    /// Our own bound address, dialled by `/ping`.
    pub self_addr: Option<SocketAddr>,
    /// Parent of every echo session's token.
    pub shutdown: CancellationToken,
}

/// Where a request goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// Upgrade joining a relay session.
    Relay,
    /// Upgrade to the loopback echo.
    Echo,
    /// Self-dial diagnostic.
    Ping,
    /// Static file lookup.
    Static,
}

/// Pick a route from the request path and whether it is an upgrade.
pub fn route_for(path: &str, is_upgrade: bool) -> Route {
    match (is_upgrade, path) {
        (true, p) if p.eq_ignore_ascii_case("/echo") => Route::Echo,
        (true, _) => Route::Relay,
        (false, p) if p.eq_ignore_ascii_case("/ping") => Route::Ping,
        (false, _) => Route::Static,
    }
}

/// Router fallback: every request lands here.
pub async fn handle(State(state): State<AppState>, request: Request) -> Response {
    let (mut parts, body) = request.into_parts();
    let upgrade = WebSocketUpgrade::from_request_parts(&mut parts, &state)
        .await
        .ok();

    match (route_for(parts.uri.path(), upgrade.is_some()), upgrade) {
        (route @ (Route::Relay | Route::Echo), Some(upgrade)) => {
            accept(&state, &parts.headers, upgrade, route)
        }
        (Route::Ping, _) => ping::respond(&state.ping, state.self_addr, &parts.headers).await,
        _ => serve_static(state.static_files, Request::from_parts(parts, body)).await,
    }
}

fn accept(state: &AppState, headers: &HeaderMap, upgrade: WebSocketUpgrade, route: Route) -> Response {
    let session = match admit(headers, state.api_key.as_ref()) {
        Ok(session) => session,
        Err(rejection) => {
            counter!(HANDSHAKES_REJECTED_TOTAL, "reason" => rejection.reason()).increment(1);
            warn!(reason = rejection.reason(), "handshake rejected");
            return rejection.into_response();
        }
    };

    let upgrade = transport::configure(upgrade, state.max_message_size)
        .on_failed_upgrade(|error: axum::Error| warn!(%error, "websocket upgrade failed"));

    if route == Route::Echo {
        counter!(ECHO_SESSIONS_TOTAL).increment(1);
        let cancel = state.shutdown.child_token();
        return upgrade.on_upgrade(move |socket| async move {
            let (stream, sink) = transport::split(socket);
            let outcome = echo(stream, sink, &cancel).await;
            debug!(session = %session, ?outcome, "echo finished");
        });
    }

    let relay = state.relay.clone();
    upgrade.on_upgrade(move |socket| async move {
        let (stream, sink) = transport::split(socket);
        let _ = relay.register(session).run(stream, sink).await;
    })
}

async fn serve_static(files: ServeDir, request: Request) -> Response {
    match files.oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrades_route_to_relay_or_echo() {
        assert_eq!(route_for("/", true), Route::Relay);
        assert_eq!(route_for("/anything/at/all", true), Route::Relay);
        assert_eq!(route_for("/echo", true), Route::Echo);
        assert_eq!(route_for("/ECHO", true), Route::Echo);
        assert_eq!(route_for("/ping", true), Route::Relay);
    }

    #[test]
    fn plain_requests_route_to_ping_or_static() {
        assert_eq!(route_for("/ping", false), Route::Ping);
        assert_eq!(route_for("/Ping", false), Route::Ping);
        assert_eq!(route_for("/echo", false), Route::Static);
        assert_eq!(route_for("/index.html", false), Route::Static);
        assert_eq!(route_for("/", false), Route::Static);
    }
}
