//! Prometheus exporter and frontend metric names.
//!
//! Engine metrics live in `wsrelay_hub::metrics`; this module adds the
//! handshake-level ones.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

use crate::errors::ServerError;

/// Install the global recorder with its own HTTP listener on `addr`.
///
/// Must be called from within a tokio runtime, once, before any metric is
/// recorded.
pub fn install_exporter(addr: SocketAddr) -> Result<(), ServerError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!(%addr, "prometheus exporter listening");
    Ok(())
}

/// Upgrade requests refused before the handshake (counter, labels: reason).
pub const HANDSHAKES_REJECTED_TOTAL: &str = "relay_handshakes_rejected_total";
/// Echo sessions started (counter).
pub const ECHO_SESSIONS_TOTAL: &str = "relay_echo_sessions_total";
/// `/ping` self-dials (counter, labels: outcome).
pub const PINGS_TOTAL: &str = "relay_pings_total";
/// `/ping` round trip in seconds (histogram).
pub const PING_DURATION_SECONDS: &str = "relay_ping_duration_seconds";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_renders_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            HANDSHAKES_REJECTED_TOTAL,
            ECHO_SESSIONS_TOTAL,
            PINGS_TOTAL,
            PING_DURATION_SECONDS,
        ];
        for name in names {
            assert!(name.starts_with("relay_"), "{name}");
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "{name}"
            );
        }
    }
}
