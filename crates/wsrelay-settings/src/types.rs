//! Settings types.
//!
//! Every section derives `Default` with the compiled defaults and uses
//! `#[serde(default)]`, so a settings file only needs the keys it changes.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener and static file settings.
    pub server: ServerSettings,
    /// Relay engine tuning.
    pub relay: HubSettings,
    /// Shared-secret authorization.
    pub auth: AuthSettings,
    /// `/ping` self-dial settings.
    pub diagnostics: DiagnosticsSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Prometheus exporter.
    pub metrics: MetricsSettings,
}

impl RelaySettings {
    /// Reject values that deserialize fine but cannot be used.
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(invalid("server.host", "must not be empty"));
        }
        if self.server.static_dir.trim().is_empty() {
            return Err(invalid("server.staticDir", "must not be empty"));
        }
        if self.server.max_message_size == Some(0) {
            return Err(invalid("server.maxMessageSize", "must be at least 1"));
        }
        if self.relay.mailbox_capacity == Some(0) {
            return Err(invalid("relay.mailboxCapacity", "must be at least 1"));
        }
        if self.diagnostics.ping_timeout_ms == 0 {
            return Err(invalid("diagnostics.pingTimeoutMs", "must be at least 1"));
        }
        if self.diagnostics.ping_payload_bytes == 0 {
            return Err(invalid("diagnostics.pingPayloadBytes", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &'static str) -> SettingsError {
    SettingsError::Invalid { field, reason }
}

/// Listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port; 0 picks an ephemeral port.
    pub port: u16,
    /// Directory served for plain (non-upgrade) requests.
    pub static_dir: String,
    /// Largest accepted message in bytes. `None` means bounded only by memory.
    pub max_message_size: Option<usize>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            static_dir: "wwwroot".to_string(),
            max_message_size: None,
        }
    }
}

/// Relay engine tuning.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Per-connection outbound queue depth. `None` means unbounded; with a
    /// limit, messages arriving at a full queue are dropped.
    pub mailbox_capacity: Option<usize>,
}

/// Shared-secret authorization.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Value the `Authorization` header must carry. `None` disables the check.
    pub api_key: Option<SharedSecret>,
}

/// `/ping` diagnostic settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiagnosticsSettings {
    /// Forwarded as `X-Pairing-Token` on the self-dial.
    pub pairing_token: Option<SharedSecret>,
    /// Upper bound on the whole self-dial round trip.
    pub ping_timeout_ms: u64,
    /// Size of the random payload sent by the self-dial.
    pub ping_payload_bytes: usize,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            pairing_token: None,
            ping_timeout_ms: 10_000,
            ping_payload_bytes: 8192,
        }
    }
}

/// Log level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace-level (most verbose).
    Trace,
    /// Debug-level.
    Debug,
    /// Info-level (default).
    #[default]
    Info,
    /// Warning-level.
    Warn,
    /// Error-level.
    Error,
}

impl LogLevel {
    /// Convert to a tracing filter string.
    pub fn as_filter_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Log line format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, multi-line.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parse `pretty` or `json` (case-insensitive).
    pub fn parse(val: &str) -> Option<Self> {
        match val.to_ascii_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level for every target.
    pub level: LogLevel,
    /// Output format.
    pub format: LogFormat,
    /// Per-target overrides, e.g. `{"wsrelay_hub": "debug"}`.
    pub modules: BTreeMap<String, LogLevel>,
}

/// Prometheus exporter settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsSettings {
    /// Address of the exporter's own HTTP listener. `None` disables it.
    pub listen: Option<SocketAddr>,
}

/// A secret string. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SharedSecret(String);

impl SharedSecret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The secret itself.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether `candidate` equals the secret.
    pub fn matches(&self, candidate: &str) -> bool {
        self.0 == candidate
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(***)")
    }
}
