//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{LogFormat, RelaySettings, SharedSecret};

/// Environment variable naming the settings file.
pub const SETTINGS_ENV: &str = "WSRELAY_SETTINGS";

/// Settings file path from [`SETTINGS_ENV`], if set.
pub fn settings_path() -> Option<PathBuf> {
    read_env_string(SETTINGS_ENV).map(PathBuf::from)
}

/// Load settings from the file named by [`SETTINGS_ENV`] (if any) with env
/// var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    match settings_path() {
        Some(path) => load_settings_from_path(&path),
        None => finish(serde_json::to_value(RelaySettings::default())?),
    }
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    finish(merged)
}

fn finish(merged: Value) -> Result<RelaySettings> {
    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_env_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_env_overrides_from<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Auth / diagnostics ──────────────────────────────────────────
    if let Some(v) = env.string("API_KEY") {
        settings.auth.api_key = Some(SharedSecret::new(v));
    }
    if let Some(v) = env.string("PAIRING_TOKEN") {
        settings.diagnostics.pairing_token = Some(SharedSecret::new(v));
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("WSRELAY_HOST") {
        settings.server.host = v;
    }
    // Generic PORT first so the prefixed one wins when both are set.
    for name in ["PORT", "WSRELAY_PORT"] {
        if let Some(v) = env.parsed(name, |s| parse_u16_range(s, 1, 65535)) {
            settings.server.port = v;
        }
    }
    if let Some(v) = env.string("WSRELAY_STATIC_DIR") {
        settings.server.static_dir = v;
    }
    if let Some(v) = env.parsed("WSRELAY_MAX_MESSAGE_SIZE", |s| {
        parse_usize_range(s, 1, usize::MAX)
    }) {
        settings.server.max_message_size = Some(v);
    }

    // ── Relay ───────────────────────────────────────────────────────
    if let Some(v) = env.parsed("WSRELAY_MAILBOX_CAPACITY", |s| {
        parse_usize_range(s, 1, usize::MAX)
    }) {
        settings.relay.mailbox_capacity = Some(v);
    }

    // ── Logging / metrics ───────────────────────────────────────────
    if let Some(v) = env.parsed("WSRELAY_LOG_FORMAT", LogFormat::parse) {
        settings.logging.format = v;
    }
    if let Some(v) = env.parsed("WSRELAY_METRICS_ADDR", parse_socket_addr) {
        settings.metrics.listen = Some(v);
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse `host:port` into a socket address.
pub fn parse_socket_addr(val: &str) -> Option<SocketAddr> {
    val.trim().parse().ok()
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
