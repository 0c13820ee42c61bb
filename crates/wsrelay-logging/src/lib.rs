//! # wsrelay-logging
//!
//! Installs the global `tracing` subscriber: an [`EnvFilter`] built from
//! `RUST_LOG` (when set) or the configured level plus per-module overrides,
//! and a `fmt` layer writing pretty or JSON lines to stderr.

#![deny(unsafe_code)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use wsrelay_settings::{LogFormat, LoggingSettings};

/// Errors from [`init`].
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The filter directive did not parse.
    #[error("invalid log filter {directive:?}: {message}")]
    InvalidFilter {
        /// The offending directive.
        directive: String,
        /// Parser message.
        message: String,
    },
    /// A global subscriber is already installed.
    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

/// Filter directive for `settings`, e.g. `info,wsrelay_hub=debug`.
pub fn filter_directive(settings: &LoggingSettings) -> String {
    let mut directive = settings.level.as_filter_str().to_string();
    for (module, level) in &settings.modules {
        directive.push(',');
        directive.push_str(module);
        directive.push('=');
        directive.push_str(level.as_filter_str());
    }
    directive
}

fn build_filter(settings: &LoggingSettings) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = filter_directive(settings);
    EnvFilter::try_new(&directive).map_err(|e| LoggingError::InvalidFilter {
        directive,
        message: e.to_string(),
    })
}

/// Install the global subscriber. Call once at startup.
pub fn init(settings: &LoggingSettings) -> Result<(), LoggingError> {
    let filter = build_filter(settings)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match settings.format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    installed.map_err(|_| LoggingError::AlreadyInitialized)
}
