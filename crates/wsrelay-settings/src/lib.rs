//! # wsrelay-settings
//!
//! Configuration for the relay server, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//! 3. **Environment variables**: `API_KEY`, `PAIRING_TOKEN`, `WSRELAY_*`
//!    (highest priority)
//!
//! ```no_run
//! let settings = wsrelay_settings::load_settings()?;
//! println!("listening on {}:{}", settings.server.host, settings.server.port);
//! # Ok::<(), wsrelay_settings::SettingsError>(())
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    SETTINGS_ENV, apply_env_overrides, apply_env_overrides_from, deep_merge, load_settings,
    load_settings_from_path, settings_path,
};
pub use types::*;
