//! # wsrelay-server
//!
//! HTTP and WebSocket frontend for the relay engine.
//!
//! - [`gateway`]: single fallback handler routing upgrades, `/ping` and
//!   static files
//! - [`admission`]: shared-secret and `X-HUB` checks before any upgrade
//! - [`transport`]: axum `WebSocket` to relay `Stream`/`Sink` adapter
//! - [`ping`]: self-dial latency check
//! - [`shutdown`]: cancellation-token based shutdown coordination
//! - [`metrics`]: Prometheus exporter and frontend metric names

#![deny(unsafe_code)]

pub mod admission;
pub mod errors;
pub mod gateway;
pub mod metrics;
pub mod ping;
pub mod server;
pub mod shutdown;
pub mod transport;

pub use admission::{AdmissionError, HUB_HEADER, admit};
pub use errors::ServerError;
pub use gateway::{AppState, Route, route_for};
pub use ping::{PingConfig, PingError};
pub use server::RelayServer;
pub use shutdown::ShutdownCoordinator;
