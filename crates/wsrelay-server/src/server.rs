//! `RelayServer`: binds the listener and serves the gateway.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use wsrelay_hub::{MailboxCapacity, Relay, RelayOptions};
use wsrelay_settings::RelaySettings;

use crate::errors::ServerError;
use crate::gateway::{self, AppState};
use crate::ping::PingConfig;
use crate::shutdown::ShutdownCoordinator;

/// The relay server.
#[derive(Debug)]
pub struct RelayServer {
    settings: RelaySettings,
    relay: Relay,
    shutdown: Arc<ShutdownCoordinator>,
}

impl RelayServer {
    /// Create a server; nothing is bound until [`listen`](Self::listen).
    pub fn new(settings: RelaySettings) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let options = RelayOptions {
            mailbox_capacity: MailboxCapacity::from_limit(settings.relay.mailbox_capacity),
            max_message_size: settings.server.max_message_size,
        };
        let relay = Relay::with_shutdown(options, shutdown.token());
        Self {
            settings,
            relay,
            shutdown,
        }
    }

    /// Build the router. `self_addr` is what `/ping` dials.
    pub fn router(&self, self_addr: Option<SocketAddr>) -> Router {
        let state = AppState {
            relay: self.relay.clone(),
            api_key: self.settings.auth.api_key.clone(),
            max_message_size: self.settings.server.max_message_size,
            static_files: ServeDir::new(&self.settings.server.static_dir),
            ping: Arc::new(PingConfig::from_settings(&self.settings)),
            self_addr,
            shutdown: self.shutdown.token(),
        };

        Router::new()
            .fallback(gateway::handle)
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind `host:port` and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the server task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let host = self.settings.server.host.as_str();
        let port = self.settings.server.port;
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: format!("{host}:{port}"),
                source,
            })?;
        let addr = listener.local_addr()?;

        let router = self.router(Some(addr));
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(%error, "server error");
            }
        });

        info!(%addr, "relay listening");
        Ok((addr, handle))
    }

    /// Relay engine.
    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Settings the server was built with.
    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }
}
