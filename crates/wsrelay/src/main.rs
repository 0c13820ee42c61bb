//! # wsrelay
//!
//! WebSocket relay server binary: loads settings, sets up logging and
//! metrics, then serves until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use wsrelay_server::{RelayServer, ServerError};
use wsrelay_settings::{RelaySettings, load_settings, load_settings_from_path};

/// WebSocket relay server.
#[derive(Parser, Debug)]
#[command(name = "wsrelay", about = "Relays WebSocket messages between members of a session")]
struct Cli {
    /// Settings file (JSON). Defaults to `$WSRELAY_SETTINGS`.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for ephemeral (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Static file directory (overrides settings).
    #[arg(long)]
    static_dir: Option<String>,
}

impl Cli {
    fn load(&self) -> Result<RelaySettings> {
        let mut settings = match &self.settings {
            Some(path) => load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => load_settings().context("Failed to load settings")?,
        };
        self.apply(&mut settings);
        Ok(settings)
    }

    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(dir) = &self.static_dir {
            settings.server.static_dir.clone_from(dir);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load()?;

    wsrelay_logging::init(&settings.logging).context("Failed to initialise logging")?;

    if let Some(addr) = settings.metrics.listen {
        wsrelay_server::metrics::install_exporter(addr)
            .context("Failed to start metrics exporter")?;
    }

    let server = RelayServer::new(settings);
    let (addr, handle) = match server.listen().await {
        Ok(bound) => bound,
        Err(error) => {
            log_bind_failure(&error);
            return Err(error).context("Failed to bind server");
        }
    };
    server.shutdown().track(handle);

    tracing::info!("wsrelay listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown().graceful_shutdown(None).await;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn log_bind_failure(error: &ServerError) {
    if error.is_address_in_use() {
        tracing::error!(%error, "address already in use; is another instance running?");
    } else {
        tracing::error!(%error, "server failed to start");
    }
}
