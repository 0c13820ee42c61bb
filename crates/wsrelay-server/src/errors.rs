//! Server error types.

use std::io;

use thiserror::Error;

/// Errors from starting the server.
///
/// Per-connection failures never surface here; they end in a
/// `ConnectionReport`.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not bind.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Any other listener I/O failure.
    #[error("server I/O error: {0}")]
    Io(#[from] io::Error),
    /// The metrics exporter could not be installed.
    #[error("failed to install metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

impl ServerError {
    /// Whether this is a bind failure because the address is taken.
    pub fn is_address_in_use(&self) -> bool {
        matches!(self, Self::Bind { source, .. } if source.kind() == io::ErrorKind::AddrInUse)
    }
}
