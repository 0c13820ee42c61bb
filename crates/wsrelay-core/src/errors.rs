//! Error types shared across the relay.

use thiserror::Error;

/// A transport could not deliver or produce a frame.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The socket is already closed.
    #[error("connection closed")]
    Closed,
    /// The underlying I/O failed.
    #[error("transport I/O failed: {0}")]
    Io(String),
    /// An inbound message exceeded the transport's size limit.
    #[error("message of {size} bytes exceeds {limit} bytes")]
    MessageTooBig {
        /// Size the transport saw when it gave up.
        size: usize,
        /// Configured limit in bytes.
        limit: usize,
    },
    /// The peer violated the wire protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// The transport cannot express the requested operation.
    #[error("unsupported by transport: {0}")]
    Unsupported(&'static str),
}

/// A session key was empty.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("session key must not be empty")]
pub struct InvalidSessionKey;
