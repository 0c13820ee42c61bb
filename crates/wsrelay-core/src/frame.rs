//! Transport-facing units: chunks in, chunks out, close frames.
//!
//! A transport adapter turns its socket into a `Stream` of [`Inbound`] and a
//! `Sink` of [`Outbound`]. Control frames (ping/pong) stay inside the
//! adapter and never show up here.

use bytes::Bytes;

use crate::message::{Message, MessageKind};

/// One fragment of a message as it arrived on (or leaves through) the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// Kind of the message this chunk belongs to.
    pub kind: MessageKind,
    /// Fragment bytes.
    pub data: Bytes,
    /// Set on the last fragment of a message.
    pub end_of_message: bool,
}

impl Chunk {
    /// A single chunk carrying a whole message.
    pub fn whole(message: Message) -> Self {
        let (kind, data) = message.into_parts();
        Self {
            kind,
            data,
            end_of_message: true,
        }
    }

    /// A non-final fragment.
    pub fn partial(kind: MessageKind, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            data: data.into(),
            end_of_message: false,
        }
    }

    /// The final fragment of a message.
    pub fn last(kind: MessageKind, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            data: data.into(),
            end_of_message: true,
        }
    }
}

/// Status code and reason carried by a close handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseFrame {
    /// RFC 6455 status code.
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
}

impl CloseFrame {
    /// 1000: the purpose of the connection was fulfilled.
    pub const NORMAL: u16 = 1000;
    /// 1001: the endpoint is going away or can no longer be reached.
    pub const GOING_AWAY: u16 = 1001;
    /// 1002: the peer broke the protocol.
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// 1009: a message exceeded the configured size.
    pub const TOO_BIG: u16 = 1009;
    /// 1011: an unexpected condition on this side.
    pub const INTERNAL_ERROR: u16 = 1011;

    /// Build a close frame.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Normal closure with an empty reason.
    pub fn normal() -> Self {
        Self::new(Self::NORMAL, "")
    }

    /// Status used when a message could not be delivered to this endpoint.
    pub fn endpoint_unavailable(reason: impl Into<String>) -> Self {
        Self::new(Self::GOING_AWAY, reason)
    }

    /// Whether this is a normal closure.
    pub fn is_normal(&self) -> bool {
        self.code == Self::NORMAL
    }
}

/// What a transport yields to the relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A data fragment.
    Chunk(Chunk),
    /// The peer started (or completed) the close handshake.
    Close(Option<CloseFrame>),
}

/// What the relay hands to a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// A data fragment. The relay only ever sends whole messages.
    Chunk(Chunk),
    /// Close the socket with this status.
    Close(CloseFrame),
}

impl From<Message> for Outbound {
    fn from(message: Message) -> Self {
        Self::Chunk(Chunk::whole(message))
    }
}
