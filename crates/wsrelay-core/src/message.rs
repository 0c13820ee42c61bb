//! Relay messages.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Whether a payload travels as UTF-8 text or raw bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// UTF-8 text.
    Text,
    /// Arbitrary bytes.
    Binary,
}

/// One complete message, as reassembled from its transport chunks.
///
/// Cloning shares the payload buffer, so fanning a message out to many
/// mailboxes copies no bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    kind: MessageKind,
    payload: Bytes,
}

impl Message {
    /// Build a message of the given kind.
    ///
    /// A `Text` message whose payload is not valid UTF-8 is still relayed
    /// verbatim; transports decide what to do with it at send time.
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// A text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(MessageKind::Text, text.into())
    }

    /// A binary message.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(MessageKind::Binary, payload)
    }

    /// Payload kind.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Raw payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload as text, if this is a valid UTF-8 text message.
    pub fn as_text(&self) -> Option<&str> {
        match self.kind {
            MessageKind::Text => std::str::from_utf8(&self.payload).ok(),
            MessageKind::Binary => None,
        }
    }

    /// Split into kind and payload.
    pub fn into_parts(self) -> (MessageKind, Bytes) {
        (self.kind, self.payload)
    }
}
