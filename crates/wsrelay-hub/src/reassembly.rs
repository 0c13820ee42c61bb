//! Chunk reassembly.
//!
//! Transports may hand a message over in several chunks. A [`Reassembler`]
//! buffers them until the end-of-message marker and only then produces a
//! [`Message`], so nothing is ever forwarded half-read.

use bytes::BytesMut;
use thiserror::Error;
use wsrelay_core::{Chunk, CloseFrame, Message, MessageKind};

/// A chunk sequence that cannot form a valid message.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReassemblyError {
    /// The accumulated message exceeded the size limit.
    #[error("message exceeds {limit} bytes")]
    TooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },
    /// A continuation chunk changed the message kind.
    #[error("message started as {started:?} but continued as {got:?}")]
    KindChanged {
        /// Kind of the first chunk.
        started: MessageKind,
        /// Kind of the offending chunk.
        got: MessageKind,
    },
}

impl ReassemblyError {
    /// Close frame to answer the peer with.
    pub fn close_frame(&self) -> CloseFrame {
        match self {
            Self::TooLarge { .. } => CloseFrame::new(CloseFrame::TOO_BIG, "Message too big"),
            Self::KindChanged { .. } => {
                CloseFrame::new(CloseFrame::PROTOCOL_ERROR, "Inconsistent message fragments")
            }
        }
    }
}

/// Accumulates chunks into whole messages.
#[derive(Debug, Default)]
pub struct Reassembler {
    limit: Option<usize>,
    buffer: BytesMut,
    kind: Option<MessageKind>,
}

impl Reassembler {
    /// Reassembler with an optional size limit on whole messages.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            buffer: BytesMut::new(),
            kind: None,
        }
    }

    /// Feed one chunk. Returns the message once its last chunk arrives.
    ///
    /// On error the partial message is discarded.
    pub fn push(&mut self, chunk: Chunk) -> Result<Option<Message>, ReassemblyError> {
        let Chunk {
            kind,
            data,
            end_of_message,
        } = chunk;

        let started = match self.kind {
            Some(started) if started != kind => {
                self.reset();
                return Err(ReassemblyError::KindChanged { started, got: kind });
            }
            Some(started) => started,
            None => kind,
        };

        let total = self.buffer.len() + data.len();
        if let Some(limit) = self.limit.filter(|&limit| total > limit) {
            self.reset();
            return Err(ReassemblyError::TooLarge { limit });
        }

        if end_of_message && self.kind.is_none() {
            return Ok(Some(Message::new(kind, data)));
        }

        self.buffer.extend_from_slice(&data);
        if !end_of_message {
            self.kind = Some(started);
            return Ok(None);
        }

        let payload = self.buffer.split().freeze();
        self.kind = None;
        Ok(Some(Message::new(started, payload)))
    }

    /// Whether a message is partly buffered.
    pub fn is_partial(&self) -> bool {
        self.kind.is_some()
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.kind = None;
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bytes::Bytes;

    use super::*;

    #[test]
    fn single_chunk_passes_through() {
        let mut r = Reassembler::new(None);
        let data = Bytes::from_static(b"hello");
        let msg = r.push(Chunk::last(MessageKind::Text, data.clone())).unwrap().unwrap();
        assert_eq!(msg.as_text(), Some("hello"));
        assert_eq!(msg.payload().as_ptr(), data.as_ptr());
        assert!(!r.is_partial());
    }

    #[test]
    fn joins_chunks_in_order() {
        let mut r = Reassembler::new(None);
        assert_eq!(r.push(Chunk::partial(MessageKind::Binary, vec![1u8; 4096])).unwrap(), None);
        assert!(r.is_partial());
        assert_eq!(r.push(Chunk::partial(MessageKind::Binary, vec![2u8; 4096])).unwrap(), None);
        let msg = r.push(Chunk::last(MessageKind::Binary, vec![3u8])).unwrap().unwrap();
        assert_eq!(msg.len(), 8193);
        assert_eq!(msg.payload()[0], 1);
        assert_eq!(msg.payload()[4096], 2);
        assert_eq!(msg.payload()[8192], 3);
        assert!(!r.is_partial());
    }

    #[test]
    fn empty_final_chunk_completes() {
        let mut r = Reassembler::new(None);
        let _ = r.push(Chunk::partial(MessageKind::Text, "ab")).unwrap();
        let msg = r.push(Chunk::last(MessageKind::Text, "")).unwrap().unwrap();
        assert_eq!(msg.as_text(), Some("ab"));
    }

    #[test]
    fn empty_message() {
        let mut r = Reassembler::new(Some(0));
        let msg = r.push(Chunk::last(MessageKind::Binary, Bytes::new())).unwrap().unwrap();
        assert!(msg.is_empty());
    }

    #[test]
    fn limit_counts_whole_message() {
        let mut r = Reassembler::new(Some(10));
        let _ = r.push(Chunk::partial(MessageKind::Binary, vec![0u8; 6])).unwrap();
        assert_matches!(
            r.push(Chunk::last(MessageKind::Binary, vec![0u8; 5])),
            Err(ReassemblyError::TooLarge { limit: 10 })
        );
        assert!(!r.is_partial());

        let msg = r.push(Chunk::last(MessageKind::Binary, vec![0u8; 10])).unwrap().unwrap();
        assert_eq!(msg.len(), 10);
    }

    #[test]
    fn kind_change_is_rejected() {
        let mut r = Reassembler::new(None);
        let _ = r.push(Chunk::partial(MessageKind::Text, "a")).unwrap();
        let err = r.push(Chunk::last(MessageKind::Binary, vec![1u8])).unwrap_err();
        assert_eq!(
            err,
            ReassemblyError::KindChanged {
                started: MessageKind::Text,
                got: MessageKind::Binary,
            }
        );
        assert_eq!(err.close_frame().code, CloseFrame::PROTOCOL_ERROR);
        assert!(!r.is_partial());
    }

    #[test]
    fn too_large_closes_with_1009() {
        let err = ReassemblyError::TooLarge { limit: 1 };
        assert_eq!(err.close_frame().code, 1009);
        assert_eq!(err.to_string(), "message exceeds 1 bytes");
    }
}
