//! Adapter between axum's WebSocket and the relay's transport traits.
//!
//! axum hands over whole messages (tungstenite reassembles continuation
//! frames below us), so every inbound data message becomes one final
//! [`Chunk`]. Ping/pong never leave this module.
//!
//! The size limit is enforced by tungstenite while it reads; its capacity
//! error surfaces as [`TransportError::MessageTooBig`].

use axum::extract::ws::{
    CloseFrame as WsCloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade,
};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use tokio_tungstenite::tungstenite::error::{CapacityError, Error as WsError};
use wsrelay_core::{Chunk, CloseFrame, Inbound, Message, MessageKind, Outbound, TransportError};

/// Apply the configured size limit to an upgrade. `None` lifts the limit.
pub fn configure(upgrade: WebSocketUpgrade, max_message_size: Option<usize>) -> WebSocketUpgrade {
    let limit = max_message_size.unwrap_or(usize::MAX);
    upgrade.max_message_size(limit).max_frame_size(limit)
}

/// Split a socket into the relay's stream and sink halves.
pub fn split(
    socket: WebSocket,
) -> (
    impl Stream<Item = Result<Inbound, TransportError>> + Send + Unpin + 'static,
    impl Sink<Outbound, Error = TransportError> + Send + Unpin + 'static,
) {
    let (sink, stream) = socket.split();
    (inbound(stream), outbound(sink))
}

fn inbound(
    stream: SplitStream<WebSocket>,
) -> impl Stream<Item = Result<Inbound, TransportError>> + Send + Unpin + 'static {
    stream.filter_map(|msg| {
        future::ready(match msg {
            Ok(msg) => from_ws(msg).map(Ok),
            Err(e) => Some(Err(receive_error(&e))),
        })
    })
}

/// Classify a receive failure, looking through axum's wrapper for
/// tungstenite's size rejection.
fn receive_error(error: &axum::Error) -> TransportError {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = source {
        if let Some(WsError::Capacity(CapacityError::MessageTooLong { size, max_size })) =
            err.downcast_ref::<WsError>()
        {
            return TransportError::MessageTooBig {
                size: *size,
                limit: *max_size,
            };
        }
        source = err.source();
    }
    TransportError::Io(error.to_string())
}

fn outbound(
    sink: SplitSink<WebSocket, WsMessage>,
) -> impl Sink<Outbound, Error = TransportError> + Send + Unpin + 'static {
    sink.sink_map_err(|e| TransportError::Io(e.to_string()))
        .with(|out: Outbound| future::ready(to_ws(out)))
}

/// Map an axum message to an inbound item. Control frames map to `None`.
fn from_ws(msg: WsMessage) -> Option<Inbound> {
    match msg {
        WsMessage::Text(text) => Some(Inbound::Chunk(Chunk::whole(Message::new(
            MessageKind::Text,
            Bytes::copy_from_slice(text.as_str().as_bytes()),
        )))),
        WsMessage::Binary(data) => Some(Inbound::Chunk(Chunk::whole(Message::binary(data)))),
        WsMessage::Close(frame) => Some(Inbound::Close(
            frame.map(|f| CloseFrame::new(f.code, f.reason.as_str())),
        )),
        WsMessage::Ping(_) | WsMessage::Pong(_) => None,
    }
}

fn to_ws(out: Outbound) -> Result<WsMessage, TransportError> {
    match out {
        Outbound::Chunk(chunk) if !chunk.end_of_message => Err(TransportError::Unsupported(
            "partial messages cannot be sent over this transport",
        )),
        Outbound::Chunk(Chunk {
            kind: MessageKind::Text,
            data,
            ..
        }) => String::from_utf8(data.to_vec())
            .map(|text| WsMessage::Text(text.into()))
            .map_err(|_| TransportError::Protocol("text message is not valid UTF-8".into())),
        Outbound::Chunk(Chunk {
            kind: MessageKind::Binary,
            data,
            ..
        }) => Ok(WsMessage::Binary(data)),
        Outbound::Close(frame) => Ok(WsMessage::Close(Some(WsCloseFrame {
            code: frame.code,
            reason: frame.reason.into(),
        }))),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn text_becomes_final_text_chunk() {
        let inbound = from_ws(WsMessage::Text("hi".into())).unwrap();
        assert_eq!(
            inbound,
            Inbound::Chunk(Chunk::last(MessageKind::Text, "hi"))
        );
    }

    #[test]
    fn binary_becomes_final_binary_chunk() {
        let inbound = from_ws(WsMessage::Binary(Bytes::from_static(&[1, 2]))).unwrap();
        assert_eq!(
            inbound,
            Inbound::Chunk(Chunk::last(MessageKind::Binary, Bytes::from_static(&[1, 2])))
        );
    }

    #[test]
    fn control_frames_are_hidden() {
        assert!(from_ws(WsMessage::Ping(Bytes::new())).is_none());
        assert!(from_ws(WsMessage::Pong(Bytes::new())).is_none());
    }

    #[test]
    fn close_frame_maps_both_ways() {
        let inbound = from_ws(WsMessage::Close(Some(WsCloseFrame {
            code: 4001,
            reason: "bye".into(),
        })))
        .unwrap();
        assert_eq!(inbound, Inbound::Close(Some(CloseFrame::new(4001, "bye"))));
        assert_eq!(from_ws(WsMessage::Close(None)).unwrap(), Inbound::Close(None));

        let out = to_ws(Outbound::Close(CloseFrame::new(1001, "gone"))).unwrap();
        assert_matches!(out, WsMessage::Close(Some(f)) if f.code == 1001 && f.reason.as_str() == "gone");
    }

    #[test]
    fn whole_messages_are_sent() {
        let text = to_ws(Outbound::from(Message::text("hello"))).unwrap();
        assert_matches!(text, WsMessage::Text(t) if t.as_str() == "hello");
        let binary = to_ws(Outbound::from(Message::binary(vec![7u8]))).unwrap();
        assert_matches!(binary, WsMessage::Binary(b) if b.as_ref() == [7u8]);
    }

    #[test]
    fn partial_chunks_are_refused() {
        let err = to_ws(Outbound::Chunk(Chunk::partial(MessageKind::Binary, vec![1u8]))).unwrap_err();
        assert_matches!(err, TransportError::Unsupported(_));
    }

    #[test]
    fn size_rejection_is_recognised() {
        let error = axum::Error::new(WsError::Capacity(CapacityError::MessageTooLong {
            size: 64,
            max_size: 16,
        }));
        assert_eq!(
            receive_error(&error),
            TransportError::MessageTooBig { size: 64, limit: 16 }
        );
    }

    #[test]
    fn other_receive_failures_are_io() {
        let error = axum::Error::new(WsError::ConnectionClosed);
        assert_matches!(receive_error(&error), TransportError::Io(_));
        let error = axum::Error::new(WsError::Capacity(CapacityError::TooManyHeaders));
        assert_matches!(receive_error(&error), TransportError::Io(_));
    }

    #[test]
    fn invalid_utf8_text_is_refused() {
        let err = to_ws(Outbound::Chunk(Chunk::last(MessageKind::Text, vec![0xc3u8, 0x28])))
            .unwrap_err();
        assert_matches!(err, TransportError::Protocol(_));
    }
}
