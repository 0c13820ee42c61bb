//! Loopback diagnostic: everything the peer sends comes straight back.

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use wsrelay_core::{CloseFrame, Inbound, Outbound, TransportError};

use crate::connection::close_sink;

/// How an echo session ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EchoOutcome {
    /// The peer closed; this frame was sent back.
    PeerClosed(CloseFrame),
    /// The inbound stream ended without a close frame.
    StreamEnded,
    /// Receiving failed.
    ReceiveFailed(String),
    /// Sending a chunk back failed.
    SendFailed(String),
    /// `cancel` fired.
    Aborted,
}

/// Mirror every inbound chunk back unchanged, preserving kind and
/// end-of-message flag, until the peer closes.
pub async fn echo<S, K>(mut stream: S, mut sink: K, cancel: &CancellationToken) -> EchoOutcome
where
    S: Stream<Item = Result<Inbound, TransportError>> + Unpin,
    K: Sink<Outbound, Error = TransportError> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                close_sink(&mut sink, Some(CloseFrame::new(CloseFrame::GOING_AWAY, "Server shutting down"))).await;
                return EchoOutcome::Aborted;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Inbound::Chunk(chunk))) => {
                trace!(bytes = chunk.data.len(), end_of_message = chunk.end_of_message, "echo");
                if let Err(error) = sink.send(Outbound::Chunk(chunk)).await {
                    debug!(%error, "echo send failed");
                    close_sink(&mut sink, None).await;
                    return EchoOutcome::SendFailed(error.to_string());
                }
            }
            Some(Ok(Inbound::Close(frame))) => {
                let frame = frame.unwrap_or_else(CloseFrame::normal);
                close_sink(&mut sink, Some(frame.clone())).await;
                return EchoOutcome::PeerClosed(frame);
            }
            Some(Err(error)) => {
                debug!(%error, "echo receive failed");
                let frame = match error {
                    TransportError::MessageTooBig { .. } => {
                        CloseFrame::new(CloseFrame::TOO_BIG, "Message too big")
                    }
                    _ => CloseFrame::new(CloseFrame::INTERNAL_ERROR, "Failed to receive message"),
                };
                close_sink(&mut sink, Some(frame)).await;
                return EchoOutcome::ReceiveFailed(error.to_string());
            }
            None => {
                close_sink(&mut sink, None).await;
                return EchoOutcome::StreamEnded;
            }
        }
    }
}
