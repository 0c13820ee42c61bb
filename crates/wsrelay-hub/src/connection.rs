//! Per-connection relay handler.
//!
//! A [`Relay`] owns the shared [`SessionRegistry`] and hands out one
//! [`Connection`] per admitted socket. [`Connection::run`] drives the
//! connection through `Registered → Relaying → Draining → Closed`:
//!
//! - the read loop runs on the caller's task, reassembles chunks and posts
//!   every complete message into the other members' mailboxes;
//! - the write loop runs as its own task and is the single consumer of this
//!   connection's mailbox.
//!
//! Whichever loop finishes first calls the shared teardown, which is
//! idempotent: unregister, close the mailbox, cancel the connection's token.
//! A drop guard calls it too, so a `run` future dropped mid-flight still
//! leaves the registry clean.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, trace, warn};
use wsrelay_core::{
    CloseFrame, ConnectionId, Inbound, Message, Outbound, SessionKey, TransportError,
};

use crate::mailbox::{Mailbox, MailboxCapacity, PostOutcome, Postbox, mailbox};
use crate::metrics::{
    CONNECTION_DURATION_SECONDS, CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED_TOTAL,
    CONNECTIONS_OPENED_TOTAL, DELIVERIES_DROPPED_TOTAL, DELIVERIES_QUEUED_TOTAL,
    MESSAGES_RECEIVED_TOTAL, MESSAGES_SENT_TOTAL, SEND_FAILURES_TOTAL,
};
use crate::reassembly::{Reassembler, ReassemblyError};
use crate::registry::{Member, SessionRegistry};

/// Upper bound on the close handshake; a peer that never reads cannot hold
/// teardown open.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

const SEND_FAILED_REASON: &str = "Failed to broadcast message to client";
const SHUTDOWN_REASON: &str = "Server shutting down";

/// Tunables shared by every connection of a [`Relay`].
#[derive(Clone, Debug, Default)]
pub struct RelayOptions {
    /// Outbound queue policy per connection.
    pub mailbox_capacity: MailboxCapacity,
    /// Largest reassembled message accepted; `None` means unlimited.
    pub max_message_size: Option<usize>,
}

/// Entry point of the engine: registry plus connection factory.
#[derive(Clone, Debug)]
pub struct Relay {
    registry: Arc<SessionRegistry>,
    options: RelayOptions,
    shutdown: CancellationToken,
}

impl Relay {
    /// Relay with its own, never-cancelled shutdown token.
    pub fn new(options: RelayOptions) -> Self {
        Self::with_shutdown(options, CancellationToken::new())
    }

    /// Relay whose connections are all aborted when `shutdown` is cancelled.
    pub fn with_shutdown(options: RelayOptions, shutdown: CancellationToken) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            options,
            shutdown,
        }
    }

    /// Shared session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Options every new connection is built with.
    pub fn options(&self) -> &RelayOptions {
        &self.options
    }

    /// Admit a connection into `session`.
    ///
    /// The connection is a member (and receives broadcasts into its
    /// mailbox) as soon as this returns, before `run` is called.
    pub fn register(&self, session: SessionKey) -> Connection {
        let id = ConnectionId::new();
        let (postbox, mailbox) = mailbox(self.options.mailbox_capacity);
        let registered = self
            .registry
            .register(&session, Member::new(id.clone(), postbox.clone()));
        debug_assert!(registered, "fresh connection id already registered");

        counter!(CONNECTIONS_OPENED_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        debug!(connection_id = %id, session = %session, "connection registered");

        let lifecycle = Arc::new(Lifecycle {
            id,
            session,
            registry: Arc::clone(&self.registry),
            postbox,
            cancel: self.shutdown.child_token(),
            state: Arc::new(AtomicU8::new(ConnectionState::Registered as u8)),
            done: AtomicBool::new(false),
            cause: Mutex::new(None),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            deliveries_dropped: AtomicU64::new(0),
            opened_at: Instant::now(),
        });

        Connection {
            guard: ShutdownGuard(lifecycle),
            mailbox,
            reassembler: Reassembler::new(self.options.max_message_size),
        }
    }
}

/// Lifecycle position of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Transport handshake in progress (owned by the frontend).
    Connecting = 0,
    /// Member of its session; loops not started yet.
    Registered = 1,
    /// Both loops active.
    Relaying = 2,
    /// One loop exited; the other is winding down.
    Draining = 3,
    /// Both loops exited, socket closed.
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Registered,
            2 => Self::Relaying,
            3 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

/// Read-only view of a connection's state that outlives the connection.
#[derive(Clone, Debug)]
pub struct StateWatch(Arc<AtomicU8>);

impl StateWatch {
    /// Current state.
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }
}

/// What ended a connection. The first teardown caller decides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShutdownCause {
    /// The peer sent a close frame.
    PeerClosed(Option<CloseFrame>),
    /// The inbound stream ended without a close frame.
    StreamEnded,
    /// The transport failed while receiving.
    ReceiveFailed(String),
    /// The peer sent chunks that do not form a valid message.
    ProtocolViolation(ReassemblyError),
    /// The transport failed while sending to this connection.
    SendFailed(String),
    /// Cancelled from outside (server shutdown or a dropped handler).
    Aborted,
}

impl ShutdownCause {
    /// Close frame to send the peer, if any is still owed.
    pub fn close_frame(&self) -> Option<CloseFrame> {
        match self {
            Self::PeerClosed(frame) => Some(frame.clone().unwrap_or_else(CloseFrame::normal)),
            Self::ReceiveFailed(_) => Some(CloseFrame::new(
                CloseFrame::INTERNAL_ERROR,
                "Failed to receive message",
            )),
            Self::ProtocolViolation(err) => Some(err.close_frame()),
            Self::Aborted => Some(CloseFrame::new(CloseFrame::GOING_AWAY, SHUTDOWN_REASON)),
            Self::StreamEnded | Self::SendFailed(_) => None,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PeerClosed(_) => "peer_closed",
            Self::StreamEnded => "stream_ended",
            Self::ReceiveFailed(_) => "receive_failed",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::SendFailed(_) => "send_failed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for ShutdownCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed(Some(frame)) => {
                write!(f, "peer closed ({} {})", frame.code, frame.reason)
            }
            Self::PeerClosed(None) => f.write_str("peer closed"),
            Self::StreamEnded => f.write_str("stream ended"),
            Self::ReceiveFailed(e) => write!(f, "receive failed: {e}"),
            Self::ProtocolViolation(e) => write!(f, "protocol violation: {e}"),
            Self::SendFailed(e) => write!(f, "send failed: {e}"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// Summary returned by [`Connection::run`].
#[derive(Clone, Debug)]
pub struct ConnectionReport {
    /// Connection id.
    pub id: ConnectionId,
    /// Session the connection belonged to.
    pub session: SessionKey,
    /// What ended it.
    pub cause: ShutdownCause,
    /// Complete messages read from the peer.
    pub messages_received: u64,
    /// Messages written to the peer.
    pub messages_sent: u64,
    /// This connection's broadcasts that a peer mailbox refused.
    pub deliveries_dropped: u64,
    /// Messages addressed to this connection that its mailbox refused.
    pub inbox_dropped: u64,
}

struct Lifecycle {
    id: ConnectionId,
    session: SessionKey,
    registry: Arc<SessionRegistry>,
    postbox: Postbox,
    cancel: CancellationToken,
    state: Arc<AtomicU8>,
    done: AtomicBool,
    cause: Mutex<Option<ShutdownCause>>,
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    deliveries_dropped: AtomicU64,
    opened_at: Instant,
}

impl Lifecycle {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = ConnectionState::from_u8(self.state.swap(next as u8, Ordering::AcqRel));
        if prev != next {
            debug!(connection_id = %self.id, from = ?prev, to = ?next, "connection state");
        }
    }

    /// Teardown. Returns `true` for the one call that performed it.
    fn shutdown(&self, cause: ShutdownCause) -> bool {
        if self.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.set_state(ConnectionState::Draining);

        let removed = self.registry.unregister(&self.session, &self.id);
        self.postbox.close();
        self.cancel.cancel();

        gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
        counter!(CONNECTIONS_CLOSED_TOTAL, "cause" => cause.kind()).increment(1);
        histogram!(CONNECTION_DURATION_SECONDS).record(self.opened_at.elapsed().as_secs_f64());
        debug!(
            connection_id = %self.id,
            session = %self.session,
            removed,
            cause = %cause,
            "connection draining"
        );

        *self.cause.lock() = Some(cause);
        true
    }

    fn cause(&self) -> ShutdownCause {
        self.cause.lock().clone().unwrap_or(ShutdownCause::Aborted)
    }
}

/// Runs teardown when the connection is dropped, whatever state it is in.
struct ShutdownGuard(Arc<Lifecycle>);

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let _ = self.0.shutdown(ShutdownCause::Aborted);
    }
}

/// One admitted connection, registered and ready to run.
pub struct Connection {
    guard: ShutdownGuard,
    mailbox: Mailbox,
    reassembler: Reassembler,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.guard.0.id)
            .field("session", &self.guard.0.session)
            .field("state", &self.guard.0.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.guard.0.id
    }

    /// Session this connection belongs to.
    pub fn session(&self) -> &SessionKey {
        &self.guard.0.session
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.guard.0.state()
    }

    /// Handle for observing the state after `run` has consumed `self`.
    pub fn state_watch(&self) -> StateWatch {
        StateWatch(Arc::clone(&self.guard.0.state))
    }

    /// This connection's cancellation signal. Cancelling it aborts only
    /// this connection.
    pub fn cancel_token(&self) -> CancellationToken {
        self.guard.0.cancel.clone()
    }

    /// Relay until the connection ends, then close the socket.
    ///
    /// `stream` and `sink` are the two halves of one socket. Never fails:
    /// how the connection ended is in the returned report.
    pub async fn run<S, K>(self, stream: S, sink: K) -> ConnectionReport
    where
        S: Stream<Item = Result<Inbound, TransportError>> + Send + Unpin + 'static,
        K: Sink<Outbound, Error = TransportError> + Send + Unpin + 'static,
    {
        let Connection {
            guard,
            mailbox,
            reassembler,
        } = self;
        let lifecycle = Arc::clone(&guard.0);
        let span = info_span!(
            "connection",
            connection_id = %lifecycle.id,
            session = %lifecycle.session,
        );

        async move {
            lifecycle.set_state(ConnectionState::Relaying);
            info!("connection open");

            let writer = tokio::spawn(
                write_loop(mailbox, sink, Arc::clone(&lifecycle)).instrument(Span::current()),
            );
            let cause = read_loop(stream, reassembler, &lifecycle).await;
            let _ = lifecycle.shutdown(cause);

            let sink = match writer.await {
                Ok(sink) => Some(sink),
                Err(error) => {
                    warn!(%error, "write loop task failed");
                    None
                }
            };

            let cause = lifecycle.cause();
            if let Some(mut sink) = sink {
                if !matches!(cause, ShutdownCause::SendFailed(_)) {
                    close_sink(&mut sink, cause.close_frame()).await;
                }
            }
            lifecycle.set_state(ConnectionState::Closed);

            let report = ConnectionReport {
                id: lifecycle.id.clone(),
                session: lifecycle.session.clone(),
                cause,
                messages_received: lifecycle.messages_received.load(Ordering::Relaxed),
                messages_sent: lifecycle.messages_sent.load(Ordering::Relaxed),
                deliveries_dropped: lifecycle.deliveries_dropped.load(Ordering::Relaxed),
                inbox_dropped: lifecycle.postbox.dropped(),
            };
            info!(
                cause = %report.cause,
                received = report.messages_received,
                sent = report.messages_sent,
                "connection closed"
            );
            drop(guard);
            report
        }
        .instrument(span)
        .await
    }
}

async fn read_loop<S>(
    mut stream: S,
    mut reassembler: Reassembler,
    lifecycle: &Lifecycle,
) -> ShutdownCause
where
    S: Stream<Item = Result<Inbound, TransportError>> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            () = lifecycle.cancel.cancelled() => return ShutdownCause::Aborted,
            next = stream.next() => next,
        };

        let chunk = match next {
            None => return ShutdownCause::StreamEnded,
            // The transport enforced the size limit before we could.
            Some(Err(TransportError::MessageTooBig { size, limit })) => {
                warn!(size, limit, "message too big");
                return ShutdownCause::ProtocolViolation(ReassemblyError::TooLarge { limit });
            }
            Some(Err(error)) => {
                debug!(%error, "receive failed");
                return ShutdownCause::ReceiveFailed(error.to_string());
            }
            Some(Ok(Inbound::Close(frame))) => return ShutdownCause::PeerClosed(frame),
            Some(Ok(Inbound::Chunk(chunk))) => chunk,
        };

        trace!(
            bytes = chunk.data.len(),
            end_of_message = chunk.end_of_message,
            "chunk received"
        );
        match reassembler.push(chunk) {
            Ok(Some(message)) => broadcast(lifecycle, message),
            Ok(None) => {}
            Err(error) => {
                warn!(%error, "invalid message from peer");
                return ShutdownCause::ProtocolViolation(error);
            }
        }
    }
}

fn broadcast(lifecycle: &Lifecycle, message: Message) {
    let _ = lifecycle.messages_received.fetch_add(1, Ordering::Relaxed);
    counter!(MESSAGES_RECEIVED_TOTAL).increment(1);

    let peers = lifecycle
        .registry
        .members_excluding(&lifecycle.session, &lifecycle.id);
    let mut queued = 0u64;
    for peer in &peers {
        match peer.post(message.clone()) {
            PostOutcome::Queued => queued += 1,
            PostOutcome::Dropped(reason) => {
                let _ = lifecycle.deliveries_dropped.fetch_add(1, Ordering::Relaxed);
                counter!(DELIVERIES_DROPPED_TOTAL, "reason" => reason.as_str()).increment(1);
                debug!(peer = %peer.id(), reason = reason.as_str(), "delivery dropped");
            }
        }
    }
    counter!(DELIVERIES_QUEUED_TOTAL).increment(queued);
    trace!(
        bytes = message.len(),
        kind = ?message.kind(),
        peers = peers.len(),
        queued,
        "message broadcast"
    );
}

async fn write_loop<K>(mut mailbox: Mailbox, mut sink: K, lifecycle: Arc<Lifecycle>) -> K
where
    K: Sink<Outbound, Error = TransportError> + Unpin,
{
    loop {
        let message = tokio::select! {
            biased;
            () = lifecycle.cancel.cancelled() => break,
            next = mailbox.recv() => match next {
                Some(message) => message,
                None => break,
            },
        };

        let bytes = message.len();
        let sent = tokio::select! {
            biased;
            () = lifecycle.cancel.cancelled() => break,
            sent = sink.send(Outbound::from(message)) => sent,
        };

        match sent {
            Ok(()) => {
                let _ = lifecycle.messages_sent.fetch_add(1, Ordering::Relaxed);
                counter!(MESSAGES_SENT_TOTAL).increment(1);
                trace!(bytes, "message sent");
            }
            Err(error) => {
                warn!(%error, "send failed, dropping connection from session");
                counter!(SEND_FAILURES_TOTAL).increment(1);
                let _ = lifecycle.shutdown(ShutdownCause::SendFailed(error.to_string()));
                close_sink(
                    &mut sink,
                    Some(CloseFrame::endpoint_unavailable(SEND_FAILED_REASON)),
                )
                .await;
                break;
            }
        }
    }
    mailbox.close();
    sink
}

/// Send an optional close frame, then close the sink. Failures are logged
/// and swallowed: the socket is going away either way.
pub(crate) async fn close_sink<K>(sink: &mut K, frame: Option<CloseFrame>)
where
    K: Sink<Outbound, Error = TransportError> + Unpin,
{
    let closing = async {
        if let Some(frame) = frame {
            sink.send(Outbound::Close(frame)).await?;
        }
        sink.close().await?;
        Ok::<_, TransportError>(())
    };
    match tokio::time::timeout(CLOSE_TIMEOUT, closing).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => debug!(%error, "close failed"),
        Err(_) => debug!("close timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> SessionKey {
        SessionKey::parse(s).unwrap()
    }

    #[test]
    fn register_joins_session() {
        let relay = Relay::new(RelayOptions::default());
        let conn = relay.register(key("hub"));
        assert_eq!(conn.state(), ConnectionState::Registered);
        assert_eq!(relay.registry().member_count(&key("hub")), 1);
        assert!(conn.id().as_str().starts_with("conn_"));
        assert_eq!(conn.session().as_str(), "hub");
    }

    #[test]
    fn dropping_unrun_connection_unregisters() {
        let relay = Relay::new(RelayOptions::default());
        let conn = relay.register(key("hub"));
        let watch = conn.state_watch();
        let token = conn.cancel_token();
        drop(conn);
        assert_eq!(relay.registry().member_count(&key("hub")), 0);
        assert_eq!(relay.registry().session_count(), 0);
        assert_eq!(watch.get(), ConnectionState::Draining);
        assert!(token.is_cancelled());
    }

    #[test]
    fn teardown_runs_once_and_first_cause_wins() {
        let relay = Relay::new(RelayOptions::default());
        let conn = relay.register(key("hub"));
        let lifecycle = Arc::clone(&conn.guard.0);
        assert!(lifecycle.shutdown(ShutdownCause::StreamEnded));
        assert!(!lifecycle.shutdown(ShutdownCause::Aborted));
        assert_eq!(lifecycle.cause(), ShutdownCause::StreamEnded);
        assert!(lifecycle.postbox.is_closed());
    }

    #[test]
    fn relay_shutdown_cancels_children_only_downward() {
        let parent = CancellationToken::new();
        let relay = Relay::with_shutdown(RelayOptions::default(), parent.clone());
        let a = relay.register(key("hub"));
        let b = relay.register(key("hub"));

        a.cancel_token().cancel();
        assert!(!parent.is_cancelled());
        assert!(!b.cancel_token().is_cancelled());

        parent.cancel();
        assert!(b.cancel_token().is_cancelled());
    }

    #[test]
    fn close_frames_per_cause() {
        let peer = CloseFrame::new(4000, "bye");
        assert_eq!(
            ShutdownCause::PeerClosed(Some(peer.clone())).close_frame(),
            Some(peer)
        );
        assert_eq!(
            ShutdownCause::PeerClosed(None).close_frame(),
            Some(CloseFrame::normal())
        );
        assert_eq!(
            ShutdownCause::ReceiveFailed("x".into()).close_frame().map(|f| f.code),
            Some(CloseFrame::INTERNAL_ERROR)
        );
        assert_eq!(
            ShutdownCause::ProtocolViolation(ReassemblyError::TooLarge { limit: 1 })
                .close_frame()
                .map(|f| f.code),
            Some(CloseFrame::TOO_BIG)
        );
        assert_eq!(
            ShutdownCause::Aborted.close_frame(),
            Some(CloseFrame::new(1001, "Server shutting down"))
        );
        assert_eq!(ShutdownCause::StreamEnded.close_frame(), None);
        assert_eq!(ShutdownCause::SendFailed("x".into()).close_frame(), None);
    }

    #[test]
    fn cause_labels_and_display() {
        assert_eq!(ShutdownCause::Aborted.kind(), "aborted");
        assert_eq!(ShutdownCause::SendFailed("io".into()).kind(), "send_failed");
        assert_eq!(
            ShutdownCause::PeerClosed(Some(CloseFrame::new(1000, "done"))).to_string(),
            "peer closed (1000 done)"
        );
        assert_eq!(
            ShutdownCause::ReceiveFailed("reset".into()).to_string(),
            "receive failed: reset"
        );
    }

    #[test]
    fn state_roundtrip() {
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Registered,
            ConnectionState::Relaying,
            ConnectionState::Draining,
            ConnectionState::Closed,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
    }
}
