//! Per-connection outbound queue.
//!
//! A [`Mailbox`] is drained by exactly one consumer (its connection's write
//! loop) in FIFO order. Any number of [`Postbox`] clones may feed it. Posting
//! never waits: with [`MailboxCapacity::Unbounded`] the backlog grows with a
//! slow consumer, with [`MailboxCapacity::Bounded`] the newest message is
//! dropped once the queue is full. Either way an unrelated source connection
//! is never stalled by a slow destination.
//!
//! Once closed, the mailbox yields nothing more and every later post is
//! discarded.

use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use wsrelay_core::Message;

/// Queue depth policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MailboxCapacity {
    /// No limit; memory grows with the consumer's backlog.
    #[default]
    Unbounded,
    /// At most this many queued messages; overflow drops the newest.
    Bounded(NonZeroUsize),
}

impl MailboxCapacity {
    /// `None` → unbounded, `Some(0)` → unbounded, `Some(n)` → bounded.
    pub fn from_limit(limit: Option<usize>) -> Self {
        limit
            .and_then(NonZeroUsize::new)
            .map_or(Self::Unbounded, Self::Bounded)
    }
}

/// Result of [`Postbox::post`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostOutcome {
    /// The message is queued for the consumer.
    Queued,
    /// The message was discarded.
    Dropped(DropReason),
}

/// Why a post was discarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// The mailbox is closed.
    Closed,
    /// A bounded mailbox is full.
    Full,
}

impl DropReason {
    /// Label value for metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Full => "full",
        }
    }
}

#[derive(Debug)]
enum Tx {
    Unbounded(mpsc::UnboundedSender<Message>),
    Bounded(mpsc::Sender<Message>),
}

#[derive(Debug)]
enum Rx {
    Unbounded(mpsc::UnboundedReceiver<Message>),
    Bounded(mpsc::Receiver<Message>),
}

impl Rx {
    fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        match self {
            Self::Unbounded(rx) => rx.poll_recv(cx),
            Self::Bounded(rx) => rx.poll_recv(cx),
        }
    }

    fn close(&mut self) {
        match self {
            Self::Unbounded(rx) => rx.close(),
            Self::Bounded(rx) => rx.close(),
        }
    }
}

#[derive(Debug)]
struct Shared {
    closed: CancellationToken,
    dropped: AtomicU64,
}

/// Create a connected producer/consumer pair.
pub fn mailbox(capacity: MailboxCapacity) -> (Postbox, Mailbox) {
    let (tx, rx) = match capacity {
        MailboxCapacity::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Tx::Unbounded(tx), Rx::Unbounded(rx))
        }
        MailboxCapacity::Bounded(limit) => {
            let (tx, rx) = mpsc::channel(limit.get());
            (Tx::Bounded(tx), Rx::Bounded(rx))
        }
    };
    let shared = Arc::new(Shared {
        closed: CancellationToken::new(),
        dropped: AtomicU64::new(0),
    });
    let on_close = Box::pin(shared.closed.clone().cancelled_owned());
    (
        Postbox {
            tx: Arc::new(tx),
            shared: Arc::clone(&shared),
        },
        Mailbox {
            rx,
            shared,
            on_close,
            finished: false,
        },
    )
}

/// Producer handle. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Postbox {
    tx: Arc<Tx>,
    shared: Arc<Shared>,
}

impl Postbox {
    /// Queue a message without waiting.
    pub fn post(&self, message: Message) -> PostOutcome {
        if self.shared.closed.is_cancelled() {
            return self.drop_one(DropReason::Closed);
        }
        let result = match &*self.tx {
            Tx::Unbounded(tx) => tx.send(message).map_err(|_| DropReason::Closed),
            Tx::Bounded(tx) => tx.try_send(message).map_err(|e| match e {
                TrySendError::Full(_) => DropReason::Full,
                TrySendError::Closed(_) => DropReason::Closed,
            }),
        };
        match result {
            Ok(()) => PostOutcome::Queued,
            Err(reason) => self.drop_one(reason),
        }
    }

    /// Messages discarded by this mailbox so far.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Whether the mailbox has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Close the mailbox: the consumer stops and later posts are discarded.
    ///
    /// Only the owning connection closes its mailbox.
    pub(crate) fn close(&self) {
        self.shared.closed.cancel();
    }

    fn drop_one(&self, reason: DropReason) -> PostOutcome {
        let _ = self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        PostOutcome::Dropped(reason)
    }
}

/// Consumer half. Implements [`Stream`]: the lazy drain sequence, which
/// parks while empty and ends for good once the mailbox is closed.
#[derive(Debug)]
pub struct Mailbox {
    rx: Rx,
    shared: Arc<Shared>,
    on_close: Pin<Box<WaitForCancellationFutureOwned>>,
    finished: bool,
}

impl Mailbox {
    /// Next message in FIFO order, or `None` once closed.
    pub async fn recv(&mut self) -> Option<Message> {
        futures::StreamExt::next(self).await
    }

    /// Close from the consumer side. Buffered messages are discarded.
    pub fn close(&mut self) {
        self.shared.closed.cancel();
        self.finish();
    }

    /// Whether the mailbox has been closed.
    pub fn is_closed(&self) -> bool {
        self.finished || self.shared.closed.is_cancelled()
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.rx.close();
        }
    }
}

impl Stream for Mailbox {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        if this.on_close.as_mut().poll(cx).is_ready() {
            this.finish();
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
