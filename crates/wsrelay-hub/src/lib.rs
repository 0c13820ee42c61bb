//! # wsrelay-hub
//!
//! The relay engine. Transport-agnostic: everything here talks to sockets
//! through a `futures` `Stream` of [`Inbound`](wsrelay_core::Inbound) and a
//! `Sink` of [`Outbound`](wsrelay_core::Outbound).
//!
//! - [`mailbox`]: per-connection outbound queue (many producers, one consumer)
//! - [`registry`]: session key → member set, with snapshot-for-broadcast
//! - [`reassembly`]: chunk accumulation; nothing is forwarded half-read
//! - [`connection`]: one connection's read loop, write loop and teardown
//! - [`echo`]: loopback diagnostic loop

#![deny(unsafe_code)]

pub mod connection;
pub mod echo;
pub mod mailbox;
pub mod metrics;
pub mod reassembly;
pub mod registry;

pub use connection::{
    Connection, ConnectionReport, ConnectionState, Relay, RelayOptions, ShutdownCause, StateWatch,
};
pub use echo::{EchoOutcome, echo};
pub use mailbox::{DropReason, Mailbox, MailboxCapacity, PostOutcome, Postbox, mailbox};
pub use reassembly::{Reassembler, ReassemblyError};
pub use registry::{Member, SessionRegistry};
