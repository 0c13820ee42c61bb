//! # wsrelay-core
//!
//! Leaf types shared by every relay crate:
//!
//! - [`Message`] and [`MessageKind`]: an immutable, fully reassembled payload
//! - [`Chunk`], [`Inbound`], [`Outbound`], [`CloseFrame`]: the transport-facing
//!   vocabulary the relay engine speaks, independent of any WebSocket library
//! - [`ConnectionId`] and [`SessionKey`]: identity of a socket and of the hub
//!   it joined
//! - [`TransportError`]: what a transport reports when it cannot read or write

#![deny(unsafe_code)]

pub mod errors;
pub mod frame;
pub mod ids;
pub mod message;

pub use errors::{InvalidSessionKey, TransportError};
pub use frame::{Chunk, CloseFrame, Inbound, Outbound};
pub use ids::{ConnectionId, SessionKey};
pub use message::{Message, MessageKind};
