//! Wire types for the Web Actions protocol.
//!
//! This crate contains the serde-serializable envelopes exchanged between a
//! requester and a handler once a port has been established, along with the
//! handful of shared records (handler registrations, file blobs) that travel
//! inside those envelopes.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization
//! - **JSON-shaped**: Every envelope is a plain JSON object with a `type` tag
//! - **Stable**: Changes only when the wire protocol changes
//!
//! The connection handshake, routing tables and the action state machine are
//! built on top of these types in `webactions-runtime` and `webactions`.

pub mod blob;
pub mod handler;
pub mod message;
pub mod proxy;

pub use blob::Blob;
pub use handler::HandlerRecord;
pub use message::*;
pub use proxy::*;
