//! Runtime layer for the Web Actions protocol.
//!
//! Provides the primitives everything else is built on:
//!
//! - [`port`] - entangled message ports with no sender identity
//! - [`relay`] - the intermediary frame that carries a port into another origin
//! - [`handshake`] - the establisher that turns a relayed port into a [`Connection`]
//! - [`sequence`] - per-action reordering for multi-hop paths
//!
//! The action registry, state machine and routing live in the `webactions`
//! crate on top of this one.

pub mod error;
pub mod handshake;
pub mod port;
pub mod relay;
pub mod sequence;

pub use error::{ConnectFailure, Error, Result};
pub use handshake::{Connection, Establisher, accept, reject};
pub use port::{MessageChannel, MessagePort, PortMessage, PortReceiver, PortSender};
pub use relay::{
	ControlMessage, ControlReceiver, ControlSender, FrameRelay, OriginTable, ProxyFrame,
	RecordingRelay, Relay, control_channel,
};
pub use sequence::{
	DEFAULT_REORDER_CAPACITY, ReorderBuffer, ReorderError, ReorderTable, SequenceCounter,
};
