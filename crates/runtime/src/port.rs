//! Message ports - the only transport primitive the protocol relies on.
//!
//! A [`MessageChannel`] yields two entangled [`MessagePort`]s. Whatever one
//! port posts, the other receives, in order. Ports can be transferred inside
//! a [`PortMessage`] to hand a channel end to another context.
//!
//! The channel deliberately carries no sender identity: a receiver only
//! knows which port a message arrived on. Everything the protocol needs to
//! demultiplex concurrent actions has to travel in the envelope itself.
//!
//! # Closure
//!
//! When one end is dropped, [`MessagePort::recv`] on the other end returns
//! `None` after draining queued messages, and posting to it fails with
//! [`Error::ChannelClosed`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

static NEXT_PORT_ID: AtomicU64 = AtomicU64::new(1);

/// Data plus transferred ports, the unit of `postMessage`.
pub struct PortMessage {
	pub data: Value,
	pub ports: Vec<MessagePort>,
}

impl PortMessage {
	pub fn new(data: Value) -> Self {
		Self {
			data,
			ports: Vec::new(),
		}
	}

	/// Serializes `value` into a message with no transferred ports.
	pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self> {
		Ok(Self::new(serde_json::to_value(value)?))
	}

	/// Appends a port to the transfer list.
	pub fn with_port(mut self, port: MessagePort) -> Self {
		self.ports.push(port);
		self
	}

	/// Deserializes the data part.
	pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
		serde_json::from_value(self.data.clone()).map_err(Into::into)
	}
}

impl fmt::Debug for PortMessage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PortMessage")
			.field("data", &self.data)
			.field("ports", &self.ports.len())
			.finish()
	}
}

/// Factory for entangled port pairs.
pub struct MessageChannel;

impl MessageChannel {
	#[allow(clippy::new_ret_no_self)]
	pub fn new() -> (MessagePort, MessagePort) {
		let (to_first, first_rx) = mpsc::unbounded_channel();
		let (to_second, second_rx) = mpsc::unbounded_channel();
		let first_id = NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed);
		let second_id = NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed);

		let first = MessagePort {
			sender: PortSender {
				tx: to_second,
				id: first_id,
			},
			receiver: PortReceiver {
				rx: first_rx,
				id: first_id,
			},
		};
		let second = MessagePort {
			sender: PortSender {
				tx: to_first,
				id: second_id,
			},
			receiver: PortReceiver {
				rx: second_rx,
				id: second_id,
			},
		};
		(first, second)
	}
}

/// One end of a [`MessageChannel`].
pub struct MessagePort {
	sender: PortSender,
	receiver: PortReceiver,
}

impl MessagePort {
	/// Local identity of this port, for logging only.
	pub fn id(&self) -> u64 {
		self.sender.id
	}

	pub fn post(&self, message: PortMessage) -> Result<()> {
		self.sender.post(message)
	}

	pub fn post_json<T: Serialize>(&self, value: &T) -> Result<()> {
		self.sender.post_json(value)
	}

	/// Receives the next message, or `None` once the peer is gone.
	pub async fn recv(&mut self) -> Option<PortMessage> {
		self.receiver.recv().await
	}

	pub fn try_recv(&mut self) -> Option<PortMessage> {
		self.receiver.try_recv()
	}

	/// Returns a clonable handle for posting from several tasks.
	pub fn sender(&self) -> PortSender {
		self.sender.clone()
	}

	/// Splits into independently owned halves.
	pub fn split(self) -> (PortSender, PortReceiver) {
		(self.sender, self.receiver)
	}
}

impl fmt::Debug for MessagePort {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MessagePort")
			.field("id", &self.sender.id)
			.field("peer_closed", &self.sender.is_closed())
			.finish()
	}
}

/// Posting half of a port.
#[derive(Clone)]
pub struct PortSender {
	tx: mpsc::UnboundedSender<PortMessage>,
	id: u64,
}

impl PortSender {
	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn post(&self, message: PortMessage) -> Result<()> {
		self.tx.send(message).map_err(|_| Error::ChannelClosed)
	}

	pub fn post_json<T: Serialize>(&self, value: &T) -> Result<()> {
		self.post(PortMessage::from_serialize(value)?)
	}

	/// Returns true once the peer's receiving half has been dropped.
	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}

	/// Resolves when the peer's receiving half is dropped.
	pub async fn closed(&self) {
		self.tx.closed().await
	}
}

impl fmt::Debug for PortSender {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PortSender").field("id", &self.id).finish()
	}
}

/// Receiving half of a port.
pub struct PortReceiver {
	rx: mpsc::UnboundedReceiver<PortMessage>,
	id: u64,
}

impl PortReceiver {
	pub fn id(&self) -> u64 {
		self.id
	}

	pub async fn recv(&mut self) -> Option<PortMessage> {
		self.rx.recv().await
	}

	pub fn try_recv(&mut self) -> Option<PortMessage> {
		self.rx.try_recv().ok()
	}
}
