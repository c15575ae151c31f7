//! Handshake establisher.
//!
//! Opens a bidirectional port between a requester and a handler origin that
//! share no reference:
//!
//! 1. Create a fresh [`MessageChannel`] and keep one end
//! 2. Forward the other end through a [`Relay`] into the target origin
//! 3. Wait for the responder's [`ConnectReply`] on the kept end
//! 4. `{"connected": true}` yields a [`Connection`]; anything else is an error
//!
//! No action traffic is allowed before step 4 succeeds. On every failure path
//! the kept end is dropped, which closes the forwarded end too.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use webactions_protocol::{ClientId, ConnectReply, ConnectionId, DEFAULT_CONNECT_TIMEOUT_MS};

use crate::error::{ConnectFailure, Error, Result};
use crate::port::{MessageChannel, MessagePort, PortReceiver, PortSender};
use crate::relay::Relay;

/// A realized, accepted channel to one handler origin.
#[derive(Debug)]
pub struct Connection {
	id: ConnectionId,
	target: String,
	client_id: Option<ClientId>,
	port: MessagePort,
}

impl Connection {
	/// Wraps an already accepted port, for callers that ran their own handshake.
	pub fn new(
		id: ConnectionId,
		target: impl Into<String>,
		client_id: Option<ClientId>,
		port: MessagePort,
	) -> Self {
		Self {
			id,
			target: target.into(),
			client_id,
			port,
		}
	}

	pub fn id(&self) -> ConnectionId {
		self.id
	}

	/// Handler url this connection was established with.
	pub fn target(&self) -> &str {
		&self.target
	}

	/// Session id the responder minted, if it routes by explicit id.
	pub fn client_id(&self) -> Option<&ClientId> {
		self.client_id.as_ref()
	}

	pub fn port(&self) -> &MessagePort {
		&self.port
	}

	pub fn into_parts(self) -> (ConnectionId, String, Option<ClientId>, PortSender, PortReceiver) {
		let (sender, receiver) = self.port.split();
		(self.id, self.target, self.client_id, sender, receiver)
	}
}

/// Requester-side handshake driver.
pub struct Establisher {
	relay: Arc<dyn Relay>,
	timeout: Duration,
	next_id: AtomicU64,
}

impl Establisher {
	pub fn new(relay: Arc<dyn Relay>) -> Self {
		Self {
			relay,
			timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
			next_id: AtomicU64::new(0),
		}
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// Connects to the handler at `target_url`.
	///
	/// # Errors
	///
	/// [`Error::Connection`] when the relay cannot reach the origin, the
	/// responder rejects, replies with something other than an acceptance
	/// token, or stays silent past the timeout.
	pub async fn connect(&self, target_url: &str) -> Result<Connection> {
		let (mut held, forwarded) = MessageChannel::new();
		tracing::debug!(target_url, port = held.id(), "connecting");

		self.relay.forward(target_url, forwarded).await?;

		let reply = match tokio::time::timeout(self.timeout, held.recv()).await {
			Ok(Some(reply)) => reply,
			Ok(None) => return Err(Error::connection(target_url, ConnectFailure::Closed)),
			Err(_) => {
				tracing::debug!(target_url, "handshake timed out");
				return Err(Error::connection(
					target_url,
					ConnectFailure::Timeout {
						after_ms: self.timeout.as_millis() as u64,
					},
				));
			}
		};

		match reply.parse::<ConnectReply>() {
			Ok(ConnectReply {
				connected: true,
				client_id,
			}) => {
				let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
				tracing::debug!(target_url, %id, ?client_id, "connected");
				Ok(Connection::new(id, target_url, client_id, held))
			}
			Ok(ConnectReply {
				connected: false, ..
			}) => Err(Error::connection(target_url, ConnectFailure::Rejected)),
			Err(_) => Err(Error::connection(
				target_url,
				ConnectFailure::UnexpectedReply(reply.data.to_string()),
			)),
		}
	}
}

/// Responder side: answers a forwarded port with an acceptance token.
pub fn accept(port: &MessagePort, client_id: Option<ClientId>) -> Result<()> {
	port.post_json(&ConnectReply::accept(client_id))
}

/// Responder side: refuses a forwarded port.
pub fn reject(port: &MessagePort) -> Result<()> {
	port.post_json(&ConnectReply::reject())
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::relay::{ControlMessage, FrameRelay, OriginTable, control_channel};

	fn setup(timeout_ms: u64) -> (Establisher, crate::relay::ControlReceiver) {
		let origins = Arc::new(OriginTable::new());
		let (control_tx, control_rx) = control_channel();
		origins.register("https://handler.example/", control_tx).unwrap();
		let establisher = Establisher::new(Arc::new(FrameRelay::new(origins)))
			.with_timeout(Duration::from_millis(timeout_ms));
		(establisher, control_rx)
	}

	#[tokio::test]
	async fn accepted_handshake_yields_connection() {
		let (establisher, mut control_rx) = setup(1_000);

		let responder = tokio::spawn(async move {
			let ControlMessage::Connect { port } = control_rx.recv().await.unwrap();
			accept(&port, Some(ClientId::new("session-1"))).unwrap();
			port
		});

		let connection = establisher.connect("https://handler.example/").await.unwrap();
		assert_eq!(connection.target(), "https://handler.example/");
		assert_eq!(connection.client_id().map(ClientId::as_str), Some("session-1"));
		let _port = responder.await.unwrap();
	}

	#[tokio::test]
	async fn rejection_is_connection_error() {
		let (establisher, mut control_rx) = setup(1_000);

		tokio::spawn(async move {
			let ControlMessage::Connect { port } = control_rx.recv().await.unwrap();
			reject(&port).unwrap();
		});

		let err = establisher.connect("https://handler.example/").await.unwrap_err();
		assert_eq!(err.connect_failure(), Some(&ConnectFailure::Rejected));
	}

	#[tokio::test]
	async fn silent_responder_times_out() {
		let (establisher, mut control_rx) = setup(20);

		let holder = tokio::spawn(async move {
			let ControlMessage::Connect { port } = control_rx.recv().await.unwrap();
			tokio::time::sleep(Duration::from_millis(200)).await;
			drop(port);
		});

		let err = establisher.connect("https://handler.example/").await.unwrap_err();
		assert_eq!(
			err.connect_failure(),
			Some(&ConnectFailure::Timeout { after_ms: 20 })
		);
		holder.await.unwrap();
	}

	#[tokio::test]
	async fn non_token_reply_is_unexpected() {
		let (establisher, mut control_rx) = setup(1_000);

		tokio::spawn(async move {
			let ControlMessage::Connect { port } = control_rx.recv().await.unwrap();
			port.post_json(&json!({"type": "update", "id": 0, "done": true}))
				.unwrap();
		});

		let err = establisher.connect("https://handler.example/").await.unwrap_err();
		assert!(matches!(
			err.connect_failure(),
			Some(ConnectFailure::UnexpectedReply(_))
		));
	}

	#[tokio::test]
	async fn dropped_port_is_closed_failure() {
		let (establisher, mut control_rx) = setup(1_000);

		tokio::spawn(async move {
			let ControlMessage::Connect { port } = control_rx.recv().await.unwrap();
			drop(port);
		});

		let err = establisher.connect("https://handler.example/").await.unwrap_err();
		assert_eq!(err.connect_failure(), Some(&ConnectFailure::Closed));
	}
}
