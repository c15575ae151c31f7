//! Intermediary frame relay.
//!
//! Two contexts in different origins share no reference to each other, so a
//! requester cannot hand a port to a handler directly. The relay embeds a
//! [`ProxyFrame`] loaded from the target origin; the frame posts the port into
//! its own origin's background service over that origin's control channel.
//!
//! The frame never looks at what travels over the port. It forwards the
//! endpoint verbatim, exactly once, and is consumed in the process.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use webactions_protocol::{is_proxy_url, origin_of, proxy_url};

use crate::error::{ConnectFailure, Error, Result};
use crate::port::MessagePort;

/// Messages an origin's background service accepts on its control channel.
#[derive(Debug)]
pub enum ControlMessage {
	/// A proxy frame forwarding a requester's port endpoint.
	Connect { port: MessagePort },
}

pub type ControlSender = mpsc::UnboundedSender<ControlMessage>;
pub type ControlReceiver = mpsc::UnboundedReceiver<ControlMessage>;

/// Creates a control channel for a background service.
pub fn control_channel() -> (ControlSender, ControlReceiver) {
	mpsc::unbounded_channel()
}

/// Directory of background services reachable by origin.
///
/// This stands in for "a frame loaded from origin X can talk to X's service
/// worker": resolving a url yields the control channel of its origin.
#[derive(Default)]
pub struct OriginTable {
	origins: RwLock<HashMap<String, ControlSender>>,
}

impl OriginTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes the service behind `control` reachable for urls under `url`'s origin.
	pub fn register(&self, url: &str, control: ControlSender) -> Result<()> {
		let origin = origin_of(url)
			.ok_or_else(|| Error::ProtocolViolation(format!("url has no origin: {url}")))?;
		tracing::debug!(%origin, "registered background service");
		self.origins.write().insert(origin, control);
		Ok(())
	}

	pub fn unregister(&self, url: &str) {
		if let Some(origin) = origin_of(url) {
			self.origins.write().remove(&origin);
		}
	}

	/// Returns the control channel serving `url`'s origin, if it is still alive.
	pub fn resolve(&self, url: &str) -> Option<ControlSender> {
		let origin = origin_of(url)?;
		self.origins
			.read()
			.get(&origin)
			.filter(|control| !control.is_closed())
			.cloned()
	}
}

/// An intermediary document loaded from the target origin.
pub struct ProxyFrame {
	url: String,
	control: ControlSender,
}

impl ProxyFrame {
	/// Loads the proxy frame for `handler_url`.
	pub fn load(origins: &OriginTable, handler_url: &str) -> Result<Self> {
		let url = proxy_url(handler_url);
		debug_assert!(is_proxy_url(&url));

		let control = origins
			.resolve(&url)
			.ok_or_else(|| Error::connection(handler_url, ConnectFailure::NoAvailableTarget))?;
		Ok(Self { url, control })
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	/// Hands `port` to the origin's background service and unloads the frame.
	pub fn relay(self, port: MessagePort) -> Result<()> {
		tracing::debug!(frame = %self.url, port = port.id(), "relaying port");
		self.control
			.send(ControlMessage::Connect { port })
			.map_err(|_| Error::connection(self.url.clone(), ConnectFailure::Closed))
	}
}

/// Delivers one end of a fresh channel into the target's origin.
pub trait Relay: Send + Sync {
	fn forward(
		&self,
		target_url: &str,
		port: MessagePort,
	) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Relay that embeds a [`ProxyFrame`] per forwarded port.
#[derive(Clone)]
pub struct FrameRelay {
	origins: Arc<OriginTable>,
}

impl FrameRelay {
	pub fn new(origins: Arc<OriginTable>) -> Self {
		Self { origins }
	}
}

impl Relay for FrameRelay {
	fn forward(
		&self,
		target_url: &str,
		port: MessagePort,
	) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		let target_url = target_url.to_string();
		Box::pin(async move {
			let frame = ProxyFrame::load(&self.origins, &target_url)?;
			frame.relay(port)
		})
	}
}

/// Wraps a relay and records every target it was asked to reach.
pub struct RecordingRelay<R> {
	inner: R,
	attempts: Mutex<Vec<String>>,
}

impl<R: Relay> RecordingRelay<R> {
	pub fn new(inner: R) -> Self {
		Self {
			inner,
			attempts: Mutex::new(Vec::new()),
		}
	}

	/// Targets forwarded to so far, in order.
	pub fn attempts(&self) -> Vec<String> {
		self.attempts.lock().clone()
	}
}

impl<R: Relay> Relay for RecordingRelay<R> {
	fn forward(
		&self,
		target_url: &str,
		port: MessagePort,
	) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		self.attempts.lock().push(target_url.to_string());
		self.inner.forward(target_url, port)
	}
}
