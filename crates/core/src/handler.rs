//! Handler side of an action exchange.
//!
//! A [`HandlerService`] plays the role of an origin's long-lived background
//! service. It accepts ports forwarded by proxy frames, answers each with an
//! acceptance token, and reads `action` envelopes from every connection.
//!
//! Its action table is keyed by `(connection, id)` because requesters mint
//! ids independently. The table outlives any destination context, so a
//! context can come and go while the service keeps the truth about which
//! actions are still open.
//!
//! Application logic receives each action as an [`IncomingAction`] and
//! answers through it. A handle that is dropped without being closed sends an
//! explicit `abort` with [`AbortCode::ContextDestroyed`], so the requester
//! never waits on a context that no longer exists.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use webactions_protocol::{AbortCode, ActionId, ActionOptions, ClientId, ConnectionId, Message};
use webactions_runtime::{
	ControlMessage, ControlReceiver, ControlSender, Error, MessagePort, PortSender, Result,
	SequenceCounter, accept, control_channel,
};

use crate::action::{ActionState, ActionView, Transition};
use crate::config::ActionsConfig;
use crate::registry::ActionRegistry;
use crate::router::ClientRouter;

type ActionKey = (ConnectionId, ActionId);

/// Application logic that performs actions.
#[async_trait]
pub trait ActionHandler: Send + Sync {
	/// Takes ownership of `action`.
	///
	/// Returning `Err` while the action is still open aborts it with
	/// [`AbortCode::HandlerFailed`] (or [`AbortCode::NoAvailableClient`] for
	/// [`Error::NoAvailableClient`]). Returning `Ok` after handing the action
	/// on is fine; it stays open until its new owner closes or drops it.
	async fn handle(&self, action: IncomingAction) -> Result<()>;
}

struct Entry {
	view: ActionView,
	sender: PortSender,
	seq: SequenceCounter,
	/// The service is still awaiting `ActionHandler::handle` for this action.
	supervised: bool,
	/// The handle was dropped unclosed while supervised.
	orphaned: bool,
}

#[derive(Default)]
struct ActionTable {
	registry: Mutex<ActionRegistry<ActionKey, Entry>>,
}

impl ActionTable {
	fn insert(&self, key: ActionKey, verb: &str, sender: PortSender) -> Result<()> {
		self.registry.lock().register(
			key,
			Entry {
				view: ActionView::handler(key.1, verb),
				sender,
				seq: SequenceCounter::new(),
				supervised: true,
				orphaned: false,
			},
		)
	}

	fn send(&self, key: &ActionKey, message: Message, transition: Transition) -> Result<()> {
		send_locked(&mut self.registry.lock(), key, message, transition)
	}

	fn state(&self, key: &ActionKey) -> ActionState {
		self.registry
			.lock()
			.lookup(key)
			.map(|entry| entry.view.state())
			.unwrap_or(ActionState::Closed)
	}

	fn orphan(&self, key: &ActionKey) {
		let mut registry = self.registry.lock();
		let Ok(entry) = registry.lookup_mut(key) else {
			return;
		};
		if entry.supervised {
			entry.orphaned = true;
			return;
		}

		tracing::debug!(connection = %key.0, id = %key.1, "action dropped without close");
		let abort = Message::abort(key.1, AbortCode::ContextDestroyed, None);
		if let Err(e) = send_locked(&mut registry, key, abort, Transition::Abort) {
			tracing::debug!(error = %e, "could not report destroyed context");
		}
	}

	fn finish_supervision(&self, key: &ActionKey, outcome: Result<()>) {
		let mut registry = self.registry.lock();
		let Ok(entry) = registry.lookup_mut(key) else {
			return;
		};
		entry.supervised = false;

		let abort = match outcome {
			Err(e) => {
				tracing::warn!(connection = %key.0, id = %key.1, error = %e, "handler failed");
				let code = match &e {
					Error::NoAvailableClient(_) => AbortCode::NoAvailableClient,
					_ => AbortCode::HandlerFailed,
				};
				Message::abort(key.1, code, Some(e.to_string()))
			}
			Ok(()) if entry.orphaned => Message::abort(key.1, AbortCode::ContextDestroyed, None),
			Ok(()) => return,
		};
		if let Err(e) = send_locked(&mut registry, key, abort, Transition::Abort) {
			tracing::debug!(error = %e, "could not report abort");
		}
	}

	fn drop_connection(&self, connection: ConnectionId) -> usize {
		let mut registry = self.registry.lock();
		let before = registry.len();
		registry.retain(|(conn, _), _| *conn != connection);
		before - registry.len()
	}

	fn len(&self) -> usize {
		self.registry.lock().len()
	}
}

fn send_locked(
	registry: &mut ActionRegistry<ActionKey, Entry>,
	key: &ActionKey,
	message: Message,
	transition: Transition,
) -> Result<()> {
	let entry = registry.lookup_mut(key)?;
	let next = entry.view.apply(transition)?;
	let message = message.with_seq(entry.seq.next());
	tracing::debug!(connection = %key.0, id = %key.1, kind = message.kind(), "sending");
	let posted = entry.sender.post_json(&message);
	if next.is_closed() {
		registry.unregister(key);
	}
	posted
}

/// Handler-side handle for one inbound action.
pub struct IncomingAction {
	key: ActionKey,
	options: ActionOptions,
	payload: Value,
	client_id: Option<ClientId>,
	table: Arc<ActionTable>,
	finished: bool,
}

impl IncomingAction {
	pub fn id(&self) -> ActionId {
		self.key.1
	}

	pub fn connection_id(&self) -> ConnectionId {
		self.key.0
	}

	pub fn verb(&self) -> &str {
		&self.options.verb
	}

	pub fn options(&self) -> &ActionOptions {
		&self.options
	}

	pub fn payload(&self) -> &Value {
		&self.payload
	}

	/// Session id the connection was accepted with, if any.
	pub fn client_id(&self) -> Option<&ClientId> {
		self.client_id.as_ref()
	}

	pub fn state(&self) -> ActionState {
		self.table.state(&self.key)
	}

	/// Streams an intermediate payload back to the requester.
	///
	/// # Errors
	///
	/// [`Error::UnknownAction`] once the action is no longer live (its
	/// connection closed), [`Error::ChannelClosed`] if the requester is gone.
	pub fn update(&self, payload: Value) -> Result<()> {
		self.table.send(
			&self.key,
			Message::update(self.key.1, payload, false),
			Transition::Update,
		)
	}

	/// Sends the final payload. Nothing can be sent for this action afterwards.
	pub fn close(mut self, payload: Value) -> Result<()> {
		self.finished = true;
		self.table.send(
			&self.key,
			Message::update(self.key.1, payload, true),
			Transition::Close,
		)
	}

	/// Terminates the action abnormally with [`AbortCode::HandlerFailed`].
	pub fn abort(mut self, message: impl Into<String>) -> Result<()> {
		self.finished = true;
		self.table.send(
			&self.key,
			Message::abort(self.key.1, AbortCode::HandlerFailed, Some(message.into())),
			Transition::Abort,
		)
	}
}

impl Drop for IncomingAction {
	fn drop(&mut self) {
		if !self.finished {
			self.table.orphan(&self.key);
		}
	}
}

impl fmt::Debug for IncomingAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("IncomingAction")
			.field("connection", &self.key.0)
			.field("id", &self.key.1)
			.field("verb", &self.options.verb)
			.field("client_id", &self.client_id)
			.finish()
	}
}

/// An origin's background service.
pub struct HandlerService {
	config: ActionsConfig,
	router: ClientRouter,
	table: Arc<ActionTable>,
	control_tx: Mutex<Option<ControlSender>>,
	control_rx: Mutex<Option<ControlReceiver>>,
	next_connection: AtomicU64,
}

impl HandlerService {
	pub fn new(config: ActionsConfig, router: ClientRouter) -> Self {
		let (control_tx, control_rx) = control_channel();
		Self {
			config,
			router,
			table: Arc::new(ActionTable::default()),
			control_tx: Mutex::new(Some(control_tx)),
			control_rx: Mutex::new(Some(control_rx)),
			next_connection: AtomicU64::new(0),
		}
	}

	/// The channel proxy frames post forwarded ports into.
	///
	/// # Errors
	///
	/// [`Error::ChannelClosed`] after [`shutdown`](Self::shutdown).
	pub fn control_sender(&self) -> Result<ControlSender> {
		self.control_tx.lock().clone().ok_or(Error::ChannelClosed)
	}

	/// Stops handing out control senders; [`run`](Self::run) returns once the
	/// last outstanding one is dropped.
	pub fn shutdown(&self) {
		self.control_tx.lock().take();
	}

	pub fn router(&self) -> &ClientRouter {
		&self.router
	}

	/// Actions currently open across all connections.
	pub fn live_actions(&self) -> usize {
		self.table.len()
	}

	/// Accepts forwarded ports and serves each connection on its own task.
	pub async fn run(&self, handler: Arc<dyn ActionHandler>) -> Result<()> {
		let mut control = self
			.control_rx
			.lock()
			.take()
			.ok_or_else(|| Error::ProtocolViolation("handler service already running".into()))?;

		while let Some(ControlMessage::Connect { port }) = control.recv().await {
			let connection_id = ConnectionId(self.next_connection.fetch_add(1, Ordering::SeqCst));
			let client_id = self.config.routing.mints_session_ids().then(ClientId::mint);

			if let Err(e) = accept(&port, client_id.clone()) {
				tracing::warn!(connection = %connection_id, error = %e, "requester gone before accept");
				continue;
			}
			if let Some(client_id) = &client_id {
				self.router.bind_session(connection_id, client_id.clone());
			}
			tracing::debug!(connection = %connection_id, ?client_id, "connection accepted");

			let served = ServedConnection {
				id: connection_id,
				client_id,
				table: Arc::clone(&self.table),
				router: self.router.clone(),
				handler: Arc::clone(&handler),
			};
			tokio::spawn(served.serve(port));
		}

		tracing::debug!("control channel closed");
		Ok(())
	}
}

struct ServedConnection {
	id: ConnectionId,
	client_id: Option<ClientId>,
	table: Arc<ActionTable>,
	router: ClientRouter,
	handler: Arc<dyn ActionHandler>,
}

impl ServedConnection {
	async fn serve(self, port: MessagePort) {
		let (sender, mut receiver) = port.split();

		while let Some(raw) = receiver.recv().await {
			let message = match raw.parse::<Message>() {
				Ok(message) => message,
				Err(e) => {
					tracing::warn!(connection = %self.id, error = %e, "malformed envelope dropped");
					continue;
				}
			};

			match message {
				Message::Action {
					id,
					verb,
					hints,
					payload,
					..
				} => self.start(id, ActionOptions { verb, hints }, payload, &sender),
				other => {
					tracing::warn!(
						connection = %self.id,
						kind = other.kind(),
						"unexpected message on handler port dropped"
					);
				}
			}
		}

		let dropped = self.table.drop_connection(self.id);
		self.router.unbind_session(self.id);
		if dropped > 0 {
			tracing::warn!(connection = %self.id, dropped, "connection closed with open actions");
		} else {
			tracing::debug!(connection = %self.id, "connection closed");
		}
	}

	fn start(&self, id: ActionId, options: ActionOptions, payload: Value, sender: &PortSender) {
		let key = (self.id, id);
		if let Err(e) = self.table.insert(key, &options.verb, sender.clone()) {
			tracing::warn!(error = %e, "action rejected");
			return;
		}
		tracing::debug!(connection = %self.id, %id, verb = %options.verb, "action received");

		let action = IncomingAction {
			key,
			options,
			payload,
			client_id: self.client_id.clone(),
			table: Arc::clone(&self.table),
			finished: false,
		};
		let handler = Arc::clone(&self.handler);
		let table = Arc::clone(&self.table);
		tokio::spawn(async move {
			let outcome = handler.handle(action).await;
			table.finish_supervision(&key, outcome);
		});
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use webactions_protocol::ConnectReply;
	use webactions_runtime::MessageChannel;

	use super::*;

	struct Echo;

	#[async_trait]
	impl ActionHandler for Echo {
		async fn handle(&self, action: IncomingAction) -> Result<()> {
			let payload = action.payload().clone();
			action.update(json!("working"))?;
			action.close(payload)
		}
	}

	struct Failing;

	#[async_trait]
	impl ActionHandler for Failing {
		async fn handle(&self, _action: IncomingAction) -> Result<()> {
			Err(Error::Read("unreadable payload".into()))
		}
	}

	struct Forgetful;

	#[async_trait]
	impl ActionHandler for Forgetful {
		async fn handle(&self, action: IncomingAction) -> Result<()> {
			drop(action);
			Ok(())
		}
	}

	async fn connect(service: &HandlerService) -> MessagePort {
		let (mut requester, forwarded) = MessageChannel::new();
		service
			.control_sender()
			.unwrap()
			.send(ControlMessage::Connect { port: forwarded })
			.unwrap();
		let reply: ConnectReply = requester.recv().await.unwrap().parse().unwrap();
		assert!(reply.connected);
		assert!(reply.client_id.is_some());
		requester
	}

	fn spawn_service(handler: Arc<dyn ActionHandler>) -> Arc<HandlerService> {
		let config = ActionsConfig::default();
		let service = Arc::new(HandlerService::new(config.clone(), ClientRouter::new(&config)));
		let runner = Arc::clone(&service);
		tokio::spawn(async move { runner.run(handler).await });
		service
	}

	async fn recv(port: &mut MessagePort) -> Message {
		port.recv().await.unwrap().parse().unwrap()
	}

	#[tokio::test]
	async fn updates_are_sequenced_and_close_is_terminal() {
		let service = spawn_service(Arc::new(Echo));
		let mut port = connect(&service).await;

		port.post_json(&Message::action(ActionId(4), &"open".into(), json!("hello.txt")))
			.unwrap();

		assert_eq!(
			recv(&mut port).await,
			Message::update(ActionId(4), json!("working"), false).with_seq(0)
		);
		assert_eq!(
			recv(&mut port).await,
			Message::update(ActionId(4), json!("hello.txt"), true).with_seq(1)
		);
		assert_eq!(service.live_actions(), 0);
	}

	#[tokio::test]
	async fn handler_error_becomes_abort() {
		let service = spawn_service(Arc::new(Failing));
		let mut port = connect(&service).await;

		port.post_json(&Message::action(ActionId(0), &"open".into(), json!(null)))
			.unwrap();

		match recv(&mut port).await {
			Message::Abort {
				id, code, message, ..
			} => {
				assert_eq!(id, ActionId(0));
				assert_eq!(code, AbortCode::HandlerFailed);
				assert!(message.unwrap().contains("unreadable payload"));
			}
			other => panic!("expected abort, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn dropped_handle_sends_context_destroyed() {
		let service = spawn_service(Arc::new(Forgetful));
		let mut port = connect(&service).await;

		port.post_json(&Message::action(ActionId(1), &"edit".into(), json!(null)))
			.unwrap();

		assert!(matches!(
			recv(&mut port).await,
			Message::Abort {
				code: AbortCode::ContextDestroyed,
				..
			}
		));
		assert_eq!(service.live_actions(), 0);
	}

	#[tokio::test]
	async fn closing_connection_drops_its_actions() {
		struct Holding(Mutex<Vec<IncomingAction>>);

		#[async_trait]
		impl ActionHandler for Holding {
			async fn handle(&self, action: IncomingAction) -> Result<()> {
				self.0.lock().push(action);
				Ok(())
			}
		}

		let holder = Arc::new(Holding(Mutex::new(Vec::new())));
		let service = spawn_service(holder.clone());
		let port = connect(&service).await;

		port.post_json(&Message::action(ActionId(0), &"open".into(), json!(null)))
			.unwrap();
		while holder.0.lock().is_empty() {
			tokio::task::yield_now().await;
		}
		assert_eq!(service.live_actions(), 1);

		drop(port);
		while service.live_actions() > 0 {
			tokio::task::yield_now().await;
		}

		let action = holder.0.lock().pop().unwrap();
		assert!(matches!(
			action.update(json!("late")),
			Err(Error::UnknownAction { .. })
		));
	}
}
