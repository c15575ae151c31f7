//! Requester side of an action exchange.
//!
//! A [`Requester`] owns one established [`Connection`] and multiplexes any
//! number of concurrent actions over it, every envelope carrying its action
//! id. Its [`run`](Requester::run) loop is the only reader of the port and
//! the single place inbound traffic mutates the action registry.
//!
//! # Example
//!
//! ```ignore
//! let connection = establisher.connect("https://editor.example/").await?;
//! let requester = Requester::new(connection, ActionsConfig::default());
//! tokio::spawn({
//!     let requester = requester.clone();
//!     async move { requester.run().await }
//! });
//!
//! let mut action = requester.perform_action("edit", json!({"file": blob}))?;
//! while let Some(event) = action.next_event().await {
//!     println!("{event:?}");
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use webactions_protocol::{ActionId, ActionOptions, ClientId, ConnectionId, Message};
use webactions_runtime::{
	ConnectFailure, Connection, Error, Establisher, PortMessage, PortReceiver, PortSender,
	ReorderTable, Result,
};

use crate::action::{
	AbortReason, ActionEvent, ActionNotice, ActionState, ActionView, Transition,
};
use crate::chooser::{Choice, Chooser};
use crate::config::ActionsConfig;
use crate::events::{EventBus, EventStream};
use crate::registry::{ActionRegistry, RoutingStrategy};
use crate::store::HandlerStore;

struct LiveAction {
	view: ActionView,
	events: mpsc::UnboundedSender<ActionEvent>,
	last_activity: Instant,
}

struct RequesterState {
	registry: ActionRegistry<ActionId, LiveAction>,
	reorder: ReorderTable<ActionId, Message>,
	next_id: u64,
	closed: bool,
}

struct Inner {
	connection_id: ConnectionId,
	target: String,
	client_id: Option<ClientId>,
	sender: PortSender,
	receiver: Mutex<Option<PortReceiver>>,
	state: Mutex<RequesterState>,
	events: EventBus<ActionNotice>,
	config: ActionsConfig,
	violations: AtomicU64,
}

/// Requester bound to one connection. Cheap to clone.
#[derive(Clone)]
pub struct Requester {
	inner: Arc<Inner>,
}

impl Requester {
	pub fn new(connection: Connection, config: ActionsConfig) -> Self {
		let (connection_id, target, client_id, sender, receiver) = connection.into_parts();
		let reorder = ReorderTable::new(config.reorder_capacity);
		Self {
			inner: Arc::new(Inner {
				connection_id,
				target,
				client_id,
				sender,
				receiver: Mutex::new(Some(receiver)),
				state: Mutex::new(RequesterState {
					registry: ActionRegistry::new(),
					reorder,
					next_id: 0,
					closed: false,
				}),
				events: EventBus::default(),
				config,
				violations: AtomicU64::new(0),
			}),
		}
	}

	pub fn connection_id(&self) -> ConnectionId {
		self.inner.connection_id
	}

	pub fn target(&self) -> &str {
		&self.inner.target
	}

	/// Session id the handler minted for this connection, if any.
	pub fn client_id(&self) -> Option<&ClientId> {
		self.inner.client_id.as_ref()
	}

	/// Starts a new action.
	///
	/// The id is registered before the `action` envelope is posted, so a reply
	/// can never race ahead of its registry entry. If posting fails the entry
	/// is removed again.
	///
	/// # Errors
	///
	/// [`Error::ChannelClosed`] once the connection is gone.
	pub fn perform_action(
		&self,
		options: impl Into<ActionOptions>,
		payload: Value,
	) -> Result<RequestedAction> {
		let options = options.into();
		let (events_tx, events_rx) = mpsc::unbounded_channel();

		let id = {
			let mut state = self.inner.state.lock();
			if state.closed {
				return Err(Error::ChannelClosed);
			}
			let id = ActionId(state.next_id);
			state.next_id += 1;
			state.registry.register(
				id,
				LiveAction {
					view: ActionView::requester(id, options.verb.clone()),
					events: events_tx,
					last_activity: Instant::now(),
				},
			)?;

			let message = Message::action(id, &options, payload).with_seq(0);
			if let Err(e) = self.inner.sender.post_json(&message) {
				state.registry.unregister(&id);
				return Err(e);
			}
			id
		};

		tracing::debug!(
			connection = %self.inner.connection_id,
			%id,
			verb = %options.verb,
			"action sent"
		);
		Ok(RequestedAction {
			id,
			verb: options.verb,
			events: events_rx,
			inner: Arc::clone(&self.inner),
			session: None,
		})
	}

	/// Reads the port until it closes, then aborts every live action.
	///
	/// Also sweeps for idle actions every `sweep_interval`. Only one loop may
	/// run per requester.
	pub async fn run(&self) -> Result<()> {
		let mut receiver = self
			.inner
			.receiver
			.lock()
			.take()
			.ok_or_else(|| Error::ProtocolViolation("dispatch loop already running".into()))?;

		let mut sweep = tokio::time::interval(self.inner.config.sweep_interval());
		sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
		sweep.tick().await;

		loop {
			tokio::select! {
				message = receiver.recv() => match message {
					Some(message) => {
						if let Err(e) = self.dispatch_port_message(message) {
							tracing::debug!(error = %e, "dispatch failed");
						}
					}
					None => break,
				},
				_ = sweep.tick() => {
					self.reap_idle(self.inner.config.idle_action_timeout());
				}
			}
		}

		tracing::debug!(connection = %self.inner.connection_id, "port closed");
		self.teardown();
		Ok(())
	}

	fn dispatch_port_message(&self, message: PortMessage) -> Result<()> {
		match message.parse::<Message>() {
			Ok(message) => self.dispatch(message),
			Err(e) => {
				let err = Error::ProtocolViolation(format!("malformed envelope: {e}"));
				self.record_violation(&err);
				Err(err)
			}
		}
	}

	/// Feeds one inbound envelope through reordering and demultiplexing.
	///
	/// Violations (unknown or closed id, duplicate sequence number, wrong
	/// message type) are logged, counted and returned, never delivered.
	pub fn dispatch(&self, message: Message) -> Result<()> {
		let result = self.dispatch_inner(message);
		if let Err(e) = &result {
			if e.is_protocol_violation() {
				self.record_violation(e);
			}
		}
		result
	}

	fn dispatch_inner(&self, message: Message) -> Result<()> {
		let (id, seq) = match &message {
			Message::Update { id, seq, .. } | Message::Abort { id, seq, .. } => (*id, *seq),
			other => {
				return Err(Error::ProtocolViolation(format!(
					"unexpected {} message on requester port",
					other.kind()
				)));
			}
		};

		let mut state = self.inner.state.lock();
		if !state.registry.contains(&id) {
			return Err(self.unknown(id));
		}

		let ready = state
			.reorder
			.accept(&id, seq, message)
			.map_err(|e| Error::ProtocolViolation(format!("action {id}: {e}")))?;

		for message in ready {
			self.deliver(&mut state, message)?;
		}
		Ok(())
	}

	fn deliver(&self, state: &mut RequesterState, message: Message) -> Result<()> {
		let (id, transition, event) = match message {
			Message::Update {
				id,
				payload,
				done: false,
				..
			} => (id, Transition::Update, ActionEvent::Update { payload }),
			Message::Update {
				id,
				payload,
				done: true,
				..
			} => (id, Transition::Close, ActionEvent::Completed { payload }),
			Message::Abort {
				id, code, message, ..
			} => (
				id,
				Transition::Abort,
				ActionEvent::Aborted {
					reason: AbortReason::from_wire(code, message),
				},
			),
			other => {
				return Err(Error::ProtocolViolation(format!(
					"unexpected {} message on requester port",
					other.kind()
				)));
			}
		};

		let live = state.registry.lookup_mut(&id).map_err(|_| self.unknown(id))?;
		let next = live.view.apply(transition)?;
		live.last_activity = Instant::now();
		let _ = live.events.send(event.clone());

		if next.is_closed() {
			state.registry.unregister(&id);
			state.reorder.remove(&id);
		}

		tracing::debug!(connection = %self.inner.connection_id, %id, state = %next, "delivered");
		self.inner.events.emit(ActionNotice { id, event });
		Ok(())
	}

	fn teardown(&self) {
		let drained = {
			let mut state = self.inner.state.lock();
			state.closed = true;
			state.reorder.retain(|_| false);
			state.registry.drain()
		};

		if !drained.is_empty() {
			tracing::warn!(
				connection = %self.inner.connection_id,
				count = drained.len(),
				"connection lost with actions in flight"
			);
		}
		for (id, live) in drained {
			self.abort_locally(id, live, AbortReason::ConnectionLost);
		}
	}

	/// Reclaims actions that saw no traffic for `max_idle` or whose handle was dropped.
	///
	/// Actions with a live handle are told they were abandoned. Returns how
	/// many entries were removed.
	pub fn reap_idle(&self, max_idle: Duration) -> usize {
		let now = Instant::now();
		let reaped = {
			let mut state = self.inner.state.lock();
			let reaped = state.registry.take_where(|_, live| {
				live.events.is_closed() || now.duration_since(live.last_activity) >= max_idle
			});
			for (id, _) in &reaped {
				state.reorder.remove(id);
			}
			reaped
		};

		let count = reaped.len();
		for (id, live) in reaped {
			if live.events.is_closed() {
				tracing::debug!(%id, "reclaimed abandoned action");
			} else {
				tracing::warn!(%id, idle_ms = max_idle.as_millis() as u64, "action idle, aborting");
				self.abort_locally(id, live, AbortReason::Abandoned);
			}
		}
		count
	}

	fn abort_locally(&self, id: ActionId, mut live: LiveAction, reason: AbortReason) {
		let _ = live.view.apply(Transition::Abort);
		let event = ActionEvent::Aborted { reason };
		let _ = live.events.send(event.clone());
		self.inner.events.emit(ActionNotice { id, event });
	}

	fn record_violation(&self, err: &Error) {
		self.inner.violations.fetch_add(1, Ordering::Relaxed);
		tracing::warn!(connection = %self.inner.connection_id, error = %err, "dropped message");
	}

	fn unknown(&self, id: ActionId) -> Error {
		Error::UnknownAction {
			id,
			connection: Some(self.inner.connection_id),
		}
	}

	/// Every event for every action on this connection.
	pub fn subscribe(&self) -> EventStream<ActionNotice> {
		self.inner.events.subscribe()
	}

	/// Number of inbound messages dropped as protocol violations.
	pub fn violations(&self) -> u64 {
		self.inner.violations.load(Ordering::Relaxed)
	}

	pub fn live_actions(&self) -> usize {
		self.inner.state.lock().registry.len()
	}

	pub fn is_closed(&self) -> bool {
		self.inner.state.lock().closed
	}
}

/// Requester-side handle for one action.
pub struct RequestedAction {
	id: ActionId,
	verb: String,
	events: mpsc::UnboundedReceiver<ActionEvent>,
	inner: Arc<Inner>,
	session: Option<AbortHandle>,
}

impl RequestedAction {
	pub fn id(&self) -> ActionId {
		self.id
	}

	pub fn verb(&self) -> &str {
		&self.verb
	}

	pub fn state(&self) -> ActionState {
		self.inner
			.state
			.lock()
			.registry
			.lookup(&self.id)
			.map(|live| live.view.state())
			.unwrap_or(ActionState::Closed)
	}

	/// Next event for this action, `None` after the terminal one.
	pub async fn next_event(&mut self) -> Option<ActionEvent> {
		self.events.recv().await
	}

	/// Collects events up to and including the terminal one.
	pub async fn wait_closed(mut self) -> Vec<ActionEvent> {
		let mut events = Vec::new();
		while let Some(event) = self.events.recv().await {
			let terminal = event.is_terminal();
			events.push(event);
			if terminal {
				break;
			}
		}
		events
	}
}

impl Drop for RequestedAction {
	fn drop(&mut self) {
		if let Some(session) = self.session.take() {
			session.abort();
		}
	}
}

impl std::fmt::Debug for RequestedAction {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RequestedAction")
			.field("id", &self.id)
			.field("verb", &self.verb)
			.field("connection", &self.inner.connection_id)
			.finish()
	}
}

/// Connects to `target_url` and performs a single action over a dedicated connection.
///
/// The connection lives exactly as long as the returned handle.
pub async fn perform_action(
	establisher: &Establisher,
	target_url: &str,
	options: impl Into<ActionOptions>,
	payload: Value,
) -> Result<RequestedAction> {
	let connection = establisher.connect(target_url).await?;
	let config = ActionsConfig {
		connect_timeout_ms: establisher.timeout().as_millis() as u64,
		routing: RoutingStrategy::PortPerAction,
		..ActionsConfig::default()
	};
	let requester = Requester::new(connection, config);
	let mut action = requester.perform_action(options, payload)?;

	let runner = requester.clone();
	let task = tokio::spawn(async move {
		if let Err(e) = runner.run().await {
			tracing::error!(error = %e, "requester loop failed");
		}
	});
	action.session = Some(task.abort_handle());
	Ok(action)
}

/// Lets `chooser` pick among the handlers registered for `verb`, then connects.
///
/// No port exists until a handler is chosen, so a cancelled choice leaks
/// nothing to any handler.
///
/// # Errors
///
/// [`ConnectFailure::NoAvailableTarget`] when nothing handles `verb`,
/// [`ConnectFailure::Cancelled`] when the chooser is dismissed, otherwise
/// whatever the handshake reports.
pub async fn connect_via_chooser(
	establisher: &Establisher,
	store: &dyn HandlerStore,
	chooser: &dyn Chooser,
	verb: &str,
) -> Result<Connection> {
	let handlers = store.handlers_for_verb(verb).await?;
	let label = format!("handlers for '{verb}'");
	if handlers.is_empty() {
		return Err(Error::connection(label, ConnectFailure::NoAvailableTarget));
	}

	match chooser.choose(verb, &handlers).await {
		Choice::Cancelled => Err(Error::connection(label, ConnectFailure::Cancelled)),
		Choice::Selected(url) if handlers.iter().any(|h| h.url == url) => {
			establisher.connect(&url).await
		}
		Choice::Selected(url) => Err(Error::connection(url, ConnectFailure::NoAvailableTarget)),
	}
}
