//! Destination context routing on the handler side.
//!
//! A handler origin can have several contexts (windows) open at once. Each
//! announces itself with a `startup` message, optionally presenting the
//! session id the service minted at handshake time, and receives actions
//! through its [`ClientHandle`].
//!
//! # Policy
//!
//! 1. A connection bound to a session id is routed only to the context that
//!    presented that id. If it has not started yet the router waits up to the
//!    startup grace period for it, then fails. It never guesses.
//! 2. A connection without a session id goes to the most recently opened
//!    context, when that fallback is enabled. This is best-effort and can
//!    misroute overlapping actions; every such route is logged at `warn`.
//! 3. With nothing to route to, the [`WindowOpener`] is asked for a new
//!    context, but only for a user gesture unless the opener says otherwise.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use webactions_protocol::{ClientId, ConnectionId, Message};
use webactions_runtime::{Error, Result};

use crate::config::ActionsConfig;
use crate::events::EventBus;
use crate::handler::{ActionHandler, IncomingAction};

/// Host capability to create new top-level contexts.
#[async_trait]
pub trait WindowOpener: Send + Sync {
	/// Whether the host allows opening without a user gesture.
	fn opens_without_gesture(&self) -> bool {
		false
	}

	/// Opens a context that will announce itself on `router`, presenting
	/// `client_id` in its startup message when one is given.
	async fn open(&self, router: &ClientRouter, client_id: Option<&ClientId>) -> Result<()>;
}

/// How a [`Route`] was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
	/// The context presented the connection's session id.
	Exact,
	/// Best-effort guess: the most recently opened context.
	MostRecent,
	/// A context opened for this action.
	Opened,
}

impl fmt::Display for RouteKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			RouteKind::Exact => "exact",
			RouteKind::MostRecent => "most-recent (best-effort)",
			RouteKind::Opened => "opened",
		})
	}
}

/// A selected destination context.
#[derive(Debug)]
pub struct Route {
	kind: RouteKind,
	context: u64,
	client_id: Option<ClientId>,
	tx: mpsc::UnboundedSender<IncomingAction>,
}

impl Route {
	pub fn kind(&self) -> RouteKind {
		self.kind
	}

	pub fn client_id(&self) -> Option<&ClientId> {
		self.client_id.as_ref()
	}

	/// Hands `action` to the context. The route is spent either way.
	///
	/// # Errors
	///
	/// [`Error::NoAvailableClient`] if the context closed in the meantime; the
	/// action is dropped, which aborts it.
	pub fn deliver(self, action: IncomingAction) -> Result<()> {
		self.tx
			.send(action)
			.map_err(|_| Error::NoAvailableClient(format!("context {} closed", self.context)))
	}
}

struct ClientEntry {
	key: u64,
	client_id: Option<ClientId>,
	tx: mpsc::UnboundedSender<IncomingAction>,
}

impl ClientEntry {
	fn route(&self, kind: RouteKind) -> Route {
		Route {
			kind,
			context: self.key,
			client_id: self.client_id.clone(),
			tx: self.tx.clone(),
		}
	}
}

#[derive(Default)]
struct RouterState {
	/// Live contexts in the order they started.
	clients: Vec<ClientEntry>,
	sessions: HashMap<ConnectionId, ClientId>,
	next_key: u64,
}

#[derive(Clone)]
struct Startup {
	key: u64,
	client_id: Option<ClientId>,
}

struct RouterInner {
	state: Mutex<RouterState>,
	startups: EventBus<Startup>,
	opener: Mutex<Option<Arc<dyn WindowOpener>>>,
	startup_grace: Duration,
	allow_most_recent: bool,
}

/// Client router shared by the handler service and its contexts. Cheap to clone.
#[derive(Clone)]
pub struct ClientRouter {
	inner: Arc<RouterInner>,
}

impl ClientRouter {
	pub fn new(config: &ActionsConfig) -> Self {
		Self {
			inner: Arc::new(RouterInner {
				state: Mutex::new(RouterState::default()),
				startups: EventBus::new(64),
				opener: Mutex::new(None),
				startup_grace: config.startup_grace(),
				allow_most_recent: config.allow_most_recent_fallback,
			}),
		}
	}

	pub fn set_opener(&self, opener: Arc<dyn WindowOpener>) {
		*self.inner.opener.lock() = Some(opener);
	}

	/// Registers a context from its `startup` message.
	///
	/// # Errors
	///
	/// [`Error::ProtocolViolation`] if `startup` is not a startup message or
	/// its client id is already held by a live context.
	pub fn register_client(&self, startup: Message) -> Result<ClientHandle> {
		let client_id = match startup {
			Message::Startup { client_id } => client_id,
			other => {
				return Err(Error::ProtocolViolation(format!(
					"expected startup message, got {}",
					other.kind()
				)));
			}
		};

		let (tx, rx) = mpsc::unbounded_channel();
		let key = {
			let mut state = self.inner.state.lock();
			if let Some(id) = &client_id {
				let taken = state
					.clients
					.iter()
					.any(|c| c.client_id.as_ref() == Some(id) && !c.tx.is_closed());
				if taken {
					return Err(Error::ProtocolViolation(format!(
						"client {id} is already registered"
					)));
				}
			}
			let key = state.next_key;
			state.next_key += 1;
			state.clients.push(ClientEntry {
				key,
				client_id: client_id.clone(),
				tx,
			});
			key
		};

		tracing::debug!(context = key, ?client_id, "context started");
		self.inner.startups.emit(Startup {
			key,
			client_id: client_id.clone(),
		});
		Ok(ClientHandle {
			key,
			client_id,
			actions: rx,
			router: self.clone(),
		})
	}

	fn unregister(&self, key: u64) {
		self.inner.state.lock().clients.retain(|c| c.key != key);
		tracing::debug!(context = key, "context closed");
	}

	/// Records the session id minted for `connection_id`.
	pub fn bind_session(&self, connection_id: ConnectionId, client_id: ClientId) {
		self.inner.state.lock().sessions.insert(connection_id, client_id);
	}

	pub fn unbind_session(&self, connection_id: ConnectionId) {
		self.inner.state.lock().sessions.remove(&connection_id);
	}

	pub fn session_for(&self, connection_id: ConnectionId) -> Option<ClientId> {
		self.inner.state.lock().sessions.get(&connection_id).cloned()
	}

	/// Number of live contexts.
	pub fn client_count(&self) -> usize {
		self.inner
			.state
			.lock()
			.clients
			.iter()
			.filter(|c| !c.tx.is_closed())
			.count()
	}

	/// Picks the context that should receive an action from `connection_id`.
	///
	/// # Errors
	///
	/// [`Error::NoAvailableClient`] when no context matches and none could be
	/// opened (or the opened one never announced itself).
	pub async fn select_destination(
		&self,
		connection_id: ConnectionId,
		user_gesture: bool,
	) -> Result<Route> {
		match self.session_for(connection_id) {
			Some(client_id) => self.select_session(client_id, user_gesture).await,
			None => self.select_unbound(connection_id, user_gesture).await,
		}
	}

	async fn select_session(&self, client_id: ClientId, user_gesture: bool) -> Result<Route> {
		if let Some(route) = self.find_exact(&client_id) {
			return Ok(route);
		}

		// Register before the second lookup so a startup in between is not missed.
		let waiter = {
			let wanted = client_id.clone();
			self.inner
				.startups
				.register_waiter(move |s: &Startup| s.client_id.as_ref() == Some(&wanted))
		};
		if let Some(route) = self.find_exact(&client_id) {
			drop(waiter);
			self.inner.startups.prune();
			return Ok(route);
		}

		let opened = match self.try_open(Some(&client_id), user_gesture).await {
			Ok(opened) => opened,
			Err(err) => {
				drop(waiter);
				self.inner.startups.prune();
				return Err(err);
			}
		};
		self.await_startup(waiter).await;

		match self.find_exact(&client_id) {
			Some(mut route) => {
				if opened {
					route.kind = RouteKind::Opened;
				}
				Ok(route)
			}
			None => Err(Error::NoAvailableClient(format!(
				"no context announced session {client_id} within {}ms",
				self.inner.startup_grace.as_millis()
			))),
		}
	}

	async fn select_unbound(&self, connection_id: ConnectionId, user_gesture: bool) -> Result<Route> {
		if self.inner.allow_most_recent {
			if let Some(route) = self.find_most_recent() {
				tracing::warn!(
					connection = %connection_id,
					context = route.context,
					"no session id, routing to most recent context (best-effort)"
				);
				return Ok(route);
			}
		}

		let since = self.inner.state.lock().next_key;
		let waiter = self.inner.startups.register_waiter(move |s: &Startup| s.key >= since);
		let refused = match self.try_open(None, user_gesture).await {
			Ok(true) => None,
			Ok(false) => Some(Error::NoAvailableClient(
				"no open context and none may be opened".to_string(),
			)),
			Err(err) => Some(err),
		};
		if let Some(err) = refused {
			drop(waiter);
			self.inner.startups.prune();
			return Err(err);
		}
		self.await_startup(waiter).await;

		let state = self.inner.state.lock();
		state
			.clients
			.iter()
			.rev()
			.find(|c| c.key >= since && !c.tx.is_closed())
			.map(|c| c.route(RouteKind::Opened))
			.ok_or_else(|| Error::NoAvailableClient("opened context never started".to_string()))
	}

	fn find_exact(&self, client_id: &ClientId) -> Option<Route> {
		let state = self.inner.state.lock();
		state
			.clients
			.iter()
			.find(|c| c.client_id.as_ref() == Some(client_id) && !c.tx.is_closed())
			.map(|c| c.route(RouteKind::Exact))
	}

	fn find_most_recent(&self) -> Option<Route> {
		let state = self.inner.state.lock();
		state
			.clients
			.iter()
			.rev()
			.find(|c| !c.tx.is_closed())
			.map(|c| c.route(RouteKind::MostRecent))
	}

	async fn try_open(&self, client_id: Option<&ClientId>, user_gesture: bool) -> Result<bool> {
		let opener = self.inner.opener.lock().clone();
		match opener {
			Some(opener) if user_gesture || opener.opens_without_gesture() => {
				tracing::debug!(?client_id, "opening context");
				opener.open(self, client_id).await?;
				Ok(true)
			}
			Some(_) => {
				tracing::debug!("not opening a context without a user gesture");
				Ok(false)
			}
			None => Ok(false),
		}
	}

	async fn await_startup(&self, waiter: oneshot::Receiver<Startup>) {
		let _ = tokio::time::timeout(self.inner.startup_grace, waiter).await;
		self.inner.startups.prune();
	}
}

/// A registered destination context.
///
/// Dropping the handle unregisters the context; actions still queued for it
/// are dropped and thereby aborted.
pub struct ClientHandle {
	key: u64,
	client_id: Option<ClientId>,
	actions: mpsc::UnboundedReceiver<IncomingAction>,
	router: ClientRouter,
}

impl ClientHandle {
	pub fn client_id(&self) -> Option<&ClientId> {
		self.client_id.as_ref()
	}

	/// Next action routed to this context.
	pub async fn next_action(&mut self) -> Option<IncomingAction> {
		self.actions.recv().await
	}

	pub fn try_next_action(&mut self) -> Option<IncomingAction> {
		self.actions.try_recv().ok()
	}
}

impl Drop for ClientHandle {
	fn drop(&mut self) {
		self.router.unregister(self.key);
	}
}

impl fmt::Debug for ClientHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ClientHandle")
			.field("context", &self.key)
			.field("client_id", &self.client_id)
			.finish()
	}
}

/// [`ActionHandler`] that forwards every action to a routed context.
///
/// Delivery is an at-most-once handoff: the context owns the action after it.
pub struct ClientDispatcher {
	router: ClientRouter,
	user_gesture: bool,
}

impl ClientDispatcher {
	pub fn new(router: ClientRouter) -> Self {
		Self {
			router,
			user_gesture: true,
		}
	}

	/// Whether actions arrive in response to a user gesture, which gates
	/// opening new contexts.
	pub fn with_user_gesture(mut self, user_gesture: bool) -> Self {
		self.user_gesture = user_gesture;
		self
	}
}

#[async_trait]
impl ActionHandler for ClientDispatcher {
	async fn handle(&self, action: IncomingAction) -> Result<()> {
		let route = self
			.router
			.select_destination(action.connection_id(), self.user_gesture)
			.await?;
		tracing::debug!(
			connection = %action.connection_id(),
			id = %action.id(),
			context = route.context,
			route = %route.kind,
			"routing action"
		);
		route.deliver(action)
	}
}
