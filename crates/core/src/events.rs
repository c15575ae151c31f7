//! Broadcast plus predicate waiters, for observers that are not the owner of
//! an action handle.
//!
//! - [`EventBus`] - dispatcher combining a broadcast channel with one-shot waiters
//! - [`EventStream`] - receiver wrapper that logs and skips lag instead of failing
//!
//! Waiters are served before the broadcast, so a `wait_for` style caller gets
//! its event even when stream subscribers are lagging.

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

struct WaiterEntry<E> {
	predicate: Box<dyn Fn(&E) -> bool + Send + Sync>,
	complete_tx: oneshot::Sender<E>,
}

pub(crate) struct EventBus<E: Clone + Send + 'static> {
	tx: broadcast::Sender<E>,
	waiters: Mutex<Vec<WaiterEntry<E>>>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
	pub fn new(capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity);
		Self {
			tx,
			waiters: Mutex::new(Vec::new()),
		}
	}

	/// Completes matching waiters, then broadcasts to subscribers.
	///
	/// Waiters whose receiver was dropped (a caller that timed out) are pruned
	/// on the way.
	pub fn emit(&self, event: E) {
		{
			let mut waiters = self.waiters.lock();
			let mut i = 0;
			while i < waiters.len() {
				if waiters[i].complete_tx.is_closed() {
					waiters.swap_remove(i);
				} else if (waiters[i].predicate)(&event) {
					let entry = waiters.swap_remove(i);
					let _ = entry.complete_tx.send(event.clone());
				} else {
					i += 1;
				}
			}
		}
		let _ = self.tx.send(event);
	}

	/// Events emitted before subscribing are not received.
	pub fn subscribe(&self) -> EventStream<E> {
		EventStream::new(self.tx.subscribe())
	}

	/// Registers a waiter for the first event matching `predicate`.
	///
	/// Abandoned waiters are pruned first, so callers that give up without an
	/// event ever arriving do not accumulate.
	pub fn register_waiter<F>(&self, predicate: F) -> oneshot::Receiver<E>
	where
		F: Fn(&E) -> bool + Send + Sync + 'static,
	{
		let (complete_tx, complete_rx) = oneshot::channel();
		let mut waiters = self.waiters.lock();
		waiters.retain(|w| !w.complete_tx.is_closed());
		waiters.push(WaiterEntry {
			predicate: Box::new(predicate),
			complete_tx,
		});
		complete_rx
	}

	/// Drops waiters whose receiver is gone.
	pub fn prune(&self) {
		self.waiters.lock().retain(|w| !w.complete_tx.is_closed());
	}

	#[cfg(test)]
	pub fn waiter_count(&self) -> usize {
		self.waiters.lock().len()
	}
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
	fn default() -> Self {
		Self::new(256)
	}
}

/// Subscription to an event bus.
pub struct EventStream<E: Clone + Send + 'static> {
	rx: broadcast::Receiver<E>,
}

impl<E: Clone + Send + 'static> EventStream<E> {
	pub(crate) fn new(rx: broadcast::Receiver<E>) -> Self {
		Self { rx }
	}

	/// Receives the next event, or `None` once the source is gone.
	pub async fn recv(&mut self) -> Option<E> {
		loop {
			match self.rx.recv().await {
				Ok(event) => return Some(event),
				Err(broadcast::error::RecvError::Lagged(n)) => {
					tracing::warn!(dropped = n, "event stream lagged, dropped events");
				}
				Err(broadcast::error::RecvError::Closed) => return None,
			}
		}
	}

	pub fn try_recv(&mut self) -> Option<E> {
		loop {
			match self.rx.try_recv() {
				Ok(event) => return Some(event),
				Err(broadcast::error::TryRecvError::Lagged(n)) => {
					tracing::warn!(dropped = n, "event stream lagged, dropped events");
				}
				Err(
					broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
				) => return None,
			}
		}
	}
}
