//! Action registry: the id to transport-handle table on either side.
//!
//! The registry itself holds no lock. Each side owns exactly one and mutates it
//! from a single place (the requester's dispatch loop, the handler service's
//! action table), wrapping it in a mutex where handles need shared access.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use webactions_protocol::{ActionId, ConnectionId};
use webactions_runtime::{Error, Result};

/// Keys an [`ActionRegistry`] can be indexed by.
///
/// Requesters mint their own ids, so a bare [`ActionId`] is unambiguous there.
/// Handlers see ids from many requesters and must pair them with the
/// connection they arrived on.
pub trait RegistryKey: Copy + Eq + Hash + fmt::Debug {
	fn action_id(&self) -> ActionId;

	fn connection(&self) -> Option<ConnectionId> {
		None
	}
}

impl RegistryKey for ActionId {
	fn action_id(&self) -> ActionId {
		*self
	}
}

impl RegistryKey for (ConnectionId, ActionId) {
	fn action_id(&self) -> ActionId {
		self.1
	}

	fn connection(&self) -> Option<ConnectionId> {
		Some(self.0)
	}
}

/// Live entries keyed by action identity.
#[derive(Debug)]
pub struct ActionRegistry<K, V> {
	entries: HashMap<K, V>,
}

impl<K: RegistryKey, V> Default for ActionRegistry<K, V> {
	fn default() -> Self {
		Self::new()
	}
}

impl<K: RegistryKey, V> ActionRegistry<K, V> {
	pub fn new() -> Self {
		Self {
			entries: HashMap::new(),
		}
	}

	/// Inserts a live entry.
	///
	/// # Errors
	///
	/// [`Error::DuplicateId`] if `key` is already live. The existing entry is
	/// left untouched.
	pub fn register(&mut self, key: K, value: V) -> Result<()> {
		if self.entries.contains_key(&key) {
			return Err(Error::DuplicateId {
				id: key.action_id(),
				connection: key.connection(),
			});
		}
		self.entries.insert(key, value);
		Ok(())
	}

	/// # Errors
	///
	/// [`Error::UnknownAction`] if `key` has no live entry.
	pub fn lookup(&self, key: &K) -> Result<&V> {
		self.entries.get(key).ok_or_else(|| unknown(key))
	}

	pub fn lookup_mut(&mut self, key: &K) -> Result<&mut V> {
		self.entries.get_mut(key).ok_or_else(|| unknown(key))
	}

	/// Removes `key`, returning its entry. Removing an absent key is a no-op.
	pub fn unregister(&mut self, key: &K) -> Option<V> {
		self.entries.remove(key)
	}

	pub fn contains(&self, key: &K) -> bool {
		self.entries.contains_key(key)
	}

	/// Removes and returns every live entry.
	pub fn drain(&mut self) -> Vec<(K, V)> {
		self.entries.drain().collect()
	}

	/// Keeps only the entries for which `keep` returns true.
	pub fn retain(&mut self, mut keep: impl FnMut(&K, &mut V) -> bool) {
		self.entries.retain(|key, value| keep(key, value));
	}

	/// Removes and returns the entries for which `take` returns true.
	pub fn take_where(&mut self, mut take: impl FnMut(&K, &V) -> bool) -> Vec<(K, V)> {
		let keys: Vec<K> = self
			.entries
			.iter()
			.filter(|(key, value)| take(key, value))
			.map(|(key, _)| *key)
			.collect();
		keys.into_iter()
			.filter_map(|key| self.entries.remove(&key).map(|value| (key, value)))
			.collect()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

fn unknown<K: RegistryKey>(key: &K) -> Error {
	Error::UnknownAction {
		id: key.action_id(),
		connection: key.connection(),
	}
}

/// Which identity information a deployment can rely on to route messages.
///
/// [`IdInEnvelope`](Self::IdInEnvelope) is the primary design. The other two
/// exist for constrained hosts: port-per-action spends one connection per
/// action, and best-effort-single guesses the destination and can misroute
/// concurrent actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingStrategy {
	/// Shared port per connection, every envelope carries its action id.
	#[default]
	IdInEnvelope,
	/// One dedicated connection per action; arrival port identifies the action.
	PortPerAction,
	/// No session identity is exchanged; deliver to the single plausible destination.
	BestEffortSingle,
}

impl RoutingStrategy {
	/// Returns true for strategies that cannot guarantee correct delivery.
	pub fn is_best_effort(self) -> bool {
		matches!(self, RoutingStrategy::BestEffortSingle)
	}

	/// Returns true if the handler side mints a session id at handshake time.
	pub fn mints_session_ids(self) -> bool {
		!self.is_best_effort()
	}
}

impl fmt::Display for RoutingStrategy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			RoutingStrategy::IdInEnvelope => "id-in-envelope",
			RoutingStrategy::PortPerAction => "port-per-action",
			RoutingStrategy::BestEffortSingle => "best-effort-single",
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn duplicate_register_fails_until_unregistered() {
		let mut registry = ActionRegistry::new();
		registry.register(ActionId(1), "first").unwrap();

		let err = registry.register(ActionId(1), "second").unwrap_err();
		assert!(matches!(err, Error::DuplicateId { id: ActionId(1), connection: None }));
		assert_eq!(*registry.lookup(&ActionId(1)).unwrap(), "first");

		registry.unregister(&ActionId(1));
		registry.register(ActionId(1), "third").unwrap();
		assert_eq!(*registry.lookup(&ActionId(1)).unwrap(), "third");
	}

	#[test]
	fn unregister_is_idempotent() {
		let mut registry: ActionRegistry<ActionId, ()> = ActionRegistry::new();
		assert!(registry.unregister(&ActionId(9)).is_none());
		assert!(registry.unregister(&ActionId(9)).is_none());
	}

	#[test]
	fn lookup_of_absent_key_is_unknown_action() {
		let registry: ActionRegistry<(ConnectionId, ActionId), ()> = ActionRegistry::new();
		let err = registry.lookup(&(ConnectionId(3), ActionId(7))).unwrap_err();
		assert!(matches!(
			err,
			Error::UnknownAction {
				id: ActionId(7),
				connection: Some(ConnectionId(3))
			}
		));
	}

	#[test]
	fn same_id_on_different_connections_is_distinct() {
		let mut registry = ActionRegistry::new();
		registry.register((ConnectionId(1), ActionId(0)), 'a').unwrap();
		registry.register((ConnectionId(2), ActionId(0)), 'b').unwrap();
		assert_eq!(registry.len(), 2);

		registry.retain(|(conn, _), _| *conn != ConnectionId(1));
		assert_eq!(registry.len(), 1);
		assert!(registry.contains(&(ConnectionId(2), ActionId(0))));
	}

	#[test]
	fn routing_strategy_wire_names() {
		assert_eq!(
			serde_json::to_value(RoutingStrategy::BestEffortSingle).unwrap(),
			"best-effort-single"
		);
		assert_eq!(RoutingStrategy::default(), RoutingStrategy::IdInEnvelope);
		assert!(!RoutingStrategy::PortPerAction.is_best_effort());
	}
}
