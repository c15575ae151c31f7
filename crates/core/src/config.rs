//! Tunables shared by the requester, handler service and router.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use webactions_protocol::DEFAULT_CONNECT_TIMEOUT_MS;
use webactions_runtime::DEFAULT_REORDER_CAPACITY;

use crate::registry::RoutingStrategy;

/// Runtime configuration. Every field has a default, so `{}` is a valid file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionsConfig {
	/// How long the establisher waits for the acceptance token.
	pub connect_timeout_ms: u64,
	/// Live actions with no traffic for this long are aborted as abandoned.
	pub idle_action_timeout_ms: u64,
	/// How often the requester sweeps for abandoned actions.
	pub sweep_interval_ms: u64,
	/// How long the router waits for a context to announce itself.
	pub startup_grace_ms: u64,
	/// Out-of-order messages buffered per action before it is a violation.
	pub reorder_capacity: usize,
	/// Route connections without a session id to the most recently opened context.
	pub allow_most_recent_fallback: bool,
	pub routing: RoutingStrategy,
}

impl Default for ActionsConfig {
	fn default() -> Self {
		Self {
			connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
			idle_action_timeout_ms: 5 * 60 * 1_000,
			sweep_interval_ms: 30 * 1_000,
			startup_grace_ms: 2_000,
			reorder_capacity: DEFAULT_REORDER_CAPACITY,
			allow_most_recent_fallback: true,
			routing: RoutingStrategy::default(),
		}
	}
}

impl ActionsConfig {
	pub fn connect_timeout(&self) -> Duration {
		Duration::from_millis(self.connect_timeout_ms)
	}

	pub fn idle_action_timeout(&self) -> Duration {
		Duration::from_millis(self.idle_action_timeout_ms)
	}

	pub fn sweep_interval(&self) -> Duration {
		Duration::from_millis(self.sweep_interval_ms.max(1))
	}

	pub fn startup_grace(&self) -> Duration {
		Duration::from_millis(self.startup_grace_ms)
	}
}
