//! Action lifecycle shared by both sides of an exchange.
//!
//! ```text
//! Pending --update--> Active --update--> Active
//!    |                  |
//!    +---close/abort----+----> Closed (terminal)
//! ```
//!
//! The requester and the handler each keep an [`ActionView`] of the same
//! logical action; the only link between the two is the id and the port.

use std::fmt;

use serde_json::Value;
use webactions_protocol::{AbortCode, ActionId};
use webactions_runtime::{Error, Result};

/// Lifecycle state of one side's view of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
	/// Created and sent; the handler has not answered yet.
	Pending,
	/// The handler has the action and may stream updates.
	Active,
	/// Terminal. No traffic is sent or accepted for the id afterwards.
	Closed,
}

/// Inputs that move an action between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
	/// A `done: false` update.
	Update,
	/// A `done: true` update.
	Close,
	/// Abnormal termination, explicit or inferred.
	Abort,
}

impl ActionState {
	/// Applies `transition`, returning the next state.
	///
	/// # Errors
	///
	/// [`Error::ProtocolViolation`] for anything that arrives after `Closed`.
	pub fn advance(self, transition: Transition) -> Result<ActionState> {
		match (self, transition) {
			(ActionState::Closed, t) => Err(Error::ProtocolViolation(format!(
				"{t:?} after action was closed"
			))),
			(_, Transition::Close | Transition::Abort) => Ok(ActionState::Closed),
			(_, Transition::Update) => Ok(ActionState::Active),
		}
	}

	pub fn is_closed(self) -> bool {
		self == ActionState::Closed
	}
}

impl fmt::Display for ActionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			ActionState::Pending => "pending",
			ActionState::Active => "active",
			ActionState::Closed => "closed",
		})
	}
}

/// Which side of the exchange a view belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
	Requester,
	Handler,
}

/// One side's bookkeeping for an action.
#[derive(Debug, Clone)]
pub struct ActionView {
	pub id: ActionId,
	pub verb: String,
	pub kind: ActionKind,
	state: ActionState,
}

impl ActionView {
	/// A freshly created requester view, in `Pending`.
	pub fn requester(id: ActionId, verb: impl Into<String>) -> Self {
		Self {
			id,
			verb: verb.into(),
			kind: ActionKind::Requester,
			state: ActionState::Pending,
		}
	}

	/// A handler view for a just-received action, already `Active`.
	pub fn handler(id: ActionId, verb: impl Into<String>) -> Self {
		Self {
			id,
			verb: verb.into(),
			kind: ActionKind::Handler,
			state: ActionState::Active,
		}
	}

	pub fn state(&self) -> ActionState {
		self.state
	}

	pub fn apply(&mut self, transition: Transition) -> Result<ActionState> {
		self.state = self.state.advance(transition)?;
		Ok(self.state)
	}
}

/// Why an action ended without a normal `done` update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
	/// Handler logic reported a failure.
	HandlerFailed(String),
	/// The handler context went away while holding the action.
	ContextDestroyed,
	/// The handler had nowhere to deliver the action.
	NoAvailableClient,
	/// The port closed under the action.
	ConnectionLost,
	/// Nothing happened for longer than the idle timeout.
	Abandoned,
}

impl AbortReason {
	/// Maps a wire abort onto the local reason.
	pub fn from_wire(code: AbortCode, message: Option<String>) -> Self {
		match code {
			AbortCode::HandlerFailed => {
				AbortReason::HandlerFailed(message.unwrap_or_else(|| "handler failed".to_string()))
			}
			AbortCode::ContextDestroyed => AbortReason::ContextDestroyed,
			AbortCode::NoAvailableClient => AbortReason::NoAvailableClient,
		}
	}
}

impl fmt::Display for AbortReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AbortReason::HandlerFailed(msg) => write!(f, "handler failed: {msg}"),
			AbortReason::ContextDestroyed => f.write_str("handler context destroyed"),
			AbortReason::NoAvailableClient => f.write_str("no available client"),
			AbortReason::ConnectionLost => f.write_str("connection lost"),
			AbortReason::Abandoned => f.write_str("abandoned"),
		}
	}
}

/// What a requester observes for one action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionEvent {
	/// Intermediate payload (`done: false`).
	Update { payload: Value },
	/// Final payload (`done: true`).
	Completed { payload: Value },
	/// Abnormal termination, distinct from completion.
	Aborted { reason: AbortReason },
}

impl ActionEvent {
	pub fn is_terminal(&self) -> bool {
		!matches!(self, ActionEvent::Update { .. })
	}

	pub fn payload(&self) -> Option<&Value> {
		match self {
			ActionEvent::Update { payload } | ActionEvent::Completed { payload } => Some(payload),
			ActionEvent::Aborted { .. } => None,
		}
	}
}

/// An [`ActionEvent`] tagged with the action it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionNotice {
	pub id: ActionId,
	pub event: ActionEvent,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn requester_view_closes_exactly_once() {
		let mut view = ActionView::requester(ActionId(1), "open");
		assert_eq!(view.state(), ActionState::Pending);

		assert_eq!(view.apply(Transition::Close).unwrap(), ActionState::Closed);
		assert!(view.apply(Transition::Update).unwrap_err().is_protocol_violation());
		assert!(view.apply(Transition::Close).is_err());
		assert_eq!(view.state(), ActionState::Closed);
	}

	#[test]
	fn updates_keep_action_active() {
		let mut view = ActionView::requester(ActionId(2), "edit");
		assert_eq!(view.apply(Transition::Update).unwrap(), ActionState::Active);
		assert_eq!(view.apply(Transition::Update).unwrap(), ActionState::Active);
		assert_eq!(view.apply(Transition::Abort).unwrap(), ActionState::Closed);
	}

	#[test]
	fn handler_view_starts_active() {
		let view = ActionView::handler(ActionId(0), "open");
		assert_eq!(view.kind, ActionKind::Handler);
		assert_eq!(view.state(), ActionState::Active);
	}

	#[test]
	fn wire_abort_maps_to_reason() {
		assert_eq!(
			AbortReason::from_wire(AbortCode::HandlerFailed, Some("boom".into())),
			AbortReason::HandlerFailed("boom".into())
		);
		assert_eq!(
			AbortReason::from_wire(AbortCode::ContextDestroyed, None),
			AbortReason::ContextDestroyed
		);
		assert!(
			ActionEvent::Aborted {
				reason: AbortReason::Abandoned
			}
			.is_terminal()
		);
	}
}
