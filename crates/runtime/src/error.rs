//! Error types for the Web Actions runtime.

use std::fmt;

use thiserror::Error;
use webactions_protocol::{ActionId, ConnectionId};

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a connection attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectFailure {
	/// No reply arrived within the connect timeout.
	Timeout { after_ms: u64 },
	/// The responder answered `{"connected": false}`.
	Rejected,
	/// The user dismissed the handler chooser.
	Cancelled,
	/// The first reply was not an acceptance token.
	UnexpectedReply(String),
	/// No handler or origin could be found to connect to.
	NoAvailableTarget,
	/// The peer end of the channel was dropped before replying.
	Closed,
}

impl fmt::Display for ConnectFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConnectFailure::Timeout { after_ms } => write!(f, "no reply after {after_ms}ms"),
			ConnectFailure::Rejected => f.write_str("connection rejected"),
			ConnectFailure::Cancelled => f.write_str("cancelled by user"),
			ConnectFailure::UnexpectedReply(raw) => write!(f, "unexpected reply: {raw}"),
			ConnectFailure::NoAvailableTarget => f.write_str("no available target"),
			ConnectFailure::Closed => f.write_str("channel closed before reply"),
		}
	}
}

/// Errors that can occur in the Web Actions runtime.
#[derive(Debug, Error)]
pub enum Error {
	/// Handshake failed, timed out or was rejected.
	#[error("Failed to connect to {target}: {reason}")]
	Connection { target: String, reason: ConnectFailure },

	/// An action id was registered while a live entry already existed.
	#[error("Duplicate action id: {id}{}", .connection.as_ref().map(|c| format!(" on {c}")).unwrap_or_default())]
	DuplicateId {
		id: ActionId,
		connection: Option<ConnectionId>,
	},

	/// A message or call referenced an id with no live registry entry.
	#[error("Unknown action: {id}{}", .connection.as_ref().map(|c| format!(" on {c}")).unwrap_or_default())]
	UnknownAction {
		id: ActionId,
		connection: Option<ConnectionId>,
	},

	/// No destination context exists and none could be created.
	#[error("No available client: {0}")]
	NoAvailableClient(String),

	/// A payload could not be decoded.
	#[error("Read error: {0}")]
	Read(String),

	/// Malformed or out-of-state message.
	#[error("Protocol violation: {0}")]
	ProtocolViolation(String),

	/// A handler with this url is already registered.
	#[error("Handler already registered: {0}")]
	DuplicateHandler(String),

	/// The entangled end of a port was dropped.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	pub fn connection(target: impl Into<String>, reason: ConnectFailure) -> Self {
		Error::Connection {
			target: target.into(),
			reason,
		}
	}

	/// Returns the failure reason if this is a connection error.
	pub fn connect_failure(&self) -> Option<&ConnectFailure> {
		match self {
			Error::Connection { reason, .. } => Some(reason),
			_ => None,
		}
	}

	/// Returns true if this is a connection error.
	pub fn is_connection(&self) -> bool {
		matches!(self, Error::Connection { .. })
	}

	/// Returns true for errors a receiver logs and drops rather than surfacing.
	pub fn is_protocol_violation(&self) -> bool {
		matches!(
			self,
			Error::ProtocolViolation(_) | Error::UnknownAction { .. } | Error::DuplicateId { .. }
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn connection_error_message_names_target_and_reason() {
		let err = Error::connection("https://h.example/", ConnectFailure::Timeout { after_ms: 50 });
		assert_eq!(
			err.to_string(),
			"Failed to connect to https://h.example/: no reply after 50ms"
		);
		assert!(err.is_connection());
		assert_eq!(
			err.connect_failure(),
			Some(&ConnectFailure::Timeout { after_ms: 50 })
		);
	}

	#[test]
	fn id_errors_mention_connection_when_known() {
		let bare = Error::DuplicateId {
			id: ActionId(4),
			connection: None,
		};
		let scoped = Error::UnknownAction {
			id: ActionId(4),
			connection: Some(ConnectionId(2)),
		};
		assert_eq!(bare.to_string(), "Duplicate action id: 4");
		assert_eq!(scoped.to_string(), "Unknown action: 4 on conn#2");
		assert!(scoped.is_protocol_violation());
	}
}
