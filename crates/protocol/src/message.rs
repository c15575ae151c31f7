//! Envelopes exchanged over an established port.
//!
//! The protocol is deliberately small:
//!
//! 1. The handler side answers a forwarded port with a [`ConnectReply`]
//!    (`{"connected": true}` or `{"connected": false}`) before anything else
//! 2. The requester sends [`Message::Action`] for every unit of work
//! 3. The handler streams [`Message::Update`] back, the last one with `done: true`
//! 4. If the handler cannot finish, it sends [`Message::Abort`] instead
//!
//! [`Message::Startup`] never crosses the requester/handler boundary; it is
//! posted by a freshly opened handler context to its own background service
//! so the router can match it to a session.
//!
//! # Main Types
//!
//! - [`Message`] - Tagged union of every per-action envelope
//! - [`ConnectReply`] - Untagged acceptance token sent once per connection
//! - [`ActionOptions`] - Verb plus optional hints, accepted as a string or object

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identity of an action, unique only within the requester that minted it.
///
/// Different requesters may reuse the same value, so an id is only globally
/// meaningful when paired with the connection it arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub u64);

impl fmt::Display for ActionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Identity of a realized connection, minted locally by whichever side holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "conn#{}", self.0)
	}
}

/// Opaque session id minted by the handler side at handshake time.
///
/// The requester passes it to the handler context it opens (for example in a
/// URL fragment); that context presents it again in its [`Message::Startup`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	/// Mints a fresh random session id.
	pub fn mint() -> Self {
		Self(Uuid::new_v4().to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ClientId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Optional hints that travel alongside the verb of an action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionHints {
	/// Whether the requester expects updated payloads back.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub bidirectional: Option<bool>,
	/// MIME type of the primary payload, used for handler selection.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mime_type: Option<String>,
}

impl ActionHints {
	pub fn is_empty(&self) -> bool {
		self.bidirectional.is_none() && self.mime_type.is_none()
	}
}

/// What the requester asks for: a verb and optional hints.
///
/// Deserializes from either a bare verb (`"open"`) or an object
/// (`{"verb": "open", "bidirectional": true}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOptions {
	pub verb: String,
	#[serde(flatten)]
	pub hints: ActionHints,
}

impl ActionOptions {
	pub fn new(verb: impl Into<String>) -> Self {
		Self {
			verb: verb.into(),
			hints: ActionHints::default(),
		}
	}

	pub fn bidirectional(mut self, bidirectional: bool) -> Self {
		self.hints.bidirectional = Some(bidirectional);
		self
	}

	pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
		self.hints.mime_type = Some(mime_type.into());
		self
	}
}

impl From<&str> for ActionOptions {
	fn from(verb: &str) -> Self {
		Self::new(verb)
	}
}

impl From<String> for ActionOptions {
	fn from(verb: String) -> Self {
		Self::new(verb)
	}
}

impl<'de> Deserialize<'de> for ActionOptions {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		#[derive(Deserialize)]
		#[serde(rename_all = "camelCase")]
		struct Full {
			verb: String,
			#[serde(default)]
			bidirectional: Option<bool>,
			#[serde(default)]
			mime_type: Option<String>,
		}

		#[derive(Deserialize)]
		#[serde(untagged)]
		enum Shape {
			Verb(String),
			Full(Full),
		}

		Ok(match Shape::deserialize(deserializer)? {
			Shape::Verb(verb) => ActionOptions::new(verb),
			Shape::Full(full) => ActionOptions {
				verb: full.verb,
				hints: ActionHints {
					bidirectional: full.bidirectional,
					mime_type: full.mime_type,
				},
			},
		})
	}
}

/// Why a handler gave up on an action without a normal `done` update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortCode {
	/// Handler application logic failed while working on the action.
	HandlerFailed,
	/// The context holding the action was torn down before closing it.
	ContextDestroyed,
	/// No destination context could be found or created for the action.
	NoAvailableClient,
}

impl fmt::Display for AbortCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			AbortCode::HandlerFailed => "handler failed",
			AbortCode::ContextDestroyed => "context destroyed",
			AbortCode::NoAvailableClient => "no available client",
		};
		f.write_str(s)
	}
}

/// Per-action envelope, tagged by `type`.
///
/// `seq` is a per-action sequence number assigned by the sender. It is
/// required whenever the path between the two sides crosses a relay and
/// ignored (delivered as-is) when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
	/// Requester asks the handler to perform `verb` over `payload`.
	Action {
		id: ActionId,
		verb: String,
		#[serde(default, skip_serializing_if = "ActionHints::is_empty")]
		hints: ActionHints,
		#[serde(default)]
		payload: Value,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		seq: Option<u64>,
	},
	/// Handler streams a complete copy of the payload back.
	Update {
		id: ActionId,
		#[serde(default)]
		payload: Value,
		done: bool,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		seq: Option<u64>,
	},
	/// Handler terminates the action abnormally.
	Abort {
		id: ActionId,
		code: AbortCode,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		message: Option<String>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		seq: Option<u64>,
	},
	/// A new handler context announces itself to the router.
	Startup {
		#[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
		client_id: Option<ClientId>,
	},
}

impl Message {
	/// Builds the opening envelope of an action.
	pub fn action(id: ActionId, options: &ActionOptions, payload: Value) -> Self {
		Message::Action {
			id,
			verb: options.verb.clone(),
			hints: options.hints.clone(),
			payload,
			seq: None,
		}
	}

	pub fn update(id: ActionId, payload: Value, done: bool) -> Self {
		Message::Update {
			id,
			payload,
			done,
			seq: None,
		}
	}

	pub fn abort(id: ActionId, code: AbortCode, message: Option<String>) -> Self {
		Message::Abort {
			id,
			code,
			message,
			seq: None,
		}
	}

	/// Returns the action id this envelope belongs to, if any.
	pub fn id(&self) -> Option<ActionId> {
		match self {
			Message::Action { id, .. } | Message::Update { id, .. } | Message::Abort { id, .. } => {
				Some(*id)
			}
			Message::Startup { .. } => None,
		}
	}

	pub fn seq(&self) -> Option<u64> {
		match self {
			Message::Action { seq, .. } | Message::Update { seq, .. } | Message::Abort { seq, .. } => {
				*seq
			}
			Message::Startup { .. } => None,
		}
	}

	/// Stamps the envelope with a sequence number.
	pub fn with_seq(mut self, value: u64) -> Self {
		match &mut self {
			Message::Action { seq, .. } | Message::Update { seq, .. } | Message::Abort { seq, .. } => {
				*seq = Some(value);
			}
			Message::Startup { .. } => {}
		}
		self
	}

	/// Returns true if no further traffic may follow for this id.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Message::Update { done: true, .. } | Message::Abort { .. })
	}

	/// Short name used in logs.
	pub fn kind(&self) -> &'static str {
		match self {
			Message::Action { .. } => "action",
			Message::Update { done: false, .. } => "update",
			Message::Update { done: true, .. } => "update(done)",
			Message::Abort { .. } => "abort",
			Message::Startup { .. } => "startup",
		}
	}
}

/// Acceptance token sent by the responder before any action traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectReply {
	pub connected: bool,
	/// Session id minted for this connection, when the responder routes by id.
	#[serde(rename = "clientId", default, skip_serializing_if = "Option::is_none")]
	pub client_id: Option<ClientId>,
}

impl ConnectReply {
	pub fn accept(client_id: Option<ClientId>) -> Self {
		Self {
			connected: true,
			client_id,
		}
	}

	pub fn reject() -> Self {
		Self {
			connected: false,
			client_id: None,
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn action_serializes_with_type_tag() {
		let msg = Message::action(ActionId(1), &ActionOptions::new("open"), json!("hello.txt"));
		let value = serde_json::to_value(&msg).unwrap();
		assert_eq!(
			value,
			json!({"type": "action", "id": 1, "verb": "open", "payload": "hello.txt"})
		);
	}

	#[test]
	fn update_parses_from_wire_shape() {
		let raw = json!({"type": "update", "id": 1, "payload": "final", "done": true});
		let msg: Message = serde_json::from_value(raw).unwrap();
		assert_eq!(msg.id(), Some(ActionId(1)));
		assert!(msg.is_terminal());
		assert_eq!(msg.seq(), None);
	}

	#[test]
	fn seq_is_carried_when_stamped() {
		let msg = Message::update(ActionId(3), json!({}), false).with_seq(7);
		let value = serde_json::to_value(&msg).unwrap();
		assert_eq!(value["seq"], 7);
		assert!(!msg.is_terminal());
	}

	#[test]
	fn abort_uses_snake_case_code() {
		let msg = Message::abort(ActionId(2), AbortCode::ContextDestroyed, None);
		let value = serde_json::to_value(&msg).unwrap();
		assert_eq!(value["type"], "abort");
		assert_eq!(value["code"], "context_destroyed");
		assert!(msg.is_terminal());
	}

	#[test]
	fn abort_codes_are_a_closed_set() {
		for (code, wire) in [
			(AbortCode::HandlerFailed, "handler_failed"),
			(AbortCode::ContextDestroyed, "context_destroyed"),
			(AbortCode::NoAvailableClient, "no_available_client"),
		] {
			assert_eq!(serde_json::from_value::<AbortCode>(json!(wire)).unwrap(), code);
		}
		assert!(serde_json::from_value::<AbortCode>(json!("rejected")).is_err());
	}

	#[test]
	fn startup_client_id_is_optional() {
		let bare: Message = serde_json::from_value(json!({"type": "startup"})).unwrap();
		assert_eq!(bare, Message::Startup { client_id: None });

		let with_id: Message =
			serde_json::from_value(json!({"type": "startup", "clientId": "abc"})).unwrap();
		assert_eq!(
			with_id,
			Message::Startup {
				client_id: Some(ClientId::new("abc"))
			}
		);
	}

	#[test]
	fn options_accept_bare_verb_or_object() {
		let bare: ActionOptions = serde_json::from_value(json!("edit")).unwrap();
		assert_eq!(bare, ActionOptions::new("edit"));

		let full: ActionOptions = serde_json::from_value(
			json!({"verb": "open", "bidirectional": true, "mimeType": "text/plain"}),
		)
		.unwrap();
		assert_eq!(full.verb, "open");
		assert_eq!(full.hints.bidirectional, Some(true));
		assert_eq!(full.hints.mime_type.as_deref(), Some("text/plain"));
	}

	#[test]
	fn connect_reply_shapes() {
		assert_eq!(
			serde_json::to_value(ConnectReply::reject()).unwrap(),
			json!({"connected": false})
		);
		let accepted = ConnectReply::accept(Some(ClientId::new("s1")));
		assert_eq!(
			serde_json::to_value(&accepted).unwrap(),
			json!({"connected": true, "clientId": "s1"})
		);
		let parsed: ConnectReply = serde_json::from_value(json!({"connected": true})).unwrap();
		assert!(parsed.connected);
		assert!(parsed.client_id.is_none());
	}

	#[test]
	fn unknown_type_is_rejected() {
		let result: Result<Message, _> = serde_json::from_value(json!({"type": "bogus", "id": 1}));
		assert!(result.is_err());
	}
}
