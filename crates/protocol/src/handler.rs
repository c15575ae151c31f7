//! Handler registrations as stored in the handler registry.

use serde::{Deserialize, Serialize};

/// A site that declared it can perform one or more verbs.
///
/// `url` is the registry key; two records with the same url are the same
/// handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerRecord {
	/// Human-readable name shown in the chooser.
	pub name: String,
	/// Handler URL, also the registry key.
	pub url: String,
	/// Verbs this handler accepts.
	#[serde(default)]
	pub verbs: Vec<String>,
}

impl HandlerRecord {
	pub fn new<V, S>(name: impl Into<String>, url: impl Into<String>, verbs: V) -> Self
	where
		V: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			name: name.into(),
			url: url.into(),
			verbs: verbs.into_iter().map(Into::into).collect(),
		}
	}

	pub fn supports(&self, verb: &str) -> bool {
		self.verbs.iter().any(|v| v == verb)
	}

	/// Verbs joined the way a person would read them: `"open, edit and share"`.
	pub fn friendly_verbs(&self) -> String {
		match self.verbs.as_slice() {
			[] => String::new(),
			[only] => only.clone(),
			[init @ .., last] => format!("{} and {}", init.join(", "), last),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn supports_matches_exact_verb() {
		let record = HandlerRecord::new("Editor", "https://editor.example/", ["open", "edit"]);
		assert!(record.supports("open"));
		assert!(!record.supports("op"));
	}

	#[test]
	fn friendly_verbs_joins_with_and() {
		let one = HandlerRecord::new("a", "u", ["open"]);
		let three = HandlerRecord::new("a", "u", ["open", "edit", "share"]);
		assert_eq!(one.friendly_verbs(), "open");
		assert_eq!(three.friendly_verbs(), "open, edit and share");
	}
}
