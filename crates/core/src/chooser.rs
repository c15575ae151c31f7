//! Handler selection step that precedes a chooser-driven handshake.

use async_trait::async_trait;
use webactions_protocol::HandlerRecord;

/// Outcome of presenting candidate handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
	Selected(String),
	Cancelled,
}

#[async_trait]
pub trait Chooser: Send + Sync {
	/// Picks one of `handlers` for `verb`, or cancels.
	async fn choose(&self, verb: &str, handlers: &[HandlerRecord]) -> Choice;
}

/// Non-interactive chooser with a predetermined answer.
#[derive(Debug, Clone)]
pub enum FixedChooser {
	/// Pick the candidate at this position; out of range cancels.
	Index(usize),
	/// Pick the candidate with this url; absent cancels.
	Url(String),
	Cancel,
}

#[async_trait]
impl Chooser for FixedChooser {
	async fn choose(&self, verb: &str, handlers: &[HandlerRecord]) -> Choice {
		let picked = match self {
			FixedChooser::Index(index) => handlers.get(*index),
			FixedChooser::Url(url) => handlers.iter().find(|h| &h.url == url),
			FixedChooser::Cancel => None,
		};
		match picked {
			Some(handler) => {
				tracing::debug!(verb, url = %handler.url, name = %handler.name, "handler chosen");
				Choice::Selected(handler.url.clone())
			}
			None => {
				tracing::debug!(verb, candidates = handlers.len(), "chooser cancelled");
				Choice::Cancelled
			}
		}
	}
}
