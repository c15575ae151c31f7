//! Registered handlers, keyed by url.
//!
//! The store is an external dependency of the protocol: it is read or written
//! as a unit, never partially. Implementations must make
//! [`delete_by_urls`](HandlerStore::delete_by_urls) and
//! [`replace`](HandlerStore::replace) atomic.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use webactions_protocol::HandlerRecord;
use webactions_runtime::{Error, Result};

#[async_trait]
pub trait HandlerStore: Send + Sync {
	/// Every record, ordered by url.
	async fn all_handlers(&self) -> Result<Vec<HandlerRecord>>;

	/// Records declaring `verb`, ordered by url.
	async fn handlers_for_verb(&self, verb: &str) -> Result<Vec<HandlerRecord>> {
		let all = self.all_handlers().await?;
		Ok(all.into_iter().filter(|h| h.supports(verb)).collect())
	}

	async fn handler_for_url(&self, url: &str) -> Result<Option<HandlerRecord>> {
		let all = self.all_handlers().await?;
		Ok(all.into_iter().find(|h| h.url == url))
	}

	/// Verbs the handler at `url` declared, empty if it is not registered.
	async fn verbs_supported(&self, url: &str) -> Result<Vec<String>> {
		Ok(self
			.handler_for_url(url)
			.await?
			.map(|h| h.verbs)
			.unwrap_or_default())
	}

	/// # Errors
	///
	/// [`Error::DuplicateHandler`] if a record with the same url exists.
	async fn register(&self, record: HandlerRecord) -> Result<()>;

	/// Inserts `record`, overwriting any record with the same url in the same
	/// step. Returns whether one was overwritten.
	async fn replace(&self, record: HandlerRecord) -> Result<bool>;

	/// Removes every listed url in one step, returning how many existed.
	async fn delete_by_urls(&self, urls: &[String]) -> Result<usize>;
}

/// In-memory store, for tests and the in-process demo.
#[derive(Debug, Default)]
pub struct MemoryHandlerStore {
	records: RwLock<BTreeMap<String, HandlerRecord>>,
}

impl MemoryHandlerStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_handlers(records: impl IntoIterator<Item = HandlerRecord>) -> Self {
		let store = Self::new();
		{
			let mut map = store.records.write();
			for record in records {
				map.insert(record.url.clone(), record);
			}
		}
		store
	}
}

#[async_trait]
impl HandlerStore for MemoryHandlerStore {
	async fn all_handlers(&self) -> Result<Vec<HandlerRecord>> {
		Ok(self.records.read().values().cloned().collect())
	}

	async fn register(&self, record: HandlerRecord) -> Result<()> {
		let mut records = self.records.write();
		if records.contains_key(&record.url) {
			return Err(Error::DuplicateHandler(record.url));
		}
		tracing::debug!(url = %record.url, verbs = ?record.verbs, "registered handler");
		records.insert(record.url.clone(), record);
		Ok(())
	}

	async fn replace(&self, record: HandlerRecord) -> Result<bool> {
		let replaced = self.records.write().insert(record.url.clone(), record).is_some();
		Ok(replaced)
	}

	async fn delete_by_urls(&self, urls: &[String]) -> Result<usize> {
		let mut records = self.records.write();
		Ok(urls.iter().filter(|url| records.remove(*url).is_some()).count())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn record(name: &str, url: &str, verbs: &[&str]) -> HandlerRecord {
		HandlerRecord::new(name, url, verbs.iter().copied())
	}

	#[tokio::test]
	async fn handlers_are_filtered_by_verb_and_ordered_by_url() {
		let store = MemoryHandlerStore::with_handlers([
			record("Zed", "https://z.example/", &["open", "edit"]),
			record("Viewer", "https://a.example/", &["open"]),
			record("Share", "https://s.example/", &["share"]),
		]);

		let open = store.handlers_for_verb("open").await.unwrap();
		let urls: Vec<_> = open.iter().map(|h| h.url.as_str()).collect();
		assert_eq!(urls, ["https://a.example/", "https://z.example/"]);
		assert_eq!(
			store.verbs_supported("https://z.example/").await.unwrap(),
			["open", "edit"]
		);
		assert!(store.verbs_supported("https://none.example/").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn duplicate_url_is_rejected_not_overwritten() {
		let store = MemoryHandlerStore::new();
		store.register(record("One", "https://h.example/", &["open"])).await.unwrap();

		let err = store
			.register(record("Two", "https://h.example/", &["edit"]))
			.await
			.unwrap_err();
		assert!(matches!(err, Error::DuplicateHandler(url) if url == "https://h.example/"));

		let kept = store.handler_for_url("https://h.example/").await.unwrap().unwrap();
		assert_eq!(kept.name, "One");
	}

	#[tokio::test]
	async fn replace_overwrites_or_inserts() {
		let store = MemoryHandlerStore::new();
		assert!(!store.replace(record("One", "https://h.example/", &["open"])).await.unwrap());
		assert!(store.replace(record("Two", "https://h.example/", &["edit"])).await.unwrap());

		let all = store.all_handlers().await.unwrap();
		assert_eq!(all.len(), 1);
		assert_eq!(all[0].name, "Two");
		assert_eq!(all[0].verbs, ["edit"]);
	}

	#[tokio::test]
	async fn delete_ignores_unknown_urls() {
		let store = MemoryHandlerStore::with_handlers([
			record("A", "https://a.example/", &["open"]),
			record("B", "https://b.example/", &["open"]),
		]);

		let removed = store
			.delete_by_urls(&["https://a.example/".into(), "https://gone.example/".into()])
			.await
			.unwrap();
		assert_eq!(removed, 1);
		assert_eq!(store.all_handlers().await.unwrap().len(), 1);
	}
}
