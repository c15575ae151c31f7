//! File-backed handler registry.
//!
//! The whole registry lives in one pretty-printed JSON document. Every change
//! rewrites the document through a sibling temp file and a rename, so readers
//! see either the old registry or the new one.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use webactions::{Error, HandlerRecord, HandlerStore, Result};

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
	#[serde(default)]
	handlers: Vec<HandlerRecord>,
}

#[derive(Debug)]
pub struct JsonHandlerStore {
	path: PathBuf,
	// Serializes read-modify-write cycles within this process.
	write_lock: Mutex<()>,
}

impl JsonHandlerStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			write_lock: Mutex::new(()),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// A missing file is an empty registry; an unreadable one is an error.
	fn load(&self) -> Result<Vec<HandlerRecord>> {
		let content = match fs::read_to_string(&self.path) {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(e.into()),
		};
		let mut file: RegistryFile = serde_json::from_str(&content)?;
		file.handlers.sort_by(|a, b| a.url.cmp(&b.url));
		Ok(file.handlers)
	}

	fn save(&self, handlers: Vec<HandlerRecord>) -> Result<()> {
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent)?;
		}
		let document = serde_json::to_string_pretty(&RegistryFile { handlers })?;

		let mut staging = self.path.clone().into_os_string();
		staging.push(".tmp");
		let staging = PathBuf::from(staging);
		fs::write(&staging, document)?;
		fs::rename(&staging, &self.path)?;
		Ok(())
	}
}

#[async_trait]
impl HandlerStore for JsonHandlerStore {
	async fn all_handlers(&self) -> Result<Vec<HandlerRecord>> {
		self.load()
	}

	async fn register(&self, record: HandlerRecord) -> Result<()> {
		let _guard = self.write_lock.lock().await;
		let mut handlers = self.load()?;
		if handlers.iter().any(|h| h.url == record.url) {
			return Err(Error::DuplicateHandler(record.url));
		}
		tracing::debug!(url = %record.url, path = %self.path.display(), "registering handler");
		handlers.push(record);
		self.save(handlers)
	}

	async fn replace(&self, record: HandlerRecord) -> Result<bool> {
		let _guard = self.write_lock.lock().await;
		let mut handlers = self.load()?;
		let before = handlers.len();
		handlers.retain(|h| h.url != record.url);
		let replaced = handlers.len() < before;
		tracing::debug!(url = %record.url, replaced, path = %self.path.display(), "replacing handler");
		handlers.push(record);
		self.save(handlers)?;
		Ok(replaced)
	}

	async fn delete_by_urls(&self, urls: &[String]) -> Result<usize> {
		let _guard = self.write_lock.lock().await;
		let handlers = self.load()?;
		let before = handlers.len();
		let kept: Vec<_> = handlers.into_iter().filter(|h| !urls.contains(&h.url)).collect();
		let removed = before - kept.len();
		if removed > 0 {
			self.save(kept)?;
		}
		Ok(removed)
	}
}

#[cfg(test)]
mod tests {
	use tempfile::TempDir;

	use super::*;

	fn record(name: &str, url: &str, verbs: &[&str]) -> HandlerRecord {
		HandlerRecord::new(name, url, verbs.iter().copied())
	}

	#[tokio::test]
	async fn missing_file_is_an_empty_registry() {
		let tmp = TempDir::new().unwrap();
		let store = JsonHandlerStore::new(tmp.path().join("nested/handlers.json"));
		assert!(store.all_handlers().await.unwrap().is_empty());
		assert_eq!(store.delete_by_urls(&["https://a.example/".into()]).await.unwrap(), 0);
		assert!(!store.path().exists());
	}

	#[tokio::test]
	async fn registrations_survive_a_reopen() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("handlers.json");

		let store = JsonHandlerStore::new(&path);
		store.register(record("Zed", "https://z.example/", &["edit"])).await.unwrap();
		store.register(record("Alpha", "https://a.example/", &["edit", "view"])).await.unwrap();

		let reopened = JsonHandlerStore::new(&path);
		let urls: Vec<_> = reopened
			.handlers_for_verb("edit")
			.await
			.unwrap()
			.into_iter()
			.map(|h| h.url)
			.collect();
		assert_eq!(urls, ["https://a.example/", "https://z.example/"]);
		assert_eq!(reopened.verbs_supported("https://a.example/").await.unwrap(), ["edit", "view"]);

		let raw = fs::read_to_string(&path).unwrap();
		assert!(raw.contains("\n"), "registry should be pretty-printed");
	}

	#[tokio::test]
	async fn duplicate_url_leaves_the_file_untouched() {
		let tmp = TempDir::new().unwrap();
		let store = JsonHandlerStore::new(tmp.path().join("handlers.json"));
		store.register(record("One", "https://h.example/", &["edit"])).await.unwrap();

		let err = store
			.register(record("Two", "https://h.example/", &["view"]))
			.await
			.unwrap_err();
		assert!(matches!(err, Error::DuplicateHandler(_)));

		let kept = store.handler_for_url("https://h.example/").await.unwrap().unwrap();
		assert_eq!(kept.name, "One");
	}

	#[tokio::test]
	async fn replace_swaps_the_record_in_one_write() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("handlers.json");
		let store = JsonHandlerStore::new(&path);
		store.register(record("One", "https://h.example/", &["edit"])).await.unwrap();
		store.register(record("Other", "https://o.example/", &["edit"])).await.unwrap();

		assert!(store.replace(record("Two", "https://h.example/", &["view"])).await.unwrap());
		assert!(!store.replace(record("New", "https://n.example/", &["edit"])).await.unwrap());

		let reopened = JsonHandlerStore::new(&path);
		let swapped = reopened.handler_for_url("https://h.example/").await.unwrap().unwrap();
		assert_eq!(swapped.name, "Two");
		assert_eq!(swapped.verbs, ["view"]);
		assert_eq!(reopened.all_handlers().await.unwrap().len(), 3);
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn failed_replace_keeps_the_old_record() {
		use std::os::unix::fs::PermissionsExt;

		let tmp = TempDir::new().unwrap();
		let dir = tmp.path().join("registry");
		let store = JsonHandlerStore::new(dir.join("handlers.json"));
		store.register(record("One", "https://h.example/", &["edit"])).await.unwrap();

		// The staging file cannot be created in a read-only directory.
		fs::set_permissions(&dir, fs::Permissions::from_mode(0o555)).unwrap();
		let staging_blocked = fs::write(dir.join("write-check"), "").is_err();
		let result = store.replace(record("Two", "https://h.example/", &["view"])).await;
		fs::set_permissions(&dir, fs::Permissions::from_mode(0o755)).unwrap();
		if !staging_blocked {
			// Running as root; permissions are not enforced.
			return;
		}

		assert!(matches!(result, Err(Error::Io(_))));
		let kept = store.handler_for_url("https://h.example/").await.unwrap().unwrap();
		assert_eq!(kept.name, "One");
	}

	#[tokio::test]
	async fn delete_removes_every_listed_url_at_once() {
		let tmp = TempDir::new().unwrap();
		let store = JsonHandlerStore::new(tmp.path().join("handlers.json"));
		for (name, url) in [("A", "https://a.example/"), ("B", "https://b.example/"), ("C", "https://c.example/")] {
			store.register(record(name, url, &["edit"])).await.unwrap();
		}

		let removed = store
			.delete_by_urls(&[
				"https://a.example/".into(),
				"https://c.example/".into(),
				"https://missing.example/".into(),
			])
			.await
			.unwrap();
		assert_eq!(removed, 2);

		let left: Vec<_> = store.all_handlers().await.unwrap().into_iter().map(|h| h.url).collect();
		assert_eq!(left, ["https://b.example/"]);
	}

	#[tokio::test]
	async fn corrupt_file_is_reported_not_replaced() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("handlers.json");
		fs::write(&path, "{ not json").unwrap();

		let store = JsonHandlerStore::new(&path);
		assert!(matches!(store.all_handlers().await, Err(Error::Json(_))));
		assert!(store.register(record("A", "https://a.example/", &["edit"])).await.is_err());
		assert_eq!(fs::read_to_string(&path).unwrap(), "{ not json");
	}
}
