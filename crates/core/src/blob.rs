//! Turning blob payloads back into text.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;
use webactions_protocol::Blob;
use webactions_runtime::{Error, Result};

/// Decodes a blob as UTF-8.
///
/// # Errors
///
/// [`Error::Read`] if the bytes are not valid UTF-8.
pub fn read_as_text(blob: &Blob) -> Result<String> {
	String::from_utf8(blob.data.clone())
		.map_err(|e| Error::Read(format!("{}: {e}", display_name(blob))))
}

/// Extracts a blob from an action payload.
///
/// Accepts either a blob object itself or an object with a `file` field
/// holding one.
pub fn blob_from_payload(payload: &Value) -> Result<Blob> {
	let candidate = payload.get("file").unwrap_or(payload);
	serde_json::from_value(candidate.clone())
		.map_err(|e| Error::Read(format!("payload does not carry a blob: {e}")))
}

fn display_name(blob: &Blob) -> &str {
	if blob.name.is_empty() { "blob" } else { &blob.name }
}

/// Asynchronous blob decoder.
#[async_trait]
pub trait BlobReader: Send + Sync {
	async fn read_as_text(&self, blob: &Blob) -> Result<String>;
}

/// Reads a blob in place as UTF-8.
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8Reader;

#[async_trait]
impl BlobReader for Utf8Reader {
	async fn read_as_text(&self, blob: &Blob) -> Result<String> {
		read_as_text(blob)
	}
}

/// Runs `reader` until it finishes or `cancel` fires, whichever is first.
///
/// Dropping the cancel sender without sending does not abort the read.
///
/// # Errors
///
/// `Error::Read("aborted")` when cancelled, otherwise whatever the reader reports.
pub async fn read_as_text_cancellable(
	reader: &dyn BlobReader,
	blob: &Blob,
	mut cancel: oneshot::Receiver<()>,
) -> Result<String> {
	tokio::select! {
		biased;
		Ok(()) = &mut cancel => Err(Error::Read("aborted".to_string())),
		text = reader.read_as_text(blob) => text,
	}
}
