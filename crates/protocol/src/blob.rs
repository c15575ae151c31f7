//! File-like binary payloads.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A named chunk of bytes with a MIME type, the unit most actions carry.
///
/// Bytes are base64 encoded on the wire so a blob can sit anywhere inside an
/// otherwise JSON payload (for example `{"file": {...}}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
	/// File name, may be empty.
	#[serde(default)]
	pub name: String,
	/// MIME type.
	#[serde(default)]
	pub mime_type: String,
	/// File contents.
	#[serde(serialize_with = "serialize_base64", deserialize_with = "deserialize_base64")]
	pub data: Vec<u8>,
}

impl Blob {
	pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
		Self {
			name: name.into(),
			mime_type: mime_type.into(),
			data: data.into(),
		}
	}

	/// Creates a `text/plain` blob.
	pub fn text(name: impl Into<String>, contents: &str) -> Self {
		Self::new(name, "text/plain", contents.as_bytes())
	}

	pub fn len(&self) -> usize {
		self.data.len()
	}

	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}
}

fn serialize_base64<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
	serializer.serialize_str(&STANDARD.encode(data))
}

fn deserialize_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
	let encoded: String = Deserialize::deserialize(deserializer)?;
	STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn blob_data_is_base64_on_the_wire() {
		let blob = Blob::text("hello.txt", "hi");
		let value = serde_json::to_value(&blob).unwrap();
		assert_eq!(
			value,
			json!({"name": "hello.txt", "mimeType": "text/plain", "data": "aGk="})
		);
	}

	#[test]
	fn invalid_base64_is_rejected() {
		let result: Result<Blob, _> = serde_json::from_value(json!({"data": "!!!"}));
		assert!(result.is_err());
	}
}
