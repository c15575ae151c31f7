//! Intermediary frame addressing.
//!
//! A requester cannot reference a cross-origin context directly. Instead it
//! embeds a tiny page from the target origin (the proxy frame) whose only job
//! is to relay a port into that origin's background service. The frame is
//! addressed by appending [`PROXY_URL_SUFFIX`] to the handler url.

use url::Url;

/// Query suffix that marks a request for the intermediary frame.
pub const PROXY_URL_SUFFIX: &str = "?actions-handler-proxy";

/// Default time a requester waits for the handshake reply.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Builds the intermediary frame url for a handler url.
pub fn proxy_url(handler_url: &str) -> String {
	format!("{handler_url}{PROXY_URL_SUFFIX}")
}

/// Returns true if `url` addresses the intermediary frame.
///
/// The suffix must end the url or be followed by another query parameter.
pub fn is_proxy_url(url: &str) -> bool {
	match url.find(PROXY_URL_SUFFIX) {
		Some(index) => {
			let rest = &url[index + PROXY_URL_SUFFIX.len()..];
			rest.is_empty() || rest.starts_with('&')
		}
		None => false,
	}
}

/// Serialized origin (`scheme://host[:port]`) of a url, if it has one.
pub fn origin_of(url: &str) -> Option<String> {
	let parsed = Url::parse(url).ok()?;
	let origin = parsed.origin();
	origin.is_tuple().then(|| origin.ascii_serialization())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn proxy_url_round_trips_through_detection() {
		let url = proxy_url("https://editor.example/app/");
		assert_eq!(url, "https://editor.example/app/?actions-handler-proxy");
		assert!(is_proxy_url(&url));
	}

	#[test]
	fn suffix_must_be_terminal_or_followed_by_param() {
		assert!(is_proxy_url("https://a.example/?actions-handler-proxy&x=1"));
		assert!(!is_proxy_url("https://a.example/?actions-handler-proxyx"));
		assert!(!is_proxy_url("https://a.example/"));
	}

	#[test]
	fn origin_strips_path_and_query() {
		assert_eq!(
			origin_of("http://localhost:8080/choose?x=1").as_deref(),
			Some("http://localhost:8080")
		);
		assert_eq!(origin_of("not a url"), None);
	}
}
