//! Structured output envelope for all CLI commands.
//!
//! ## Output Contract
//!
//! Every command produces a result envelope on stdout:
//!
//! ```json
//! {
//!   "schemaVersion": 1,
//!   "ok": true,
//!   "command": "demo",
//!   "data": { ... },
//!   "timings": { "durationMs": 12 }
//! }
//! ```
//!
//! On failure `data` is absent and `error` carries a stable code:
//!
//! ```json
//! {
//!   "ok": false,
//!   "command": "handlers add",
//!   "error": { "code": "DUPLICATE_HANDLER", "message": "..." }
//! }
//! ```

#[cfg(test)]
mod tests;

use std::io::{self, Write};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use webactions::HandlerRecord;

/// Current schema version for command output.
pub const SCHEMA_VERSION: u32 = 1;

/// Output format for CLI results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
	/// Pretty-printed JSON envelope
	#[default]
	Json,
	/// Human-readable text
	Text,
}

impl std::str::FromStr for OutputFormat {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().as_str() {
			"json" => Ok(OutputFormat::Json),
			"text" => Ok(OutputFormat::Text),
			_ => Err(format!("unknown format: {s}")),
		}
	}
}

impl std::fmt::Display for OutputFormat {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			OutputFormat::Json => write!(f, "json"),
			OutputFormat::Text => write!(f, "text"),
		}
	}
}

/// The result envelope returned by all commands.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult<T: Serialize> {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub schema_version: Option<u32>,

	pub ok: bool,

	/// Command name (e.g., "handlers list", "demo")
	pub command: String,

	/// Command-specific result data (only present on success)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<CommandError>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub timings: Option<Timings>,

	/// Warnings worth surfacing without failing the command
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
	pub code: ErrorCode,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

/// Standardized error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	/// Handshake rejected, closed or answered with garbage
	ConnectionFailed,
	/// No handshake reply in time
	Timeout,
	/// The chooser was dismissed
	Cancelled,
	/// Nothing registered for the verb
	NoHandler,
	/// No destination context on the handler side
	NoAvailableClient,
	/// A registration for the url already exists
	DuplicateHandler,
	/// Malformed or out-of-state protocol traffic
	ProtocolViolation,
	/// Payload could not be decoded
	ReadFailed,
	/// Settings file could not be parsed
	ConfigError,
	IoError,
	InvalidInput,
	InternalError,
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let code = match self {
			ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
			ErrorCode::Timeout => "TIMEOUT",
			ErrorCode::Cancelled => "CANCELLED",
			ErrorCode::NoHandler => "NO_HANDLER",
			ErrorCode::NoAvailableClient => "NO_AVAILABLE_CLIENT",
			ErrorCode::DuplicateHandler => "DUPLICATE_HANDLER",
			ErrorCode::ProtocolViolation => "PROTOCOL_VIOLATION",
			ErrorCode::ReadFailed => "READ_FAILED",
			ErrorCode::ConfigError => "CONFIG_ERROR",
			ErrorCode::IoError => "IO_ERROR",
			ErrorCode::InvalidInput => "INVALID_INPUT",
			ErrorCode::InternalError => "INTERNAL_ERROR",
		};
		f.write_str(code)
	}
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
	pub duration_ms: u64,
}

impl From<Duration> for Timings {
	fn from(duration: Duration) -> Self {
		Timings {
			duration_ms: duration.as_millis() as u64,
		}
	}
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
	pub level: DiagnosticLevel,
	pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
	Info,
	Warning,
}

/// Data for `handlers list`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerListData {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub verb: Option<String>,
	pub handlers: Vec<HandlerRecord>,
}

/// Data for `handlers add`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerAddData {
	pub handler: HandlerRecord,
	pub replaced: bool,
}

/// Data for `handlers remove`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerRemoveData {
	pub requested: usize,
	pub removed: usize,
}

/// One event the requester observed during `demo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ObservedEvent {
	Update { payload: serde_json::Value },
	Completed { payload: serde_json::Value },
	Aborted { reason: String },
}

/// Data for `demo`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoData {
	pub verb: String,
	pub handler: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub client_id: Option<String>,
	pub events: Vec<ObservedEvent>,
	/// Handler urls the relay was asked to reach, in order
	pub relay_attempts: Vec<String>,
	pub violations: u64,
}

/// Builder for constructing command results
pub struct ResultBuilder<T: Serialize> {
	command: String,
	data: Option<T>,
	error: Option<CommandError>,
	start_time: Instant,
	diagnostics: Vec<Diagnostic>,
}

impl<T: Serialize> ResultBuilder<T> {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			data: None,
			error: None,
			start_time: Instant::now(),
			diagnostics: Vec::new(),
		}
	}

	pub fn data(mut self, data: T) -> Self {
		self.data = Some(data);
		self
	}

	pub fn error(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
		self.error = Some(CommandError {
			code,
			message: message.into(),
			details: None,
		});
		self
	}

	pub fn diagnostic(mut self, level: DiagnosticLevel, message: impl Into<String>) -> Self {
		self.diagnostics.push(Diagnostic {
			level,
			message: message.into(),
		});
		self
	}

	pub fn build(self) -> CommandResult<T> {
		let ok = self.error.is_none() && self.data.is_some();
		CommandResult {
			schema_version: Some(SCHEMA_VERSION),
			ok,
			command: self.command,
			data: self.data,
			error: self.error,
			timings: Some(Timings::from(self.start_time.elapsed())),
			diagnostics: self.diagnostics,
		}
	}
}

/// Plain-text form of command data, for `--format text`.
pub trait TextOutput {
	fn write_text(&self, out: &mut dyn Write) -> io::Result<()>;
}

impl TextOutput for () {
	fn write_text(&self, _out: &mut dyn Write) -> io::Result<()> {
		Ok(())
	}
}

impl TextOutput for HandlerListData {
	fn write_text(&self, out: &mut dyn Write) -> io::Result<()> {
		if self.handlers.is_empty() {
			return match &self.verb {
				Some(verb) => writeln!(out, "No handlers for '{verb}'"),
				None => writeln!(out, "No handlers registered"),
			};
		}
		let name_width = self.handlers.iter().map(|h| h.name.len()).max().unwrap_or(0).max(4);
		let url_width = self.handlers.iter().map(|h| h.url.len()).max().unwrap_or(0).max(3);
		writeln!(out, "{:name_width$}  {:url_width$}  VERBS", "NAME", "URL")?;
		for handler in &self.handlers {
			writeln!(
				out,
				"{:name_width$}  {:url_width$}  {}",
				handler.name,
				handler.url,
				handler.friendly_verbs()
			)?;
		}
		Ok(())
	}
}

impl TextOutput for HandlerAddData {
	fn write_text(&self, out: &mut dyn Write) -> io::Result<()> {
		let action = if self.replaced { "Replaced" } else { "Registered" };
		writeln!(
			out,
			"{action} {} ({}) for {}",
			self.handler.name,
			self.handler.url,
			self.handler.friendly_verbs()
		)
	}
}

impl TextOutput for HandlerRemoveData {
	fn write_text(&self, out: &mut dyn Write) -> io::Result<()> {
		writeln!(out, "Removed {} of {} handler(s)", self.removed, self.requested)
	}
}

impl TextOutput for DemoData {
	fn write_text(&self, out: &mut dyn Write) -> io::Result<()> {
		writeln!(out, "{} via {}", self.verb, self.handler)?;
		if let Some(client_id) = &self.client_id {
			writeln!(out, "session {client_id}")?;
		}
		for event in &self.events {
			match event {
				ObservedEvent::Update { payload } => writeln!(out, "update     {}", text_payload(payload))?,
				ObservedEvent::Completed { payload } => writeln!(out, "completed  {}", text_payload(payload))?,
				ObservedEvent::Aborted { reason } => writeln!(out, "aborted    {reason}")?,
			}
		}
		writeln!(out, "relay attempts: {}", self.relay_attempts.join(", "))?;
		if self.violations > 0 {
			writeln!(out, "protocol violations: {}", self.violations)?;
		}
		Ok(())
	}
}

fn text_payload(payload: &serde_json::Value) -> String {
	match payload {
		serde_json::Value::String(text) => text.clone(),
		other => other.to_string(),
	}
}

/// Print a command result to stdout in the specified format
pub fn print_result<T: Serialize + TextOutput>(result: &CommandResult<T>, format: OutputFormat) {
	match format {
		OutputFormat::Json => {
			if let Ok(json) = serde_json::to_string_pretty(result) {
				println!("{json}");
			}
		}
		OutputFormat::Text => {
			let _ = write_result_text(result, &mut io::stdout().lock());
		}
	}
}

/// Human-readable form of a result: the data, then diagnostics and timing.
pub fn write_result_text<T: TextOutput + Serialize>(result: &CommandResult<T>, out: &mut dyn Write) -> io::Result<()> {
	if result.ok {
		if let Some(ref data) = result.data {
			data.write_text(out)?;
		}
	} else if let Some(ref error) = result.error {
		writeln!(out, "Error [{}]: {}", error.code, error.message)?;
	}

	for diag in &result.diagnostics {
		let prefix = match diag.level {
			DiagnosticLevel::Info => "info",
			DiagnosticLevel::Warning => "warning",
		};
		writeln!(out, "[{prefix}] {}", diag.message)?;
	}

	if let Some(ref timings) = result.timings {
		writeln!(out, "Completed in {}ms", timings.duration_ms)?;
	}
	Ok(())
}

/// Print an error to stderr (for human consumption)
pub fn print_error_stderr(error: &CommandError) {
	eprintln!("Error [{}]: {}", error.code, error.message);
}
