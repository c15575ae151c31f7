use std::path::PathBuf;

use thiserror::Error;
use webactions::ConnectFailure;

use crate::output::{CommandError, ErrorCode};

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("invalid input: {0}")]
	InvalidInput(String),

	#[error("failed to load {}: {source}", .path.display())]
	Config {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("no handler registry location; pass --registry")]
	NoRegistryPath,

	#[error(transparent)]
	Actions(#[from] webactions::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl CliError {
	pub fn to_command_error(&self) -> CommandError {
		let code = match self {
			CliError::InvalidInput(_) | CliError::NoRegistryPath => ErrorCode::InvalidInput,
			CliError::Config { .. } => ErrorCode::ConfigError,
			CliError::Actions(err) => classify(err),
			CliError::Io(_) => ErrorCode::IoError,
			CliError::Json(_) => ErrorCode::InvalidInput,
		};
		CommandError {
			code,
			message: self.to_string(),
			details: None,
		}
	}
}

fn classify(err: &webactions::Error) -> ErrorCode {
	use webactions::Error;

	match err {
		Error::Connection { reason, .. } => match reason {
			ConnectFailure::Timeout { .. } => ErrorCode::Timeout,
			ConnectFailure::Cancelled => ErrorCode::Cancelled,
			ConnectFailure::NoAvailableTarget => ErrorCode::NoHandler,
			_ => ErrorCode::ConnectionFailed,
		},
		Error::DuplicateHandler(_) => ErrorCode::DuplicateHandler,
		Error::NoAvailableClient(_) => ErrorCode::NoAvailableClient,
		Error::Read(_) => ErrorCode::ReadFailed,
		Error::Io(_) => ErrorCode::IoError,
		Error::DuplicateId { .. } | Error::UnknownAction { .. } | Error::ProtocolViolation(_) => {
			ErrorCode::ProtocolViolation
		}
		_ => ErrorCode::InternalError,
	}
}
