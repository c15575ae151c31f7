//! Settings and state locations for the CLI.

use std::fs;
use std::path::{Path, PathBuf};

use webactions::ActionsConfig;

use crate::error::{CliError, Result};

const APP_DIR: &str = "webactions";
const REGISTRY_FILE: &str = "handlers.json";

/// Reads `--config` when given, otherwise the library defaults.
///
/// Keys left out of the file keep their defaults.
pub fn load_actions_config(path: Option<&Path>) -> Result<ActionsConfig> {
	let Some(path) = path else {
		return Ok(ActionsConfig::default());
	};
	let content = fs::read_to_string(path)?;
	let config: ActionsConfig = serde_json::from_str(&content).map_err(|source| CliError::Config {
		path: path.to_path_buf(),
		source,
	})?;
	tracing::debug!(path = %path.display(), routing = %config.routing, "loaded settings");
	Ok(config)
}

/// `--registry` when given, else `$XDG_CONFIG_HOME/webactions/handlers.json`
/// (the platform config dir when the variable is unset).
pub fn registry_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
	if let Some(path) = explicit {
		return Ok(path);
	}
	let config_home = std::env::var_os("XDG_CONFIG_HOME")
		.map(PathBuf::from)
		.or_else(dirs::config_dir)
		.ok_or(CliError::NoRegistryPath)?;
	Ok(config_home.join(APP_DIR).join(REGISTRY_FILE))
}
