use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Installs the global subscriber. `RUST_LOG` overrides `verbosity`.
pub fn init_logging(verbosity: u8) {
	// 0: errors only, protocol flow silenced
	// 1 (-v): info for the cli, warn for the library (violations, best-effort routes)
	// 2+ (-vv): debug everywhere, including per-message flow
	let filter = match verbosity {
		0 => "error,webactions=off,webactions_runtime=off",
		1 => "info,webactions=warn,webactions_runtime=warn",
		_ => "debug",
	};

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}
