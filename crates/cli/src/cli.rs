use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "webactions")]
#[command(about = "Web Actions - cross-origin action exchange from the command line")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format: json (default) or text
	#[arg(short = 'f', long, global = true, value_enum, default_value = "json")]
	pub format: OutputFormat,

	/// Protocol settings file (JSON, camelCase keys)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Handler registry file [default: $XDG_CONFIG_HOME/webactions/handlers.json]
	#[arg(long, global = true, value_name = "FILE")]
	pub registry: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Manage the local handler registry
	Handlers {
		#[command(subcommand)]
		action: HandlersAction,
	},

	/// Run a complete in-process exchange against an editor handler
	Demo(DemoArgs),
}

impl Commands {
	/// Name used in the result envelope.
	pub fn name(&self) -> &'static str {
		match self {
			Commands::Handlers { action } => match action {
				HandlersAction::List { .. } => "handlers list",
				HandlersAction::Add { .. } => "handlers add",
				HandlersAction::Remove { .. } => "handlers remove",
			},
			Commands::Demo(_) => "demo",
		}
	}
}

#[derive(Subcommand, Debug)]
pub enum HandlersAction {
	/// List registered handlers
	List {
		/// Only handlers declaring this verb
		#[arg(long)]
		verb: Option<String>,
	},

	/// Register a handler
	Add {
		/// Display name
		#[arg(long)]
		name: String,

		/// Handler url (also its identity in the registry)
		#[arg(long)]
		url: String,

		/// Verb the handler performs (repeatable)
		#[arg(long = "verb", required = true)]
		verbs: Vec<String>,

		/// Replace an existing registration for the same url
		#[arg(long)]
		replace: bool,
	},

	/// Remove handlers by url
	Remove {
		#[arg(required = true)]
		urls: Vec<String>,
	},
}

#[derive(Args, Debug, Clone)]
pub struct DemoArgs {
	/// Verb to request
	#[arg(long, default_value = "edit")]
	pub verb: String,

	/// Document text handed to the editor
	#[arg(long, default_value = "hello, world")]
	pub text: String,

	/// Number of streamed updates before the final close
	#[arg(long, default_value_t = 3)]
	pub edits: usize,

	/// Pick the handler at this position in the chooser list
	#[arg(long, value_name = "INDEX", conflicts_with = "cancel")]
	pub handler: Option<usize>,

	/// Dismiss the chooser instead of picking a handler
	#[arg(long)]
	pub cancel: bool,

	/// Use the registry file instead of the built-in demo editor
	#[arg(long)]
	pub use_registry: bool,
}
