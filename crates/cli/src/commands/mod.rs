pub mod demo;
pub mod handlers;

use crate::cli::{Cli, Commands, HandlersAction};
use crate::config::{load_actions_config, registry_path};
use crate::error::Result;
use crate::output::OutputFormat;
use crate::store::JsonHandlerStore;

pub async fn dispatch(cli: Cli) -> Result<()> {
	let format: OutputFormat = cli.format;
	let name = cli.command.name();

	match cli.command {
		Commands::Handlers { action } => {
			let store = JsonHandlerStore::new(registry_path(cli.registry)?);
			match action {
				HandlersAction::List { verb } => handlers::list(&store, verb, name, format).await,
				HandlersAction::Add {
					name: display_name,
					url,
					verbs,
					replace,
				} => handlers::add(&store, display_name, url, verbs, replace, name, format).await,
				HandlersAction::Remove { urls } => handlers::remove(&store, urls, name, format).await,
			}
		}
		Commands::Demo(args) => {
			let config = load_actions_config(cli.config.as_deref())?;
			let registry = if args.use_registry {
				Some(JsonHandlerStore::new(registry_path(cli.registry)?))
			} else {
				None
			};
			demo::execute(args, config, registry, name, format).await
		}
	}
}
