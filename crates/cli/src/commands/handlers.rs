use webactions::{HandlerRecord, HandlerStore};

use crate::error::{CliError, Result};
use crate::output::{
	DiagnosticLevel, HandlerAddData, HandlerListData, HandlerRemoveData, OutputFormat, ResultBuilder, print_result,
};

pub async fn list(store: &dyn HandlerStore, verb: Option<String>, command: &str, format: OutputFormat) -> Result<()> {
	let handlers = match verb.as_deref() {
		Some(verb) => store.handlers_for_verb(verb).await?,
		None => store.all_handlers().await?,
	};
	tracing::info!(count = handlers.len(), verb = ?verb, "listed handlers");

	let result = ResultBuilder::new(command)
		.data(HandlerListData { verb, handlers })
		.build();
	print_result(&result, format);
	Ok(())
}

pub async fn add(
	store: &dyn HandlerStore,
	name: String,
	url: String,
	verbs: Vec<String>,
	replace: bool,
	command: &str,
	format: OutputFormat,
) -> Result<()> {
	let verbs: Vec<String> = verbs.into_iter().map(|v| v.trim().to_string()).filter(|v| !v.is_empty()).collect();
	if verbs.is_empty() {
		return Err(CliError::InvalidInput("at least one non-empty --verb is required".into()));
	}
	if url.trim().is_empty() {
		return Err(CliError::InvalidInput("--url must not be empty".into()));
	}

	let record = HandlerRecord::new(name, url, verbs);
	let replaced = if replace {
		store.replace(record.clone()).await?
	} else {
		store.register(record.clone()).await?;
		false
	};
	tracing::info!(url = %record.url, verbs = %record.friendly_verbs(), replaced, "handler registered");

	let result = ResultBuilder::new(command)
		.data(HandlerAddData {
			handler: record,
			replaced,
		})
		.build();
	print_result(&result, format);
	Ok(())
}

pub async fn remove(store: &dyn HandlerStore, urls: Vec<String>, command: &str, format: OutputFormat) -> Result<()> {
	let removed = store.delete_by_urls(&urls).await?;
	tracing::info!(requested = urls.len(), removed, "handlers removed");

	let mut builder = ResultBuilder::new(command);
	if removed < urls.len() {
		builder = builder.diagnostic(
			DiagnosticLevel::Info,
			format!("{} url(s) were not registered", urls.len() - removed),
		);
	}
	let result = builder
		.data(HandlerRemoveData {
			requested: urls.len(),
			removed,
		})
		.build();
	print_result(&result, format);
	Ok(())
}
