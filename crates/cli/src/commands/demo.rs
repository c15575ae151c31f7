//! In-process exchange: registry lookup, chooser, relay handshake and a
//! handler service whose editor context streams revisions of a text file.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use webactions::{
	ActionEvent, ActionOptions, ActionsConfig, Blob, ClientDispatcher, ClientId, ClientRouter, Establisher,
	FixedChooser, FrameRelay, HandlerRecord, HandlerService, HandlerStore, IncomingAction, MemoryHandlerStore,
	Message, OriginTable, RecordingRelay, Requester, WindowOpener, blob_from_payload, connect_via_chooser,
	read_as_text,
};

use crate::cli::DemoArgs;
use crate::error::Result;
use crate::output::{DemoData, DiagnosticLevel, ObservedEvent, OutputFormat, ResultBuilder, print_result};

const DOCUMENT_NAME: &str = "document.txt";

/// Handlers offered when the demo does not read the registry file.
pub fn builtin_handlers(verb: &str) -> Vec<HandlerRecord> {
	vec![
		HandlerRecord::new("Scratchpad", "https://scratchpad.example/edit", [verb]),
		HandlerRecord::new("Markdown Studio", "https://markdown.example/edit", [verb]),
	]
}

pub async fn execute(
	args: DemoArgs,
	config: ActionsConfig,
	registry: Option<impl HandlerStore>,
	command: &str,
	format: OutputFormat,
) -> Result<()> {
	let best_effort = config.routing.is_best_effort();
	let data = match registry {
		Some(store) => run(&args, config, &store).await?,
		None => {
			let store = MemoryHandlerStore::with_handlers(builtin_handlers(&args.verb));
			run(&args, config, &store).await?
		}
	};

	let mut builder = ResultBuilder::new(command);
	if best_effort {
		builder = builder.diagnostic(
			DiagnosticLevel::Warning,
			"best-effort routing: concurrent actions may reach the wrong context",
		);
	}
	if let Some(ObservedEvent::Aborted { reason }) = data.events.last() {
		builder = builder.diagnostic(DiagnosticLevel::Warning, format!("action aborted: {reason}"));
	}
	print_result(&builder.data(data).build(), format);
	Ok(())
}

/// Serves every handler registered for the verb, then performs one action
/// through whichever the chooser picks.
pub async fn run(args: &DemoArgs, config: ActionsConfig, store: &dyn HandlerStore) -> Result<DemoData> {
	let origins = Arc::new(OriginTable::new());
	let mut services = Vec::new();
	for record in store.handlers_for_verb(&args.verb).await? {
		services.push(serve_editor(&origins, &record.url, &config, args.edits)?);
	}

	let outcome = exchange(args, config, store, &origins).await;

	for (service, task) in services {
		service.shutdown();
		task.abort();
	}
	outcome
}

async fn exchange(
	args: &DemoArgs,
	config: ActionsConfig,
	store: &dyn HandlerStore,
	origins: &Arc<OriginTable>,
) -> Result<DemoData> {
	let relay = Arc::new(RecordingRelay::new(FrameRelay::new(Arc::clone(origins))));
	let establisher = Establisher::new(relay.clone()).with_timeout(config.connect_timeout());
	let chooser = if args.cancel {
		FixedChooser::Cancel
	} else {
		FixedChooser::Index(args.handler.unwrap_or(0))
	};

	let connection = connect_via_chooser(&establisher, store, &chooser, &args.verb).await?;
	let requester = Requester::new(connection, config);
	let runner = requester.clone();
	let session = tokio::spawn(async move {
		if let Err(e) = runner.run().await {
			tracing::error!(error = %e, "requester loop failed");
		}
	});

	let options = ActionOptions::new(args.verb.as_str()).mime_type("text/plain");
	let action = requester.perform_action(options, file_payload(&args.text))?;
	tracing::info!(id = %action.id(), target = %requester.target(), "action sent");
	let events = action.wait_closed().await;
	session.abort();

	Ok(DemoData {
		verb: args.verb.clone(),
		handler: requester.target().to_string(),
		client_id: requester.client_id().map(|c| c.as_str().to_string()),
		events: events.into_iter().map(observe).collect(),
		relay_attempts: relay.attempts(),
		violations: requester.violations(),
	})
}

fn serve_editor(
	origins: &OriginTable,
	url: &str,
	config: &ActionsConfig,
	edits: usize,
) -> Result<(Arc<HandlerService>, JoinHandle<()>)> {
	let router = ClientRouter::new(config);
	router.set_opener(Arc::new(DemoEditor { edits }));
	let dispatcher = Arc::new(ClientDispatcher::new(router.clone()));

	let service = Arc::new(HandlerService::new(config.clone(), router));
	origins.register(url, service.control_sender()?)?;

	let runner = Arc::clone(&service);
	let url = url.to_string();
	let task = tokio::spawn(async move {
		if let Err(e) = runner.run(dispatcher).await {
			tracing::error!(%url, error = %e, "handler service stopped");
		}
	});
	Ok((service, task))
}

fn file_payload(text: &str) -> Value {
	json!({ "file": Blob::text(DOCUMENT_NAME, text) })
}

fn observe(event: ActionEvent) -> ObservedEvent {
	match event {
		ActionEvent::Update { payload } => ObservedEvent::Update {
			payload: readable(payload),
		},
		ActionEvent::Completed { payload } => ObservedEvent::Completed {
			payload: readable(payload),
		},
		ActionEvent::Aborted { reason } => ObservedEvent::Aborted {
			reason: reason.to_string(),
		},
	}
}

/// File payloads as their text, anything else untouched.
fn readable(payload: Value) -> Value {
	match blob_from_payload(&payload).and_then(|blob| read_as_text(&blob)) {
		Ok(text) => Value::String(text),
		Err(_) => payload,
	}
}

/// Editor window: appends a revision marker per edit, then closes with the
/// last revision.
struct DemoEditor {
	edits: usize,
}

#[async_trait]
impl WindowOpener for DemoEditor {
	async fn open(&self, router: &ClientRouter, client_id: Option<&ClientId>) -> webactions::Result<()> {
		let mut context = router.register_client(Message::Startup {
			client_id: client_id.cloned(),
		})?;
		tracing::info!(client = ?client_id.map(ClientId::as_str), "editor opened");

		let edits = self.edits;
		tokio::spawn(async move {
			while let Some(action) = context.next_action().await {
				tokio::spawn(edit(action, edits));
			}
		});
		Ok(())
	}
}

async fn edit(action: IncomingAction, edits: usize) {
	let original = match blob_from_payload(action.payload()).and_then(|blob| read_as_text(&blob)) {
		Ok(text) => text,
		Err(e) => {
			let _ = action.abort(e.to_string());
			return;
		}
	};

	let mut revision = original.clone();
	for n in 1..=edits {
		revision = format!("{original} (rev {n})");
		if let Err(e) = action.update(file_payload(&revision)) {
			tracing::debug!(id = %action.id(), error = %e, "requester went away mid-edit");
			return;
		}
		tokio::task::yield_now().await;
	}
	let _ = action.close(file_payload(&revision));
}
