use serde_json::json;

use super::*;

#[test]
fn result_builder_success() {
	let result: CommandResult<HandlerRemoveData> = ResultBuilder::new("handlers remove")
		.data(HandlerRemoveData {
			requested: 2,
			removed: 1,
		})
		.build();

	assert!(result.ok);
	assert_eq!(result.command, "handlers remove");
	assert_eq!(result.schema_version, Some(SCHEMA_VERSION));
	assert!(result.error.is_none());
}

#[test]
fn result_builder_error() {
	let result: CommandResult<DemoData> = ResultBuilder::new("demo")
		.error(ErrorCode::Cancelled, "Failed to connect to handlers for 'edit': cancelled by user")
		.build();

	assert!(!result.ok);
	assert!(result.data.is_none());
	assert_eq!(result.error.as_ref().unwrap().code, ErrorCode::Cancelled);
}

#[test]
fn error_code_display_matches_wire_form() {
	for code in [
		ErrorCode::NoAvailableClient,
		ErrorCode::DuplicateHandler,
		ErrorCode::ProtocolViolation,
	] {
		let wire = serde_json::to_value(code).unwrap();
		assert_eq!(wire, json!(code.to_string()));
	}
}

#[test]
fn output_format_parse() {
	assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
	assert_eq!("TEXT".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
	assert!("toml".parse::<OutputFormat>().is_err());
}

#[test]
fn envelope_uses_camel_case() {
	let result: CommandResult<DemoData> = ResultBuilder::new("demo")
		.data(DemoData {
			verb: "edit".into(),
			handler: "https://editor.example/".into(),
			client_id: None,
			events: vec![
				ObservedEvent::Update { payload: json!(1) },
				ObservedEvent::Completed { payload: json!("done") },
			],
			relay_attempts: vec!["https://editor.example/".into()],
			violations: 0,
		})
		.diagnostic(DiagnosticLevel::Warning, "best-effort route")
		.build();

	let value = serde_json::to_value(&result).unwrap();
	assert_eq!(value["schemaVersion"], 1);
	assert_eq!(value["ok"], true);
	assert_eq!(value["data"]["relayAttempts"][0], "https://editor.example/");
	assert_eq!(value["data"]["events"][0]["kind"], "update");
	assert_eq!(value["data"]["events"][1]["kind"], "completed");
	assert!(value["data"].get("clientId").is_none());
	assert_eq!(value["diagnostics"][0]["level"], "warning");
	assert!(value["timings"]["durationMs"].is_u64());
}

fn text_of<T: TextOutput + serde::Serialize>(result: &CommandResult<T>) -> String {
	let mut out = Vec::new();
	write_result_text(result, &mut out).unwrap();
	String::from_utf8(out).unwrap()
}

#[test]
fn handler_list_renders_as_a_table() {
	let result = ResultBuilder::new("handlers list")
		.data(HandlerListData {
			verb: None,
			handlers: vec![
				HandlerRecord::new("Scratchpad", "https://scratchpad.example/edit", ["edit"]),
				HandlerRecord::new("Viewer", "https://v.example/", ["open", "edit", "share"]),
			],
		})
		.build();

	let text = text_of(&result);
	let lines: Vec<_> = text.lines().collect();
	assert!(lines[0].starts_with("NAME"));
	assert!(lines[0].ends_with("VERBS"));
	assert!(lines[1].starts_with("Scratchpad  https://scratchpad.example/edit  edit"));
	assert!(lines[2].contains("open, edit and share"));
	assert!(!text.contains('{'), "text output should not be JSON: {text}");
}

#[test]
fn empty_list_names_the_verb() {
	let result = ResultBuilder::new("handlers list")
		.data(HandlerListData {
			verb: Some("share".into()),
			handlers: Vec::new(),
		})
		.build();
	assert!(text_of(&result).starts_with("No handlers for 'share'\n"));
}

#[test]
fn demo_renders_one_event_per_line() {
	let result = ResultBuilder::new("demo")
		.data(DemoData {
			verb: "edit".into(),
			handler: "https://editor.example/".into(),
			client_id: Some("s-1".into()),
			events: vec![
				ObservedEvent::Update {
					payload: json!("hello (rev 1)"),
				},
				ObservedEvent::Completed {
					payload: json!({"n": 2}),
				},
				ObservedEvent::Aborted {
					reason: "connection lost".into(),
				},
			],
			relay_attempts: vec!["https://editor.example/".into()],
			violations: 0,
		})
		.diagnostic(DiagnosticLevel::Warning, "action aborted: connection lost")
		.build();

	let text = text_of(&result);
	let lines: Vec<_> = text.lines().collect();
	assert_eq!(lines[0], "edit via https://editor.example/");
	assert_eq!(lines[1], "session s-1");
	assert_eq!(lines[2], "update     hello (rev 1)");
	assert_eq!(lines[3], r#"completed  {"n":2}"#);
	assert_eq!(lines[4], "aborted    connection lost");
	assert_eq!(lines[5], "relay attempts: https://editor.example/");
	assert_eq!(lines[6], "[warning] action aborted: connection lost");
	assert!(lines[7].starts_with("Completed in "));
}

#[test]
fn failed_result_renders_the_error_code() {
	let result: CommandResult<()> = ResultBuilder::new("handlers add")
		.error(ErrorCode::DuplicateHandler, "handler https://a.example/ already registered")
		.build();
	assert!(text_of(&result).starts_with("Error [DUPLICATE_HANDLER]: handler https://a.example/ already registered\n"));
}
