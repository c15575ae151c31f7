//! webactions: cross-origin action exchange between a requester and a handler.
//!
//! A requester hands a unit of work (a verb plus a payload) to a handler that
//! lives in another origin, receives streamed updates to that payload, and
//! learns when the exchange is complete or was aborted.
//!
//! # Examples
//!
//! ## Requesting an action
//!
//! ```ignore
//! use std::sync::Arc;
//! use webactions::{ActionsConfig, Establisher, FrameRelay, OriginTable, Requester};
//!
//! let origins = Arc::new(OriginTable::new());
//! let establisher = Establisher::new(Arc::new(FrameRelay::new(origins)));
//!
//! let connection = establisher.connect("https://editor.example/").await?;
//! let requester = Requester::new(connection, ActionsConfig::default());
//! tokio::spawn({
//!     let requester = requester.clone();
//!     async move { requester.run().await }
//! });
//!
//! let action = requester.perform_action("edit", serde_json::json!("draft"))?;
//! for event in action.wait_closed().await {
//!     println!("{event:?}");
//! }
//! ```
//!
//! ## Serving actions
//!
//! ```ignore
//! use webactions::{ActionsConfig, ClientDispatcher, ClientRouter, HandlerService};
//!
//! let config = ActionsConfig::default();
//! let router = ClientRouter::new(&config);
//! let service = Arc::new(HandlerService::new(config, router.clone()));
//! origins.register("https://editor.example/", service.control_sender()?)?;
//! service.run(Arc::new(ClientDispatcher::new(router))).await?;
//! ```

pub mod action;
pub mod blob;
pub mod chooser;
pub mod config;
pub mod events;
pub mod handler;
pub mod registry;
pub mod requester;
pub mod router;
pub mod store;

pub use action::{
	AbortReason, ActionEvent, ActionKind, ActionNotice, ActionState, ActionView, Transition,
};
pub use blob::{BlobReader, Utf8Reader, blob_from_payload, read_as_text, read_as_text_cancellable};
pub use chooser::{Choice, Chooser, FixedChooser};
pub use config::ActionsConfig;
pub use events::EventStream;
pub use handler::{ActionHandler, HandlerService, IncomingAction};
pub use registry::{ActionRegistry, RegistryKey, RoutingStrategy};
pub use requester::{RequestedAction, Requester, connect_via_chooser, perform_action};
pub use router::{ClientDispatcher, ClientHandle, ClientRouter, Route, RouteKind, WindowOpener};
pub use store::{HandlerStore, MemoryHandlerStore};
pub use webactions_protocol::{
	AbortCode, ActionHints, ActionId, ActionOptions, Blob, ClientId, ConnectReply, ConnectionId,
	HandlerRecord, Message,
};
pub use webactions_runtime::{
	ConnectFailure, Connection, ControlMessage, Error, Establisher, FrameRelay, MessageChannel,
	MessagePort, OriginTable, PortMessage, RecordingRelay, Relay, Result,
};
