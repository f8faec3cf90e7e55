//! # brrtaction
//!
//! **brrtaction** is a coroutine-powered action dispatch layer. It sits between
//! an HTTP framework's routing layer and user-written controller actions:
//! given a controller, an action and a request, it validates the request,
//! injects the parameters the action asked for, runs it, and writes the
//! result or the error back to the client.
//!
//! ## Architecture
//!
//! - **[`controller`]** - `Controller` trait, `ActionDef` registration and the per-controller registry
//! - **[`dispatcher`]** - The dispatch pipeline, deferred results and the failure sink
//! - **[`validation`]** - Ordered provider validations and JSON Schema support
//! - **[`injector`]** - Named parameter injection (`$req`, `$query`, `$body`, ...)
//! - **[`response`]** - `ResponseWriter` over a transport-provided `ResponseSink`
//! - **[`hooks`]** - Cross-cutting before/after hooks
//! - **[`error`]** - The wire error envelope and error taxonomy
//! - **[`request`]** - The inbound request as seen by actions
//! - **[`runtime_config`]** / **[`logging`]** - Environment-driven configuration
//!
//! ### Dispatch Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Router
//!     participant Dispatcher as ActionDispatcher
//!     participant Engine as ValidationEngine
//!     participant Hooks as Controller / Hooks
//!     participant Action
//!     participant Writer as ResponseWriter
//!     participant Sink as FailureSink
//!
//!     Router->>Dispatcher: dispatch("show", req, writer, sink)
//!     Dispatcher->>Dispatcher: resolve public action
//!     alt not found
//!         Dispatcher->>Sink: invalid_action | pass
//!     end
//!     Dispatcher->>Engine: validate(req)
//!     alt invalid
//!         Dispatcher->>Sink: validation_error (422)
//!     end
//!     Dispatcher->>Hooks: before
//!     Dispatcher->>Action: invoke(args)
//!     alt Err / rejected
//!         Dispatcher->>Sink: error
//!     else value
//!         Dispatcher->>Writer: write + end
//!         Dispatcher->>Hooks: after
//!     end
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use brrtaction::prelude::*;
//! use http::Method;
//! use serde_json::json;
//!
//! struct Greeter;
//! impl Controller for Greeter {}
//!
//! let registry = ActionRegistry::builder()
//!     .register(
//!         ActionDef::new("hello", |_: &Greeter, args: Args| {
//!             let name = args.value(0).and_then(|q| q.get("name")).cloned();
//!             ActionOutcome::json(&json!({ "hello": name }))
//!         })
//!         .public()
//!         .inject(["$query"]),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let dispatcher = ActionDispatcher::new(Greeter, registry).with_hook(TracingHook);
//! let out = BufferedResponse::new();
//! let writer = ResponseWriter::new(out.clone());
//! dispatcher.dispatch_default(
//!     "hello",
//!     ActionRequest::new(Method::GET, "/hello?name=may"),
//!     writer.clone(),
//!     FailureSink::responding(writer),
//! );
//! assert_eq!(out.body_json().unwrap(), json!({"hello": "may"}));
//! ```
//!
//! ## Runtime
//!
//! Dispatch runs on `may` coroutines. Deferred action results park the
//! dispatching coroutine; see [`runtime_config`] for stack sizing.

pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod hooks;
pub mod ids;
pub mod injector;
pub mod logging;
pub mod request;
pub mod response;
pub mod runtime_config;
pub mod validation;

pub use controller::{ActionDef, ActionRegistry, Controller, RegistryError, Visibility};
pub use dispatcher::{ActionDispatcher, ActionOutcome, ActionRef, ActionResult, FailureSink, RequestContext};
pub use error::{ErrorKind, ErrorObject};
pub use ids::RequestId;
pub use request::ActionRequest;
pub use response::{ResponseWriter, WriteRequest};

/// Everything needed to declare controllers and dispatch to them.
pub mod prelude {
    pub use crate::controller::{ActionDef, ActionRegistry, Controller, Visibility};
    pub use crate::dispatcher::{
        ActionDispatcher, ActionOutcome, ActionResult, Deferred, FailureSink, RequestContext,
    };
    pub use crate::error::{ErrorKind, ErrorObject};
    pub use crate::hooks::{ActionHook, TracingHook};
    pub use crate::injector::{Args, Injected};
    pub use crate::request::ActionRequest;
    pub use crate::response::{BufferedResponse, Payload, ResponseWriter, WriteRequest};
    pub use crate::validation::{JsonSchema, ValidationEntry};
}
