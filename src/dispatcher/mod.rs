//! # Dispatcher Module
//!
//! The dispatcher turns "run action X of controller C for this request" into
//! a written response or a reported failure.
//!
//! ## Overview
//!
//! For every request the [`ActionDispatcher`]:
//! - Resolves the action by name (public actions only) or takes it directly
//! - Validates the request against the action's declared schemas
//! - Runs `Controller::before` and every registered [`ActionHook`]
//! - Injects the declared parameters and invokes the action
//! - Parks the coroutine on a [`Deferred`] result when the action returns one
//! - Writes the result, runs the after hooks, and reports failures once
//!
//! ## Request Flow
//!
//! ```text
//! resolve ──none──> invalid_action (strict) | pass
//!    │
//! RequestContext::new
//!    │
//! validate ──fail──> validation_error (422)
//!    │
//! Controller::before, hooks ──fail──> failure sink
//!    │
//! ParameterResolver::get_params
//!    │
//! invoke ──Err / rejected──> failure sink (after hooks skipped)
//!    │
//! write + end, Controller::after, hooks ──first failure──> failure sink
//! ```
//!
//! ## Error Handling
//!
//! Every failure goes through a single [`FailureSink`], which settles at most
//! once. Action errors that are already [`ErrorObject`](crate::error::ErrorObject)s
//! are reported unchanged; anything else is wrapped as `server_error`.
//! Panics in the synchronous part of a cycle are caught and reported the
//! same way.
//!
//! ## Example
//!
//! ```rust
//! use brrtaction::controller::{ActionDef, ActionRegistry, Controller};
//! use brrtaction::dispatcher::{ActionDispatcher, ActionOutcome, FailureSink};
//! use brrtaction::request::ActionRequest;
//! use brrtaction::response::{BufferedResponse, ResponseWriter};
//! use http::Method;
//! use serde_json::json;
//!
//! struct Pets;
//! impl Controller for Pets {}
//!
//! let registry = ActionRegistry::builder()
//!     .register(
//!         ActionDef::new("show", |_: &Pets, args| {
//!             let id = args.value(0).and_then(|p| p.get("id")).cloned();
//!             ActionOutcome::json(&json!({ "id": id }))
//!         })
//!         .public()
//!         .inject(["$params"]),
//!     )
//!     .build()
//!     .unwrap();
//! let dispatcher = ActionDispatcher::new(Pets, registry);
//!
//! let out = BufferedResponse::new();
//! let writer = ResponseWriter::new(out.clone());
//! let req = ActionRequest::new(Method::GET, "/pets/7").with_params(json!({"id": "7"}));
//! dispatcher.dispatch("show", req, writer.clone(), FailureSink::responding(writer), true);
//!
//! assert_eq!(out.status(), Some(200));
//! assert_eq!(out.body_json().unwrap(), json!({"id": "7"}));
//! ```
//!
//! ## Concurrency
//!
//! Dispatch runs on the calling coroutine. [`ActionDispatcher::spawn`] runs a
//! cycle on a fresh `may` coroutine; waiting on a [`Deferred`] parks only the
//! coroutine, not the worker thread.
//!
//! [`ActionHook`]: crate::hooks::ActionHook

mod context;
mod core;
mod failure;
mod outcome;

pub use context::RequestContext;
pub use core::{ActionDispatcher, ActionRef};
pub use failure::FailureSink;
pub use outcome::{ActionOutcome, ActionResult, Deferred, Resolver, Settled};
