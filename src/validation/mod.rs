//! # Validation Module
//!
//! Per-action request validation. Each action declares an ordered list of
//! [`ValidationEntry`] values, one per provider (`body`, `query`, `params`,
//! `headers`, or any custom field). The dispatcher merges them into a fresh
//! [`ValidationEngine`] for every dispatch cycle and runs it before the action
//! body.
//!
//! Successful providers have their normalized value written back onto the
//! request, so an action reading `$query` sees `{"limit": 10}` rather than the
//! raw `{"limit": "10"}`. Failures are collected rather than short-circuited;
//! the resulting `validation_error` (422) lists every failing provider.
//!
//! ```rust
//! use brrtaction::validation::{JsonSchema, ValidationEngine, ValidationEntry};
//! use brrtaction::request::ActionRequest;
//! use http::Method;
//! use serde_json::json;
//!
//! let schema = JsonSchema::compile(json!({
//!     "type": "object",
//!     "properties": {"limit": {"type": "integer"}}
//! })).unwrap();
//!
//! let mut engine = ValidationEngine::new();
//! engine.push(ValidationEntry::new("query", schema));
//!
//! let mut req = ActionRequest::new(Method::GET, "/pets?limit=10");
//! let outcome = engine.validate(&mut req);
//! assert!(outcome.is_valid());
//! assert_eq!(req.query(), json!({"limit": 10}));
//! ```

mod engine;
mod schema;

pub use engine::{DataAccessor, ProviderResult, ValidationEngine, ValidationEntry, ValidationOutcome};
pub use schema::{coerce, JsonSchema, Schema, ValidationFailure};
