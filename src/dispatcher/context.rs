use crate::error::ErrorObject;
use crate::ids::RequestId;
use crate::request::ActionRequest;
use crate::validation::{ValidationEngine, ValidationEntry, ValidationOutcome};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-dispatch state, created fresh for each request and discarded with it.
///
/// Before-hooks receive it mutably; once the before phase has completed it is
/// frozen behind an `Arc` and handed to the action (`$context`) and the
/// after-hooks.
#[derive(Debug)]
pub struct RequestContext {
    request_id: RequestId,
    controller: &'static str,
    action: Arc<str>,
    has_body: bool,
    is_mutating: bool,
    started_at: Instant,
    validator: ValidationEngine,
    validation: Option<ValidationOutcome>,
    locals: Map<String, Value>,
}

impl RequestContext {
    #[must_use]
    pub fn new(controller: &'static str, action: Arc<str>, req: &ActionRequest) -> Self {
        Self {
            request_id: req.request_id,
            controller,
            action,
            has_body: req.has_body(),
            is_mutating: req.is_mutating(),
            started_at: Instant::now(),
            validator: ValidationEngine::new(),
            validation: None,
            locals: Map::new(),
        }
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    #[must_use]
    pub fn controller(&self) -> &'static str {
        self.controller
    }

    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    #[must_use]
    pub fn has_body(&self) -> bool {
        self.has_body
    }

    #[must_use]
    pub fn is_mutating(&self) -> bool {
        self.is_mutating
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Add declared validations to this cycle's accumulator.
    pub fn add_validations(&mut self, entries: &[ValidationEntry]) {
        self.validator.merge(entries);
    }

    #[must_use]
    pub fn validator(&self) -> &ValidationEngine {
        &self.validator
    }

    /// Run the accumulated validations, keeping the outcome on the context.
    ///
    /// # Errors
    ///
    /// Returns the `validation_error` envelope when any provider fails.
    pub fn validate(&mut self, req: &mut ActionRequest) -> Result<(), ErrorObject> {
        let outcome = self.validator.validate(req);
        let failure = outcome.to_error();
        self.validation = Some(outcome);
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Outcome of the validation run, once it has happened.
    #[must_use]
    pub fn validation(&self) -> Option<&ValidationOutcome> {
        self.validation.as_ref()
    }

    /// Stash a value for later hooks or the action.
    pub fn set_local(&mut self, key: &str, value: Value) {
        self.locals.insert(key.to_string(), value);
    }

    #[must_use]
    pub fn local(&self, key: &str) -> Option<&Value> {
        self.locals.get(key)
    }
}
