//! # Action Hooks
//!
//! Hooks are the dispatcher's cross-cutting extension point. They run around
//! every action, each after the controller's own [`Controller::before`] or
//! [`Controller::after`]:
//!
//! ```text
//! validate -> Controller::before -> hook.before (in order)
//!          -> action
//!          -> Controller::after -> hook.after (in order)
//! ```
//!
//! A failing `before` stops the chain and the action never runs. `after`
//! hooks only run when the action completed successfully.
//!
//! [`Controller::before`]: crate::controller::Controller::before
//! [`Controller::after`]: crate::controller::Controller::after

use crate::dispatcher::RequestContext;
use crate::error::ErrorObject;
use crate::request::ActionRequest;
use tracing::{debug, info};

pub trait ActionHook: Send + Sync {
    /// # Errors
    ///
    /// Short-circuits the dispatch with this failure.
    fn before(&self, _cx: &mut RequestContext, _req: &ActionRequest) -> Result<(), ErrorObject> {
        Ok(())
    }

    /// # Errors
    ///
    /// Reported if the response has not settled yet, otherwise logged.
    fn after(&self, _cx: &RequestContext, _req: &ActionRequest) -> Result<(), ErrorObject> {
        Ok(())
    }
}

/// Logs action start and completion with latency.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHook;

impl ActionHook for TracingHook {
    fn before(&self, cx: &mut RequestContext, req: &ActionRequest) -> Result<(), ErrorObject> {
        debug!(
            request_id = %cx.request_id(),
            controller = cx.controller(),
            action = cx.action(),
            method = %req.method,
            path = %req.path(),
            "Action start"
        );
        Ok(())
    }

    fn after(&self, cx: &RequestContext, _req: &ActionRequest) -> Result<(), ErrorObject> {
        info!(
            request_id = %cx.request_id(),
            controller = cx.controller(),
            action = cx.action(),
            latency_ms = cx.elapsed().as_millis() as u64,
            "Action complete"
        );
        Ok(())
    }
}

/// Rejects requests missing a header, with the given failure.
///
/// ```rust
/// use brrtaction::error::ErrorObject;
/// use brrtaction::hooks::RequireHeader;
///
/// let hook = RequireHeader::new("authorization", ErrorObject::not_auth("Missing credentials"));
/// # let _ = hook;
/// ```
#[derive(Debug, Clone)]
pub struct RequireHeader {
    header: String,
    failure: ErrorObject,
}

impl RequireHeader {
    #[must_use]
    pub fn new(header: &str, failure: ErrorObject) -> Self {
        Self {
            header: header.to_ascii_lowercase(),
            failure,
        }
    }
}

impl ActionHook for RequireHeader {
    fn before(&self, cx: &mut RequestContext, req: &ActionRequest) -> Result<(), ErrorObject> {
        if req.header(&self.header).is_some() {
            return Ok(());
        }
        debug!(
            request_id = %cx.request_id(),
            header = %self.header,
            "Required header missing"
        );
        Err(self.failure.clone())
    }
}
