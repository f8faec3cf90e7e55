use super::context::RequestContext;
use super::failure::FailureSink;
use super::outcome::{ActionOutcome, Settled};
use crate::controller::{ActionDef, ActionRegistry, Controller};
use crate::error::{panic_message, ErrorObject};
use crate::hooks::ActionHook;
use crate::injector::{resolve_parameters, ParameterResolver};
use crate::request::ActionRequest;
use crate::response::{ResponseWriter, WriteRequest};
use crate::runtime_config::RuntimeConfig;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The action to dispatch.
pub enum ActionRef<C> {
    /// Looked up in the registry; only public actions resolve
    Named(String),
    /// Supplied directly, visibility is not checked
    Direct(Arc<ActionDef<C>>),
}

impl<C> ActionRef<C> {
    fn label(&self) -> &str {
        match self {
            ActionRef::Named(name) => name,
            ActionRef::Direct(def) => def.name(),
        }
    }
}

impl<C> From<&str> for ActionRef<C> {
    fn from(name: &str) -> Self {
        ActionRef::Named(name.to_string())
    }
}

impl<C> From<String> for ActionRef<C> {
    fn from(name: String) -> Self {
        ActionRef::Named(name)
    }
}

impl<C> From<Arc<ActionDef<C>>> for ActionRef<C> {
    fn from(def: Arc<ActionDef<C>>) -> Self {
        ActionRef::Direct(def)
    }
}

impl<C> Clone for ActionRef<C> {
    fn clone(&self) -> Self {
        match self {
            ActionRef::Named(name) => ActionRef::Named(name.clone()),
            ActionRef::Direct(def) => ActionRef::Direct(Arc::clone(def)),
        }
    }
}

impl<C> fmt::Debug for ActionRef<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionRef::Named(name) => f.debug_tuple("Named").field(name).finish(),
            ActionRef::Direct(def) => f.debug_tuple("Direct").field(&def.name()).finish(),
        }
    }
}

/// Runs actions of one controller type.
///
/// Cloning is cheap: the controller, registry and hooks are shared.
pub struct ActionDispatcher<C: Controller> {
    controller: Arc<C>,
    registry: Arc<ActionRegistry<C>>,
    hooks: Vec<Arc<dyn ActionHook>>,
    config: RuntimeConfig,
}

impl<C: Controller> Clone for ActionDispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            registry: Arc::clone(&self.registry),
            hooks: self.hooks.clone(),
            config: self.config,
        }
    }
}

impl<C: Controller> fmt::Debug for ActionDispatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("controller", &self.controller.name())
            .field("registry", &self.registry)
            .field("hooks", &self.hooks.len())
            .field("config", &self.config)
            .finish()
    }
}

impl<C: Controller> ActionDispatcher<C> {
    #[must_use]
    pub fn new(controller: C, registry: ActionRegistry<C>) -> Self {
        Self::from_shared(Arc::new(controller), Arc::new(registry))
    }

    #[must_use]
    pub fn from_shared(controller: Arc<C>, registry: Arc<ActionRegistry<C>>) -> Self {
        Self {
            controller,
            registry,
            hooks: Vec::new(),
            config: RuntimeConfig::default(),
        }
    }

    /// Append a hook; hooks run in the order they were added.
    #[must_use]
    pub fn with_hook(mut self, hook: impl ActionHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<C> {
        &self.controller
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ActionRegistry<C>> {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Resolve without dispatching.
    #[must_use]
    pub fn resolve(&self, action: &ActionRef<C>) -> Option<Arc<ActionDef<C>>> {
        match action {
            ActionRef::Named(name) => self.registry.resolve_public(name).cloned(),
            ActionRef::Direct(def) => Some(Arc::clone(def)),
        }
    }

    /// Dispatch with `strict_not_found` taken from the configuration.
    pub fn dispatch_default(
        &self,
        action: impl Into<ActionRef<C>>,
        req: ActionRequest,
        response: ResponseWriter,
        failure: FailureSink,
    ) {
        self.dispatch(action, req, response, failure, self.config.strict_not_found);
    }

    /// Run one dispatch cycle on its own coroutine.
    pub fn spawn(
        &self,
        action: impl Into<ActionRef<C>>,
        req: ActionRequest,
        response: ResponseWriter,
        failure: FailureSink,
    ) -> may::coroutine::JoinHandle<()> {
        let dispatcher = self.clone();
        let action = action.into();
        may::go!(move || {
            dispatcher.dispatch_default(action, req, response, failure);
        })
    }

    /// Run one dispatch cycle.
    ///
    /// Every outcome is reported through `failure` or written to `response`;
    /// nothing is returned. A panic in the synchronous part of the cycle is
    /// reported as `server_error`.
    pub fn dispatch(
        &self,
        action: impl Into<ActionRef<C>>,
        req: ActionRequest,
        response: ResponseWriter,
        failure: FailureSink,
        strict_not_found: bool,
    ) {
        let action = action.into();
        let Some(def) = self.resolve(&action) else {
            self.report_unresolved(&action, &req, &failure, strict_not_found);
            return;
        };

        let request_id = req.request_id;
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.run(&def, req, &response, &failure);
        }));
        if let Err(panic) = result {
            let message = panic_message(panic.as_ref());
            error!(
                request_id = %request_id,
                controller = self.controller.name(),
                action = def.name(),
                panic_message = %message,
                "Action panicked"
            );
            if !failure.is_settled() {
                failure.fail(
                    ErrorObject::server_error("Internal Server Error")
                        .with_inner(ErrorObject::new(format!("action panicked: {message}"))),
                );
            }
        }
    }

    fn report_unresolved(
        &self,
        action: &ActionRef<C>,
        req: &ActionRequest,
        failure: &FailureSink,
        strict_not_found: bool,
    ) {
        let controller = self.controller.name();
        if strict_not_found {
            warn!(
                request_id = %req.request_id,
                controller = controller,
                action = action.label(),
                "Action not found"
            );
            failure.fail(ErrorObject::invalid_action(controller, action.label()));
        } else {
            debug!(
                request_id = %req.request_id,
                controller = controller,
                action = action.label(),
                "Action not found; passing to next handler"
            );
            failure.pass();
        }
    }

    fn run(
        &self,
        def: &Arc<ActionDef<C>>,
        mut req: ActionRequest,
        response: &ResponseWriter,
        failure: &FailureSink,
    ) {
        let mut cx = RequestContext::new(self.controller.name(), def.name_arc(), &req);
        if let Err(err) = self.before_phase(def, &mut cx, &mut req) {
            debug!(
                request_id = %cx.request_id(),
                action = def.name(),
                error = %err,
                "Before phase rejected request"
            );
            failure.fail(err);
            return;
        }

        let req = Arc::new(req);
        let cx = Arc::new(cx);
        let args = ParameterResolver::new(
            &req,
            &cx,
            response,
            failure,
            self.registry.custom_injectors(),
        )
        .get_params(resolve_parameters(def));

        info!(
            request_id = %cx.request_id(),
            controller = cx.controller(),
            action = cx.action(),
            params = args.len(),
            "Invoking action"
        );
        let settled: Settled = match def.invoke(&self.controller, args) {
            Ok(ActionOutcome::Void) => Ok(None),
            Ok(ActionOutcome::Value(payload)) => Ok(Some(payload)),
            Ok(ActionOutcome::Pending(deferred)) => {
                debug!(request_id = %cx.request_id(), "Waiting for deferred action result");
                deferred.wait()
            }
            Err(err) => Err(err),
        };

        let payload = match settled {
            Ok(payload) => payload,
            Err(err) => {
                let err = ErrorObject::wrap_server_error(err);
                warn!(
                    request_id = %cx.request_id(),
                    action = cx.action(),
                    status = err.status(),
                    error = %err,
                    "Action failed"
                );
                failure.fail(err);
                return;
            }
        };

        if failure.is_settled() {
            debug!(
                request_id = %cx.request_id(),
                action = cx.action(),
                "Failure sink settled by action; skipping write"
            );
            return;
        }

        let mut first_failure = None;
        let mut torn = false;
        if let Some(payload) = payload {
            match response.write(WriteRequest::new(payload)) {
                Ok(()) => response.end(),
                Err(err) => {
                    torn = response.head_sent();
                    first_failure = Some(err);
                }
            }
        }

        let after = self.controller.after(&cx, &req);
        keep_first(&mut first_failure, after, &cx, "controller");
        for hook in &self.hooks {
            keep_first(&mut first_failure, hook.after(&cx, &req), &cx, "hook");
        }

        if let Some(err) = first_failure {
            failure.fail(err);
        }
        // Headers are out, so no error body can follow; release the sink.
        if torn {
            response.end();
        }
    }

    fn before_phase(
        &self,
        def: &ActionDef<C>,
        cx: &mut RequestContext,
        req: &mut ActionRequest,
    ) -> Result<(), ErrorObject> {
        cx.add_validations(def.validations());
        cx.validate(req)?;
        self.controller.before(cx, req)?;
        for hook in &self.hooks {
            hook.before(cx, req)?;
        }
        Ok(())
    }
}

fn keep_first(
    slot: &mut Option<ErrorObject>,
    result: Result<(), ErrorObject>,
    cx: &RequestContext,
    stage: &'static str,
) {
    let Err(err) = result else {
        return;
    };
    if slot.is_none() {
        *slot = Some(err);
    } else {
        error!(
            request_id = %cx.request_id(),
            action = cx.action(),
            stage = stage,
            error = %err,
            "Additional failure after response; not reported"
        );
    }
}
