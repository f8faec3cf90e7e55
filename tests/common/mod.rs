#![allow(dead_code)]

use brrtaction::prelude::*;
use brrtaction::runtime_config::RuntimeConfig;
use parking_lot::Mutex;
use std::sync::{Arc, Once};

/// Ensures May coroutines are configured only once
static MAY_INIT: Once = Once::new();

pub fn setup_may_runtime() {
    MAY_INIT.call_once(|| {
        RuntimeConfig {
            stack_size: 0x8000,
            ..RuntimeConfig::default()
        }
        .apply();
    });
}

/// Ordered record of lifecycle events, shared between controller, hooks and actions.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// Controller that records its own hooks.
pub struct Pets {
    pub log: EventLog,
    pub fail_before: Option<ErrorObject>,
}

impl Pets {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            fail_before: None,
        }
    }
}

impl Controller for Pets {
    fn before(&self, _cx: &mut RequestContext, _req: &ActionRequest) -> Result<(), ErrorObject> {
        self.log.push("controller.before");
        match &self.fail_before {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn after(&self, _cx: &RequestContext, _req: &ActionRequest) -> Result<(), ErrorObject> {
        self.log.push("controller.after");
        Ok(())
    }
}

/// Hook that records calls and can be told to fail.
pub struct RecordingHook {
    pub name: &'static str,
    pub log: EventLog,
    pub fail_after: Option<ErrorObject>,
}

impl RecordingHook {
    pub fn new(name: &'static str, log: &EventLog) -> Self {
        Self {
            name,
            log: log.clone(),
            fail_after: None,
        }
    }

    pub fn failing_after(mut self, err: ErrorObject) -> Self {
        self.fail_after = Some(err);
        self
    }
}

impl ActionHook for RecordingHook {
    fn before(&self, _cx: &mut RequestContext, _req: &ActionRequest) -> Result<(), ErrorObject> {
        self.log.push(format!("{}.before", self.name));
        Ok(())
    }

    fn after(&self, _cx: &RequestContext, _req: &ActionRequest) -> Result<(), ErrorObject> {
        self.log.push(format!("{}.after", self.name));
        match &self.fail_after {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Everything one dispatch call needs, plus handles to inspect the result.
pub struct Harness {
    pub out: BufferedResponse,
    pub writer: ResponseWriter,
    pub sink: FailureSink,
    pub reports: Arc<Mutex<Vec<Option<ErrorObject>>>>,
}

impl Harness {
    pub fn new() -> Self {
        let out = BufferedResponse::new();
        let writer = ResponseWriter::new(out.clone());
        let reports: Arc<Mutex<Vec<Option<ErrorObject>>>> = Arc::default();
        let recorded = Arc::clone(&reports);
        let sink = FailureSink::new(move |err| recorded.lock().push(err));
        Self {
            out,
            writer,
            sink,
            reports,
        }
    }

    pub fn reports(&self) -> Vec<Option<ErrorObject>> {
        self.reports.lock().clone()
    }

    /// The single failure reported, panicking if there was not exactly one.
    pub fn only_failure(&self) -> ErrorObject {
        let reports = self.reports();
        assert_eq!(reports.len(), 1, "expected one report, got {reports:?}");
        reports[0].clone().expect("expected a failure, got a pass")
    }
}

pub fn dispatch<C: Controller>(
    dispatcher: &ActionDispatcher<C>,
    action: &str,
    req: ActionRequest,
    strict_not_found: bool,
) -> Harness {
    let harness = Harness::new();
    dispatcher.dispatch(
        action,
        req,
        harness.writer.clone(),
        harness.sink.clone(),
        strict_not_found,
    );
    harness
}
