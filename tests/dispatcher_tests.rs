//! Tests for the action dispatch pipeline
//!
//! # Test Coverage
//!
//! - Resolution: public / private / unknown actions, strict and lenient
//! - Before phase: validation (422), controller and hook short-circuits
//! - Invocation: JSON and byte results, synchronous errors, panics
//! - Deferred results: success, rejection, after-hook skipping
//! - After phase: ordering, single failure report
//! - Coroutine dispatch via `spawn`

mod common;

use anyhow::anyhow;
use brrtaction::dispatcher::ActionRef;
use brrtaction::prelude::*;
use brrtaction::runtime_config::RuntimeConfig;
use brrtaction::validation::ValidationFailure;
use common::{dispatch, EventLog, Harness, Pets, RecordingHook};
use http::Method;
use brrtaction::response::ResponseSink;
use serde_json::{json, Value};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn registry(log: &EventLog) -> ActionRegistry<Pets> {
    let body_log = log.clone();
    ActionRegistry::builder()
        .injector("$tenant", |req, _cx| json!(req.header("x-tenant")))
        .register(
            ActionDef::new("create", move |_: &Pets, args: Args| {
                body_log.push("action");
                Ok(args.value(0).cloned().unwrap_or(Value::Null).into())
            })
            .public()
            .inject(["$body"]),
        )
        .register(
            ActionDef::new("download", |_: &Pets, _| Ok(ActionOutcome::bytes(vec![0xde, 0xad, 0xbe, 0xef])))
                .public(),
        )
        .register(
            ActionDef::new("explode", |_: &Pets, _| Err(anyhow!("database unavailable"))).public(),
        )
        .register(
            ActionDef::new("forbid", |_: &Pets, _| Err(ErrorObject::forbidden("Members only").into()))
                .public(),
        )
        .register(ActionDef::new("panic", |_: &Pets, _| panic!("unexpected state")).public())
        .register(ActionDef::new("secret", |_: &Pets, _| ActionOutcome::json(&json!({"s": 1}))))
        .register(
            ActionDef::new("tenant", |_: &Pets, args: Args| {
                ActionOutcome::json(&json!({ "tenant": args.value(0) }))
            })
            .public()
            .inject(["$tenant"]),
        )
        .build()
        .unwrap()
}

fn dispatcher(log: &EventLog) -> ActionDispatcher<Pets> {
    ActionDispatcher::new(Pets::new(log.clone()), registry(log))
}

#[test]
fn test_returns_json_object() {
    let log = EventLog::default();
    let d = dispatcher(&log);
    let h = dispatch(
        &d,
        "create",
        ActionRequest::new(Method::POST, "/pets").with_body(json!({"x": 1})),
        true,
    );
    assert_eq!(h.out.status(), Some(200));
    assert_eq!(h.out.header("content-type").as_deref(), Some("application/json"));
    assert_eq!(h.out.body_json().unwrap(), json!({"x": 1}));
    assert!(h.out.is_finished());
    assert!(h.reports().is_empty());
}

#[test]
fn test_returns_bytes() {
    let log = EventLog::default();
    let h = dispatch(&dispatcher(&log), "download", ActionRequest::new(Method::GET, "/dl"), true);
    assert_eq!(h.out.status(), Some(200));
    assert_eq!(
        h.out.header("content-type").as_deref(),
        Some("application/octet-stream")
    );
    assert_eq!(h.out.body(), vec![0xde, 0xad, 0xbe, 0xef]);
}

#[test]
fn test_native_error_wrapped_as_server_error() {
    let log = EventLog::default();
    let h = dispatch(&dispatcher(&log), "explode", ActionRequest::new(Method::GET, "/"), true);
    let err = h.only_failure();
    assert!(err.is(ErrorKind::ServerError));
    assert_eq!(err.status(), 500);
    assert_eq!(
        err.inner_err.as_ref().map(|inner| inner.message.as_str()),
        Some("database unavailable")
    );
    assert!(h.out.status().is_none());
}

#[test]
fn test_structured_error_passes_through() {
    let log = EventLog::default();
    let h = dispatch(&dispatcher(&log), "forbid", ActionRequest::new(Method::GET, "/"), true);
    let err = h.only_failure();
    assert!(err.is(ErrorKind::Forbidden));
    assert_eq!(err.status(), 403);
    assert_eq!(err.message, "Members only");
}

#[test]
fn test_unknown_action_lenient_passes() {
    let log = EventLog::default();
    let h = dispatch(&dispatcher(&log), "nope", ActionRequest::new(Method::GET, "/"), false);
    assert_eq!(h.reports(), vec![None]);
    assert!(h.out.status().is_none());
}

#[test]
fn test_private_action_is_not_resolved_by_name() {
    let log = EventLog::default();
    let d = dispatcher(&log);

    let strict = dispatch(&d, "secret", ActionRequest::new(Method::GET, "/"), true);
    let err = strict.only_failure();
    assert!(err.is(ErrorKind::InvalidAction));
    assert_eq!(err.status(), 500);
    assert_eq!(err.blob, Some(json!({"controller": "Pets", "action": "secret"})));

    let lenient = dispatch(&d, "secret", ActionRequest::new(Method::GET, "/"), false);
    assert_eq!(lenient.reports(), vec![None]);
}

#[test]
fn test_direct_action_bypasses_visibility() {
    let log = EventLog::default();
    let d = dispatcher(&log);
    let secret = Arc::clone(d.registry().lookup("secret").unwrap());
    let h = Harness::new();
    d.dispatch(
        ActionRef::Direct(secret),
        ActionRequest::new(Method::GET, "/"),
        h.writer.clone(),
        h.sink.clone(),
        true,
    );
    assert_eq!(h.out.body_json().unwrap(), json!({"s": 1}));
}

#[test]
fn test_dispatch_default_uses_configured_strictness() {
    let log = EventLog::default();
    let d = dispatcher(&log).with_config(RuntimeConfig {
        strict_not_found: true,
        ..RuntimeConfig::default()
    });
    let h = Harness::new();
    d.dispatch_default("nope", ActionRequest::new(Method::GET, "/"), h.writer.clone(), h.sink.clone());
    assert!(h.only_failure().is(ErrorKind::InvalidAction));
}

#[test]
fn test_panicking_action_reports_server_error() {
    let log = EventLog::default();
    let h = dispatch(&dispatcher(&log), "panic", ActionRequest::new(Method::GET, "/"), true);
    let err = h.only_failure();
    assert!(err.is(ErrorKind::ServerError));
    assert!(err.inner_err.unwrap().message.contains("unexpected state"));
}

#[test]
fn test_custom_injector_through_dispatch() {
    let log = EventLog::default();
    let h = dispatch(
        &dispatcher(&log),
        "tenant",
        ActionRequest::new(Method::GET, "/").with_header("X-Tenant", "acme"),
        true,
    );
    assert_eq!(h.out.body_json().unwrap(), json!({"tenant": "acme"}));
}

#[test]
fn test_lifecycle_ordering() {
    let log = EventLog::default();
    let d = dispatcher(&log)
        .with_hook(RecordingHook::new("first", &log))
        .with_hook(RecordingHook::new("second", &log));
    let h = dispatch(
        &d,
        "create",
        ActionRequest::new(Method::POST, "/pets").with_body(json!({})),
        true,
    );
    assert!(h.reports().is_empty());
    assert_eq!(
        log.events(),
        vec![
            "controller.before",
            "first.before",
            "second.before",
            "action",
            "controller.after",
            "first.after",
            "second.after",
        ]
    );
}

#[test]
fn test_controller_before_failure_skips_action() {
    let log = EventLog::default();
    let pets = Pets {
        log: log.clone(),
        fail_before: Some(ErrorObject::not_auth("Sign in first")),
    };
    let d = ActionDispatcher::new(pets, registry(&log)).with_hook(RecordingHook::new("hook", &log));
    let h = dispatch(&d, "create", ActionRequest::new(Method::POST, "/pets"), true);
    assert!(h.only_failure().is(ErrorKind::NotAuth));
    assert_eq!(log.events(), vec!["controller.before"]);
    assert!(h.out.status().is_none());
}

#[test]
fn test_after_hook_failure_reported_once() {
    let log = EventLog::default();
    let d = dispatcher(&log)
        .with_hook(RecordingHook::new("a", &log).failing_after(ErrorObject::bad_gateway("audit down")))
        .with_hook(RecordingHook::new("b", &log).failing_after(ErrorObject::client_error("second")));
    let h = dispatch(
        &d,
        "create",
        ActionRequest::new(Method::POST, "/pets").with_body(json!({"x": 1})),
        true,
    );
    // Response already written; only the first after-hook failure is reported.
    assert_eq!(h.out.body_json().unwrap(), json!({"x": 1}));
    let err = h.only_failure();
    assert!(err.is(ErrorKind::BadGateway));
    assert!(log.events().contains(&"b.after".to_string()));
}

#[test]
fn test_validation_failure_is_422_per_provider() {
    let log = EventLog::default();
    let reject = |reason: &'static str| {
        move |_v: Value| -> Result<Value, ValidationFailure> {
            Err(ValidationFailure::new(reason).with_details(vec![json!({"field": "name"})]))
        }
    };
    let body_log = log.clone();
    let registry = ActionRegistry::builder()
        .register(
            ActionDef::new("create", move |_: &Pets, _| {
                body_log.push("action");
                Ok(ActionOutcome::Void)
            })
            .public()
            .validate(ValidationEntry::new("body", reject("name is required")))
            .validate(ValidationEntry::new("query", |v: Value| -> Result<Value, ValidationFailure> { Ok(v) }))
            .validate(ValidationEntry::new("params", reject("id must be numeric"))),
        )
        .build()
        .unwrap();
    let d = ActionDispatcher::new(Pets::new(log.clone()), registry);
    let h = dispatch(&d, "create", ActionRequest::new(Method::POST, "/pets"), true);

    let err = h.only_failure();
    assert!(err.is(ErrorKind::ValidationError));
    assert_eq!(err.status(), 422);
    let blob = err.blob.unwrap();
    let entries = blob.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["provider"], "body");
    assert_eq!(entries[0]["message"], "name is required");
    assert_eq!(entries[0]["details"], json!([{"field": "name"}]));
    assert_eq!(entries[1]["provider"], "params");
    assert!(log.events().is_empty());
}

#[test]
fn test_throwing_validator_is_validation_error() {
    let log = EventLog::default();
    let registry = ActionRegistry::builder()
        .register(
            ActionDef::new("create", |_: &Pets, _| Ok(ActionOutcome::Void))
                .public()
                .validate(ValidationEntry::new(
                    "body",
                    |_v: Value| -> Result<Value, ValidationFailure> { panic!("schema compiler bug") },
                )),
        )
        .build()
        .unwrap();
    let d = ActionDispatcher::new(Pets::new(log), registry);
    let h = dispatch(&d, "create", ActionRequest::new(Method::POST, "/pets"), true);
    let err = h.only_failure();
    assert!(err.is(ErrorKind::ValidationError));
    assert_eq!(err.status(), 422);
}

#[test]
fn test_validated_query_is_coerced_before_injection() {
    let log = EventLog::default();
    let schema = JsonSchema::compile(json!({
        "type": "object",
        "properties": {"limit": {"type": "integer"}, "tag": {"type": "string"}}
    }))
    .unwrap();
    let registry = ActionRegistry::builder()
        .register(
            ActionDef::new("list", |_: &Pets, args: Args| {
                Ok(args.value(0).cloned().unwrap_or_default().into())
            })
            .public()
            .inject(["$query"])
            .validate(ValidationEntry::new("query", schema)),
        )
        .build()
        .unwrap();
    let d = ActionDispatcher::new(Pets::new(log), registry);
    let h = dispatch(&d, "list", ActionRequest::new(Method::GET, "/pets?limit=10&tag=dog"), true);
    assert_eq!(h.out.body_json().unwrap(), json!({"limit": 10, "tag": "dog"}));
}

#[test]
fn test_validation_context_visible_to_hooks() {
    struct AssertValidated;
    impl ActionHook for AssertValidated {
        fn before(&self, cx: &mut RequestContext, _req: &ActionRequest) -> Result<(), ErrorObject> {
            let validated = cx.validation().map(|v| v.is_valid()).unwrap_or(false);
            cx.set_local("validated", json!(validated));
            Ok(())
        }
    }

    let registry = ActionRegistry::builder()
        .register(
            ActionDef::new("check", |_: &Pets, args: Args| {
                let cx = args.context(0).unwrap();
                ActionOutcome::json(&json!({
                    "validated": cx.local("validated"),
                    "mutating": cx.is_mutating(),
                    "has_body": cx.has_body(),
                }))
            })
            .public()
            .inject(["$context"]),
        )
        .build()
        .unwrap();
    let d = ActionDispatcher::new(Pets::new(EventLog::default()), registry).with_hook(AssertValidated);
    let h = dispatch(
        &d,
        "check",
        ActionRequest::new(Method::PATCH, "/pets/1").with_body(json!({"a": 1})),
        true,
    );
    assert_eq!(
        h.out.body_json().unwrap(),
        json!({"validated": true, "mutating": true, "has_body": true})
    );
}

#[test]
fn test_deferred_result_is_written() {
    common::setup_may_runtime();
    let registry = ActionRegistry::builder()
        .register(
            ActionDef::new("slow", |_: &Pets, _| {
                Ok(ActionOutcome::deferred(|| {
                    may::coroutine::sleep(std::time::Duration::from_millis(5));
                    Ok(Some(Payload::Json(json!({"done": true}))))
                }))
            })
            .public(),
        )
        .build()
        .unwrap();
    let d = ActionDispatcher::new(Pets::new(EventLog::default()), registry);
    let h = dispatch(&d, "slow", ActionRequest::new(Method::GET, "/"), true);
    assert_eq!(h.out.body_json().unwrap(), json!({"done": true}));
    assert!(h.reports().is_empty());
}

#[test]
fn test_deferred_rejection_skips_write_and_after_hooks() {
    common::setup_may_runtime();
    let log = EventLog::default();
    let registry = ActionRegistry::builder()
        .register(
            ActionDef::new("slow", |_: &Pets, _| {
                Ok(ActionOutcome::deferred(|| Err(anyhow!("upstream timed out"))))
            })
            .public(),
        )
        .build()
        .unwrap();
    let d = ActionDispatcher::new(Pets::new(log.clone()), registry)
        .with_hook(RecordingHook::new("hook", &log));
    let h = dispatch(&d, "slow", ActionRequest::new(Method::GET, "/"), true);

    let err = h.only_failure();
    assert!(err.is(ErrorKind::ServerError));
    assert_eq!(err.inner_err.unwrap().message, "upstream timed out");
    assert!(h.out.status().is_none());
    assert_eq!(log.events(), vec!["controller.before", "hook.before"]);
}

#[test]
fn test_manually_resolved_deferred() {
    common::setup_may_runtime();
    let registry = ActionRegistry::builder()
        .register(
            ActionDef::new("later", |_: &Pets, _| {
                let (resolver, deferred) = Deferred::channel();
                may::go!(move || resolver.resolve(Some(Payload::Bytes(b"ok".to_vec()))));
                Ok(ActionOutcome::Pending(deferred))
            })
            .public(),
        )
        .build()
        .unwrap();
    let d = ActionDispatcher::new(Pets::new(EventLog::default()), registry);
    let h = dispatch(&d, "later", ActionRequest::new(Method::GET, "/"), true);
    assert_eq!(h.out.body(), b"ok".to_vec());
}

#[test]
fn test_action_reporting_through_next_stops_pipeline() {
    let log = EventLog::default();
    let registry = ActionRegistry::builder()
        .register(
            ActionDef::new("guarded", |_: &Pets, args: Args| {
                args.next(0).unwrap().fail(ErrorObject::not_found("No such pet"));
                ActionOutcome::json(&json!({"ignored": true}))
            })
            .public()
            .inject(["$next"]),
        )
        .build()
        .unwrap();
    let d = ActionDispatcher::new(Pets::new(log.clone()), registry)
        .with_hook(RecordingHook::new("hook", &log));
    let h = dispatch(&d, "guarded", ActionRequest::new(Method::GET, "/pets/9"), true);

    assert!(h.only_failure().is(ErrorKind::NotFound));
    assert!(h.out.status().is_none());
    assert!(!log.events().contains(&"hook.after".to_string()));
}

#[test]
fn test_action_writing_through_resp() {
    let registry = ActionRegistry::builder()
        .register(
            ActionDef::new("stream", |_: &Pets, args: Args| {
                let resp = args.response(0).unwrap();
                resp.write(WriteRequest::new(Payload::Bytes(b"part1,".to_vec())).with_status(206))?;
                resp.write(WriteRequest::new(Payload::Bytes(b"part2".to_vec())))?;
                resp.end();
                Ok(ActionOutcome::Void)
            })
            .public()
            .inject(["$resp"]),
        )
        .build()
        .unwrap();
    let d = ActionDispatcher::new(Pets::new(EventLog::default()), registry);
    let h = dispatch(&d, "stream", ActionRequest::new(Method::GET, "/"), true);
    assert_eq!(h.out.status(), Some(206));
    assert_eq!(h.out.body(), b"part1,part2".to_vec());
    assert_eq!(h.out.finish_count(), 1);
    assert!(h.reports().is_empty());
}

#[test]
fn test_write_failure_reported_through_sink() {
    let registry = ActionRegistry::builder()
        .register(
            ActionDef::new("late", |_: &Pets, args: Args| {
                args.response(0).unwrap().end();
                ActionOutcome::json(&json!({"too": "late"}))
            })
            .public()
            .inject(["$resp"]),
        )
        .build()
        .unwrap();
    let d = ActionDispatcher::new(Pets::new(EventLog::default()), registry);
    let h = dispatch(&d, "late", ActionRequest::new(Method::GET, "/"), true);
    assert!(h.only_failure().is(ErrorKind::ResponseClosed));
    assert!(h.out.body().is_empty());
}

/// Sink that accepts the head but drops the connection on the body.
#[derive(Clone, Default)]
struct ResetSink {
    finished: Arc<AtomicUsize>,
}

impl ResponseSink for ResetSink {
    fn set_status(&mut self, _status: u16) {}
    fn set_header(&mut self, _name: &str, _value: &str) {}
    fn write_chunk(&mut self, _chunk: &[u8]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"))
    }
    fn finish(&mut self) -> io::Result<()> {
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_failed_body_write_still_finishes_sink() {
    let log = EventLog::default();
    let d = dispatcher(&log);
    let sink = ResetSink::default();
    let writer = ResponseWriter::new(sink.clone());
    let (failure, rx) = FailureSink::channel();
    d.dispatch(
        "create",
        ActionRequest::new(Method::POST, "/pets").with_body(json!({"name": "rex"})),
        writer.clone(),
        failure,
        true,
    );
    let err = rx.recv().unwrap().unwrap();
    assert!(err.is(ErrorKind::ServerError));
    assert_eq!(err.inner_err.unwrap().message, "peer reset");
    assert!(writer.is_finished());
    assert_eq!(sink.finished.load(Ordering::SeqCst), 1);
}

#[test]
fn test_responding_sink_writes_single_error_body() {
    let log = EventLog::default();
    let d = dispatcher(&log);
    let out = BufferedResponse::new();
    let writer = ResponseWriter::new(out.clone());
    d.dispatch(
        "explode",
        ActionRequest::new(Method::GET, "/"),
        writer.clone(),
        FailureSink::responding(writer),
        true,
    );
    assert_eq!(out.status(), Some(500));
    let body = out.body_json().unwrap();
    assert_eq!(body["code"], "server_error");
    assert_eq!(body["innerErr"]["message"], "database unavailable");
    assert_eq!(out.finish_count(), 1);
}

#[test]
fn test_spawned_dispatch_completes_on_coroutine() {
    common::setup_may_runtime();
    let log = EventLog::default();
    let d = dispatcher(&log);
    let h = Harness::new();
    let handle = d.spawn(
        "create",
        ActionRequest::new(Method::POST, "/pets").with_body(json!({"id": 3})),
        h.writer.clone(),
        h.sink.clone(),
    );
    handle.join().unwrap();
    assert_eq!(h.out.body_json().unwrap(), json!({"id": 3}));
}

#[test]
fn test_concurrent_dispatches_are_isolated() {
    common::setup_may_runtime();
    let log = EventLog::default();
    let d = dispatcher(&log);
    let harnesses: Vec<(usize, Harness)> = (0..32).map(|i| (i, Harness::new())).collect();
    let handles: Vec<_> = harnesses
        .iter()
        .map(|(i, h)| {
            d.spawn(
                "create",
                ActionRequest::new(Method::POST, "/pets").with_body(json!({ "n": i })),
                h.writer.clone(),
                h.sink.clone(),
            )
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    for (i, h) in &harnesses {
        assert_eq!(h.out.body_json().unwrap(), json!({ "n": i }));
    }
}
