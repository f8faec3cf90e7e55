use crate::error::panic_message;
use crate::response::Payload;
use anyhow::anyhow;
use may::sync::mpsc;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::debug;

/// What a settled deferred action produced: a value to write, nothing, or a rejection.
pub type Settled = anyhow::Result<Option<Payload>>;

/// Return type of every action.
pub type ActionResult = anyhow::Result<ActionOutcome>;

/// Value returned by an action invocation.
#[derive(Debug)]
pub enum ActionOutcome {
    /// Nothing to write; the action handled the response itself (or has no body)
    Void,
    /// Written by the dispatcher, then the response is ended
    Value(Payload),
    /// Settles later; the dispatching coroutine parks until it does
    Pending(Deferred),
}

impl ActionOutcome {
    /// Serialize `data` into a JSON outcome.
    ///
    /// # Errors
    ///
    /// Fails with a `server_error` if `data` cannot be represented as JSON.
    pub fn json<T: Serialize + ?Sized>(data: &T) -> ActionResult {
        Ok(ActionOutcome::Value(Payload::json(data)?))
    }

    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        ActionOutcome::Value(Payload::Bytes(bytes.into()))
    }

    /// Run `work` on its own coroutine and settle with its result.
    pub fn deferred<F>(work: F) -> Self
    where
        F: FnOnce() -> Settled + Send + 'static,
    {
        ActionOutcome::Pending(Deferred::spawn(work))
    }
}

impl From<Payload> for ActionOutcome {
    fn from(payload: Payload) -> Self {
        ActionOutcome::Value(payload)
    }
}

impl From<Value> for ActionOutcome {
    fn from(value: Value) -> Self {
        ActionOutcome::Value(Payload::Json(value))
    }
}

impl From<()> for ActionOutcome {
    fn from(_: ()) -> Self {
        ActionOutcome::Void
    }
}

/// Awaitable action result backed by a `may` channel.
///
/// Waiting parks the current coroutine rather than the worker thread.
pub struct Deferred {
    rx: mpsc::Receiver<Settled>,
}

/// Producer half of a [`Deferred`]. Dropping it unsettled rejects the result.
pub struct Resolver {
    tx: mpsc::Sender<Settled>,
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Deferred { .. }")
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Resolver { .. }")
    }
}

impl Deferred {
    /// Manually settled pair, for results produced by another component.
    #[must_use]
    pub fn channel() -> (Resolver, Deferred) {
        let (tx, rx) = mpsc::channel();
        (Resolver { tx }, Deferred { rx })
    }

    /// Spawn `work` on a new coroutine.
    ///
    /// A panic inside `work` settles the result as a rejection.
    pub fn spawn<F>(work: F) -> Self
    where
        F: FnOnce() -> Settled + Send + 'static,
    {
        let (resolver, deferred) = Deferred::channel();
        may::go!(move || {
            let settled = catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|panic| {
                Err(anyhow!(
                    "deferred action panicked: {}",
                    panic_message(panic.as_ref())
                ))
            });
            resolver.settle(settled);
        });
        deferred
    }

    /// Block the current coroutine until the result settles.
    pub fn wait(self) -> Settled {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(anyhow!("deferred action was dropped without settling")))
    }
}

impl Resolver {
    pub fn resolve(self, payload: Option<Payload>) {
        self.settle(Ok(payload));
    }

    pub fn reject(self, err: impl Into<anyhow::Error>) {
        self.settle(Err(err.into()));
    }

    fn settle(self, settled: Settled) {
        if self.tx.send(settled).is_err() {
            debug!("Deferred result discarded: no dispatch waiting");
        }
    }
}
