use crate::error::ErrorObject;
use crate::response::ResponseWriter;
use may::sync::mpsc;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

type SinkFn = dyn Fn(Option<ErrorObject>) + Send + Sync;

/// The single channel through which a dispatch cycle reports how it ended.
///
/// * `call(None)` / [`pass`](Self::pass): not handled here, let the next handler try
/// * `call(Some(err))` / [`fail`](Self::fail): terminate with this failure
///
/// A sink settles at most once. Clones share the settled flag, so the copy an
/// action receives through `$next` and the dispatcher's own copy cannot both
/// report.
#[derive(Clone)]
pub struct FailureSink {
    callback: Arc<SinkFn>,
    settled: Arc<AtomicBool>,
}

impl FailureSink {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Option<ErrorObject>) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
            settled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sink that forwards into a `may` channel, for callers that want to
    /// receive the result on another coroutine.
    #[must_use]
    pub fn channel() -> (Self, mpsc::Receiver<Option<ErrorObject>>) {
        let (tx, rx) = mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        let sink = FailureSink::new(move |err| {
            let delivered = tx.lock().map(|tx| tx.send(err).is_ok()).unwrap_or(false);
            if !delivered {
                debug!("Failure report discarded: receiver dropped");
            }
        });
        (sink, rx)
    }

    /// Terminal sink: failures are written with [`ResponseWriter::error`],
    /// unhandled requests get a 404 `not_found` envelope.
    #[must_use]
    pub fn responding(writer: ResponseWriter) -> Self {
        FailureSink::new(move |err| match err {
            Some(err) => writer.error(err),
            None => writer.error(ErrorObject::not_found("No action handled this request")),
        })
    }

    /// Deliver the result. Returns `false` if the sink had already settled.
    pub fn call(&self, err: Option<ErrorObject>) -> bool {
        if self.settled.swap(true, Ordering::SeqCst) {
            warn!(
                error = ?err.as_ref().map(ToString::to_string),
                "Failure sink already settled; dropping duplicate report"
            );
            return false;
        }
        (self.callback)(err);
        true
    }

    /// Terminate with a failure. Non-structured errors are wrapped as `server_error`.
    pub fn fail(&self, err: impl Into<ErrorObject>) -> bool {
        self.call(Some(err.into()))
    }

    /// Terminate with a native error, wrapped as `server_error` unless it
    /// already carries an [`ErrorObject`].
    pub fn fail_with(&self, err: anyhow::Error) -> bool {
        self.call(Some(ErrorObject::wrap_server_error(err)))
    }

    /// Defer to the next handler.
    pub fn pass(&self) -> bool {
        self.call(None)
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for FailureSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureSink")
            .field("settled", &self.is_settled())
            .finish()
    }
}
