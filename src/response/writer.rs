use super::sink::ResponseSink;
use crate::error::{ErrorKind, ErrorObject};
use crate::ids::RequestId;
use serde::Serialize;
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, warn};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";

/// A value ready to go on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// JSON-encoded on write
    Json(Value),
    /// Written verbatim as `application/octet-stream`
    Bytes(Vec<u8>),
}

impl Payload {
    /// Serialize any value into a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns a `server_error` if the value cannot be represented as JSON.
    pub fn json<T: Serialize + ?Sized>(data: &T) -> Result<Self, ErrorObject> {
        serde_json::to_value(data)
            .map(Payload::Json)
            .map_err(|e| serialization_error(&e))
    }

    #[must_use]
    pub fn content_type(&self) -> &'static str {
        match self {
            Payload::Json(_) => CONTENT_TYPE_JSON,
            Payload::Bytes(_) => CONTENT_TYPE_OCTET_STREAM,
        }
    }

    fn encode(&self) -> Result<Cow<'_, [u8]>, ErrorObject> {
        match self {
            Payload::Json(value) => serde_json::to_vec(value)
                .map(Cow::Owned)
                .map_err(|e| serialization_error(&e)),
            Payload::Bytes(bytes) => Ok(Cow::Borrowed(bytes.as_slice())),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

fn serialization_error(e: &serde_json::Error) -> ErrorObject {
    ErrorObject::server_error("Failed to serialize response").with_inner(ErrorObject::from_native(e))
}

/// Arguments to [`ResponseWriter::write`].
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub data: Payload,
    pub headers: Vec<(String, String)>,
    /// Defaults to 200
    pub status: Option<u16>,
}

impl WriteRequest {
    pub fn new(data: impl Into<Payload>) -> Self {
        Self {
            data: data.into(),
            headers: Vec::new(),
            status: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }
}

struct WriterState {
    sink: Box<dyn ResponseSink>,
    head_sent: bool,
}

struct Shared {
    state: Mutex<WriterState>,
    closed: AtomicBool,
    finished: AtomicBool,
    pending: AtomicUsize,
    request_id: Option<RequestId>,
}

/// Serializes results onto a [`ResponseSink`] and guards it after close.
///
/// Clones share state; an action can hold one (`$resp`) while the dispatcher
/// holds another. Once [`end`](Self::end) is called no further writes are
/// accepted, and the sink is only finished after every in-flight write has
/// returned.
#[derive(Clone)]
pub struct ResponseWriter {
    shared: Arc<Shared>,
}

/// Counts one in-flight write; settles the writer when dropped.
struct InFlight<'a> {
    writer: &'a ResponseWriter,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.writer.shared.pending.fetch_sub(1, Ordering::SeqCst);
        self.writer.settle();
    }
}

impl ResponseWriter {
    pub fn new(sink: impl ResponseSink + 'static) -> Self {
        Self::build(Box::new(sink), None)
    }

    /// Writer whose log lines carry the request id.
    pub fn for_request(sink: impl ResponseSink + 'static, request_id: RequestId) -> Self {
        Self::build(Box::new(sink), Some(request_id))
    }

    fn build(sink: Box<dyn ResponseSink>, request_id: Option<RequestId>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(WriterState {
                    sink,
                    head_sent: false,
                }),
                closed: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                pending: AtomicUsize::new(0),
                request_id,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, WriterState> {
        match self.shared.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn request_id(&self) -> String {
        self.shared
            .request_id
            .map(|id| id.to_string())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Whether the sink has been told the stream is complete.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Whether status and headers have already gone out.
    #[must_use]
    pub fn head_sent(&self) -> bool {
        self.lock_state().head_sent
    }

    fn begin_write(&self) -> Result<InFlight<'_>, ErrorObject> {
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        let in_flight = InFlight { writer: self };
        if self.is_closed() {
            warn!(request_id = %self.request_id(), "Write rejected: response already closed");
            return Err(ErrorObject::from_kind(ErrorKind::ResponseClosed));
        }
        Ok(in_flight)
    }

    /// Write one chunk, sending status and headers first if not yet sent.
    ///
    /// # Errors
    ///
    /// * `response_closed` if [`end`](Self::end) was already called
    /// * `server_error` if serialization fails (nothing is written) or the
    ///   sink rejects the chunk
    pub fn write(&self, req: WriteRequest) -> Result<(), ErrorObject> {
        let _in_flight = self.begin_write()?;
        let bytes = req.data.encode()?;

        let mut state = self.lock_state();
        if !state.sink.is_connected() {
            self.shared.closed.store(true, Ordering::SeqCst);
            warn!(request_id = %self.request_id(), "Write abandoned: connection closed");
            return Err(ErrorObject::server_error("Connection closed before response was written"));
        }
        if !state.head_sent {
            state.sink.set_status(req.status.unwrap_or(200));
            let mut has_content_type = false;
            for (name, value) in &req.headers {
                has_content_type |= name.eq_ignore_ascii_case("content-type");
                state.sink.set_header(name, value);
            }
            if !has_content_type {
                state.sink.set_header("Content-Type", req.data.content_type());
            }
            state.head_sent = true;
        }
        state.sink.write_chunk(&bytes).map_err(|e| {
            error!(request_id = %self.request_id(), error = %e, "Response write failed");
            ErrorObject::server_error("Failed to write response").with_inner(ErrorObject::from_native(&e))
        })?;
        debug!(
            request_id = %self.request_id(),
            size_bytes = bytes.len(),
            "Response chunk written"
        );
        Ok(())
    }

    /// Write `data` as JSON and end the response.
    ///
    /// # Errors
    ///
    /// Same as [`write`](Self::write); the response stays open on failure so
    /// an error can still be reported.
    pub fn json<T: Serialize + ?Sized>(&self, data: &T, status: Option<u16>) -> Result<(), ErrorObject> {
        let mut req = WriteRequest::new(Payload::json(data)?);
        req.status = status;
        self.write(req)?;
        self.end();
        Ok(())
    }

    /// Write an error envelope with its own status and close.
    ///
    /// Never fails: problems writing the error are logged, not re-reported,
    /// so a broken connection cannot start a failure loop.
    pub fn error(&self, err: impl Into<ErrorObject>) {
        let err = err.into();
        if self.is_closed() {
            error!(
                request_id = %self.request_id(),
                error = %err,
                "Cannot report error: response already closed"
            );
            return;
        }
        if self.head_sent() {
            error!(
                request_id = %self.request_id(),
                error = %err,
                "Cannot report error: headers already sent, ending response"
            );
            self.end();
            return;
        }
        let status = err.status();
        if let Err(write_err) = self.write(WriteRequest::new(err.to_wire()).with_status(status)) {
            error!(
                request_id = %self.request_id(),
                error = %err,
                write_error = %write_err,
                "Failed to write error response"
            );
        }
        self.end();
    }

    /// Close the response. Idempotent; the sink is finished once all
    /// in-flight writes have settled.
    pub fn end(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            debug!(request_id = %self.request_id(), "end() called on closed response");
        }
        self.settle();
    }

    fn settle(&self) {
        if !self.is_closed() || self.pending_writes() != 0 {
            return;
        }
        if self
            .shared
            .finished
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let mut state = self.lock_state();
        if let Err(e) = state.sink.finish() {
            error!(request_id = %self.request_id(), error = %e, "Failed to finish response stream");
        }
    }
}

impl fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("closed", &self.is_closed())
            .field("finished", &self.is_finished())
            .field("pending", &self.pending_writes())
            .finish()
    }
}
