use std::io;
use std::sync::{Arc, Mutex};

/// Capability set the dispatcher needs from the transport's response object.
///
/// The transport owns the connection; this crate only sets the head, pushes
/// byte chunks and signals completion.
pub trait ResponseSink: Send {
    fn set_status(&mut self, status: u16);
    fn set_header(&mut self, name: &str, value: &str);
    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;
    /// Signal end of stream. Called exactly once per response.
    fn finish(&mut self) -> io::Result<()>;
    /// False once the peer has gone away; writes are abandoned.
    fn is_connected(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct Captured {
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    finish_count: usize,
    disconnected: bool,
}

/// In-memory sink for buffered transports (and tests).
///
/// Clones share the same buffer, so one handle can be given to the
/// [`ResponseWriter`](super::ResponseWriter) while another inspects the result.
#[derive(Debug, Clone, Default)]
pub struct BufferedResponse {
    inner: Arc<Mutex<Captured>>,
}

impl BufferedResponse {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Captured) -> R) -> R {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.with(|c| c.status)
    }

    /// Last value set for a header (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.with(|c| {
            c.headers
                .iter()
                .rfind(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        })
    }

    #[must_use]
    pub fn body(&self) -> Vec<u8> {
        self.with(|c| c.body.clone())
    }

    /// Body parsed as JSON, `None` if it is not valid JSON.
    #[must_use]
    pub fn body_json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body()).ok()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.with(|c| c.finish_count > 0)
    }

    /// How many times `finish` was called; more than one is a bug.
    #[must_use]
    pub fn finish_count(&self) -> usize {
        self.with(|c| c.finish_count)
    }

    /// Simulate the client hanging up.
    pub fn disconnect(&self) {
        self.with(|c| c.disconnected = true);
    }

    /// Assemble the captured response as an `http::Response`.
    ///
    /// # Errors
    ///
    /// Fails if a captured header name or value is not valid HTTP.
    pub fn into_http(&self) -> Result<http::Response<Vec<u8>>, http::Error> {
        self.with(|c| {
            let mut builder = http::Response::builder().status(c.status.unwrap_or(200));
            for (k, v) in &c.headers {
                builder = builder.header(k.as_str(), v.as_str());
            }
            builder.body(c.body.clone())
        })
    }
}

impl ResponseSink for BufferedResponse {
    fn set_status(&mut self, status: u16) {
        self.with(|c| c.status = Some(status));
    }

    fn set_header(&mut self, name: &str, value: &str) {
        self.with(|c| {
            c.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
            c.headers.push((name.to_string(), value.to_string()));
        });
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.with(|c| {
            if c.disconnected {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"));
            }
            c.body.extend_from_slice(chunk);
            Ok(())
        })
    }

    fn finish(&mut self) -> io::Result<()> {
        self.with(|c| c.finish_count += 1);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.with(|c| !c.disconnected)
    }
}
