//! # Response Module
//!
//! Writing action results back to the client.
//!
//! - **[`ResponseSink`]** - the capability set required from the transport's
//!   response object (status, headers, byte chunks, completion)
//! - **[`ResponseWriter`]** - serializes [`Payload`]s onto a sink, tracks the
//!   closed flag and in-flight writes, and writes error envelopes
//! - **[`BufferedResponse`]** - in-memory sink for buffered transports such as
//!   `may_minihttp`, convertible into an `http::Response`
//!
//! ## Write Rules
//!
//! | Payload | Content-Type | Body |
//! |---------|--------------|------|
//! | `Payload::Json` | `application/json` | `serde_json` encoding |
//! | `Payload::Bytes` | `application/octet-stream` | raw bytes |
//!
//! Status defaults to 200. Status and headers are sent with the first chunk
//! and cannot change afterwards.
//!
//! ## Close Semantics
//!
//! `end()` marks the writer closed immediately but only calls
//! [`ResponseSink::finish`] after every in-flight write has returned, so a
//! writer shared with a background coroutine never truncates output.
//! Writes after `end()` return a `response_closed` error; they are never
//! silently dropped.

mod sink;
mod writer;

pub use sink::{BufferedResponse, ResponseSink};
pub use writer::{
    Payload, ResponseWriter, WriteRequest, CONTENT_TYPE_JSON, CONTENT_TYPE_OCTET_STREAM,
};
