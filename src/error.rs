//! # Error Module
//!
//! Structured error envelope shared by every stage of the action pipeline.
//!
//! ## Overview
//!
//! Every failure that leaves the dispatcher is an [`ErrorObject`]. Its wire shape is:
//!
//! ```text
//! { "message": "...", "code": "validation_error", "status": 422,
//!   "blob": <diagnostics>, "innerErr": { "message": "...", "stack": "..." } }
//! ```
//!
//! Business logic never has to build these by hand. Actions return
//! `anyhow::Result`, and anything that is not already an `ErrorObject` is
//! wrapped as a `server_error` whose `innerErr` chain mirrors the native
//! error's `source()` chain.
//!
//! ## Taxonomy
//!
//! | Kind | Code | Status |
//! |------|------|--------|
//! | [`ErrorKind::NotFound`] | `not_found` | 404 |
//! | [`ErrorKind::ServerError`] | `server_error` | 500 |
//! | [`ErrorKind::ClientError`] | `client_error` | 400 |
//! | [`ErrorKind::ValidationError`] | `validation_error` | 422 |
//! | [`ErrorKind::NotAuth`] | `not_auth` | 401 |
//! | [`ErrorKind::Forbidden`] | `forbidden` | 403 |
//! | [`ErrorKind::NotImplemented`] | `not_implemented` | 500 |
//! | [`ErrorKind::BadGateway`] | `bad_gateway` | 502 |
//! | [`ErrorKind::InvalidAction`] | `invalid_action` | 500 |
//! | [`ErrorKind::ResponseClosed`] | `response_closed` | 500 |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::backtrace::BacktraceStatus;
use std::fmt;

/// Status used whenever an error does not carry one.
pub const DEFAULT_ERROR_STATUS: u16 = 500;

/// Well-known error classes produced by the dispatch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    ServerError,
    ClientError,
    ValidationError,
    NotAuth,
    Forbidden,
    NotImplemented,
    BadGateway,
    InvalidAction,
    /// A write was attempted on a response that had already been ended.
    ResponseClosed,
}

impl ErrorKind {
    /// Machine-readable code placed in the `code` field.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::ServerError => "server_error",
            ErrorKind::ClientError => "client_error",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::NotAuth => "not_auth",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotImplemented => "not_implemented",
            ErrorKind::BadGateway => "bad_gateway",
            ErrorKind::InvalidAction => "invalid_action",
            ErrorKind::ResponseClosed => "response_closed",
        }
    }

    /// HTTP status associated with the kind.
    #[must_use]
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::ClientError => 400,
            ErrorKind::ValidationError => 422,
            ErrorKind::NotAuth => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::BadGateway => 502,
            ErrorKind::ServerError
            | ErrorKind::NotImplemented
            | ErrorKind::InvalidAction
            | ErrorKind::ResponseClosed => 500,
        }
    }

    fn default_message(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "Not Found",
            ErrorKind::ServerError => "Internal Server Error",
            ErrorKind::ClientError => "Bad Request",
            ErrorKind::ValidationError => "Validation Failed",
            ErrorKind::NotAuth => "Unauthorized",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::NotImplemented => "Not Implemented",
            ErrorKind::BadGateway => "Bad Gateway",
            ErrorKind::InvalidAction => "Invalid Action",
            ErrorKind::ResponseClosed => "Response Already Closed",
        }
    }
}

/// The `code` field: either a string slug or a numeric code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Text(String),
    Number(i64),
}

impl From<&str> for ErrorCode {
    fn from(s: &str) -> Self {
        ErrorCode::Text(s.to_string())
    }
}

impl From<i64> for ErrorCode {
    fn from(n: i64) -> Self {
        ErrorCode::Number(n)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Text(s) => f.write_str(s),
            ErrorCode::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Serializable error envelope written to clients and passed to failure sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Arbitrary diagnostic payload (validation details, offending action, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<Value>,
    #[serde(
        rename = "innerErr",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub inner_err: Option<Box<ErrorObject>>,
    /// Captured backtrace of a wrapped native error, when one was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorObject {
    /// Bare error carrying only a message. Status falls back to 500.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            status: None,
            blob: None,
            inner_err: None,
            stack: None,
        }
    }

    /// Error of a given kind with an explicit message.
    pub fn of(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(ErrorCode::Text(kind.code().to_string())),
            status: Some(kind.status()),
            blob: None,
            inner_err: None,
            stack: None,
        }
    }

    /// Error of a given kind using its standard reason phrase.
    #[must_use]
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self::of(kind, kind.default_message())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::of(ErrorKind::NotFound, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::of(ErrorKind::ServerError, message)
    }

    pub fn client_error(message: impl Into<String>) -> Self {
        Self::of(ErrorKind::ClientError, message)
    }

    pub fn not_auth(message: impl Into<String>) -> Self {
        Self::of(ErrorKind::NotAuth, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::of(ErrorKind::Forbidden, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::of(ErrorKind::NotImplemented, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::of(ErrorKind::BadGateway, message)
    }

    /// Validation failure carrying the per-provider detail list as its blob.
    pub fn validation_error(message: impl Into<String>, failures: Value) -> Self {
        Self::of(ErrorKind::ValidationError, message).with_blob(failures)
    }

    /// Dispatch-internal error for an action that could not be resolved.
    #[must_use]
    pub fn invalid_action(controller: &str, action: &str) -> Self {
        Self::of(
            ErrorKind::InvalidAction,
            format!("Invalid action '{action}' requested on controller '{controller}'"),
        )
        .with_blob(serde_json::json!({
            "controller": controller,
            "action": action,
        }))
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<ErrorCode>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_blob(mut self, blob: Value) -> Self {
        self.blob = Some(blob);
        self
    }

    #[must_use]
    pub fn with_inner(mut self, inner: ErrorObject) -> Self {
        self.inner_err = Some(Box::new(inner));
        self
    }

    /// Effective HTTP status (500 when unset).
    #[inline]
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status.unwrap_or(DEFAULT_ERROR_STATUS)
    }

    /// Whether the `code` field names the given kind.
    #[must_use]
    pub fn is(&self, kind: ErrorKind) -> bool {
        matches!(&self.code, Some(ErrorCode::Text(c)) if c == kind.code())
    }

    /// Convert a native error and its `source()` chain into nested envelopes.
    ///
    /// The result has the bare `{message, innerErr?}` shape: no code or status.
    #[must_use]
    pub fn from_native(err: &(dyn std::error::Error + 'static)) -> Self {
        if let Some(structured) = err.downcast_ref::<ErrorObject>() {
            return structured.clone();
        }
        let mut obj = ErrorObject::new(err.to_string());
        if let Some(source) = err.source() {
            obj.inner_err = Some(Box::new(ErrorObject::from_native(source)));
        }
        obj
    }

    /// Apply the "server error, wrap as cause" rule to an arbitrary error.
    ///
    /// Structured errors found anywhere at the top of the value are returned
    /// as-is; everything else becomes a `server_error` whose `innerErr` is the
    /// native chain.
    #[must_use]
    pub fn wrap_server_error(err: anyhow::Error) -> Self {
        match err.downcast::<ErrorObject>() {
            Ok(structured) => structured,
            Err(err) => {
                let mut cause = ErrorObject::new(err.to_string());
                let backtrace = err.backtrace();
                if backtrace.status() == BacktraceStatus::Captured {
                    cause.stack = Some(backtrace.to_string());
                }
                if let Some(source) = err.source() {
                    cause.inner_err = Some(Box::new(ErrorObject::from_native(source)));
                }
                ErrorObject::from_kind(ErrorKind::ServerError).with_inner(cause)
            }
        }
    }

    /// Copy with `status` filled in, as written to the wire.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        let mut wire = self.clone();
        wire.status = Some(self.status());
        serde_json::to_value(&wire).unwrap_or_else(|_| {
            serde_json::json!({ "message": self.message, "status": self.status() })
        })
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}: {}", self.status(), code, self.message),
            None => write!(f, "[{}] {}", self.status(), self.message),
        }
    }
}

impl std::error::Error for ErrorObject {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner_err
            .as_deref()
            .map(|inner| inner as &(dyn std::error::Error + 'static))
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

impl From<anyhow::Error> for ErrorObject {
    fn from(err: anyhow::Error) -> Self {
        ErrorObject::wrap_server_error(err)
    }
}

impl From<ErrorKind> for ErrorObject {
    fn from(kind: ErrorKind) -> Self {
        ErrorObject::from_kind(kind)
    }
}
