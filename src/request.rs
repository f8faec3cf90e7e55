//! Inbound request view consumed by the dispatcher.
//!
//! The transport layer owns parsing; by the time a request reaches an action
//! it has a method, a URL, headers, and the `params`/`body` fields populated
//! by upstream routing and body-parsing middleware. Validation may replace any
//! provider field with its normalized value, so downstream consumers always
//! read coerced data through [`ActionRequest::provider`].

use crate::ids::{RequestId, REQUEST_ID_HEADER};
use http::Method;
use serde_json::{Map, Value};
use smallvec::SmallVec;
use std::sync::Arc;

/// Most requests have ≤16 headers
pub const MAX_INLINE_HEADERS: usize = 16;

/// Header storage for the hot path (name, value), names lowercased.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Provider names that map onto first-class request fields.
pub const PROVIDER_BODY: &str = "body";
pub const PROVIDER_QUERY: &str = "query";
pub const PROVIDER_PARAMS: &str = "params";
pub const PROVIDER_HEADERS: &str = "headers";

/// Request data handed to a dispatch cycle.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    /// Correlation id (from `x-request-id` when valid)
    pub request_id: RequestId,
    pub method: Method,
    /// Request target including query string, e.g. `/pets?limit=10`
    pub url: String,
    pub headers: HeaderVec,
    /// Route parameters populated by the router
    pub params: Value,
    /// Parsed body, `None` when the request had none
    pub body: Option<Value>,
    /// Normalized query, set once validation has coerced it
    query: Option<Value>,
    /// Custom providers and overrides for `headers`
    fields: Map<String, Value>,
}

impl ActionRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            request_id: RequestId::new(),
            method,
            url: url.into(),
            headers: HeaderVec::new(),
            params: Value::Object(Map::new()),
            body: None,
            query: None,
            fields: Map::new(),
        }
    }

    /// Add a header; picks up `x-request-id` for correlation.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        let name = name.to_ascii_lowercase();
        let value = value.into();
        if name == REQUEST_ID_HEADER {
            self.request_id = RequestId::from_header_or_new(Some(&value));
        }
        self.headers.push((Arc::from(name), value));
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Attach an arbitrary named provider (e.g. `session`, `user`).
    #[must_use]
    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    /// Path portion of the URL.
    #[must_use]
    pub fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or("/")
    }

    /// Raw query string (without `?`), empty when absent.
    #[must_use]
    pub fn query_string(&self) -> &str {
        self.url.split_once('?').map(|(_, q)| q).unwrap_or("")
    }

    /// Get a header by name (case-insensitive per RFC 7230)
    ///
    /// String values written back by validation take precedence over the raw
    /// headers. Coerced non-string values are only visible through
    /// [`headers_value`](Self::headers_value).
    #[inline]
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        let normalized = match self.fields.get(PROVIDER_HEADERS) {
            Some(Value::Object(map)) => map
                .iter()
                .rfind(|(k, _)| k.eq_ignore_ascii_case(name))
                .and_then(|(_, v)| v.as_str()),
            _ => None,
        };
        normalized.or_else(|| {
            self.headers
                .iter()
                .rfind(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        })
    }

    /// Query parameters as a JSON object of strings.
    ///
    /// Returns the normalized value once validation has replaced it.
    /// Parsing allocates; the parameter resolver memoizes it per dispatch.
    #[must_use]
    pub fn query(&self) -> Value {
        match &self.query {
            Some(v) => v.clone(),
            None => parse_query_params(self.query_string()),
        }
    }

    /// Headers as a JSON object (last write wins on duplicates).
    #[must_use]
    pub fn headers_value(&self) -> Value {
        if let Some(v) = self.fields.get(PROVIDER_HEADERS) {
            return v.clone();
        }
        let map: Map<String, Value> = self
            .headers
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.clone())))
            .collect();
        Value::Object(map)
    }

    /// Read a provider field by name, i.e. `request[name]`.
    #[must_use]
    pub fn provider(&self, name: &str) -> Option<Value> {
        match name {
            PROVIDER_BODY => self.body.clone(),
            PROVIDER_QUERY => Some(self.query()),
            PROVIDER_PARAMS => Some(self.params.clone()),
            PROVIDER_HEADERS => Some(self.headers_value()),
            other => self.fields.get(other).cloned(),
        }
    }

    /// Replace a provider field, used to write validated values back.
    pub fn set_provider(&mut self, name: &str, value: Value) {
        match name {
            PROVIDER_BODY => self.body = Some(value),
            PROVIDER_QUERY => self.query = Some(value),
            PROVIDER_PARAMS => self.params = value,
            other => {
                self.fields.insert(other.to_string(), value);
            }
        }
    }

    /// Whether a non-null body is present.
    #[must_use]
    pub fn has_body(&self) -> bool {
        !matches!(self.body, None | Some(Value::Null))
    }

    /// Whether the method is expected to change server state.
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        matches!(
            self.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }
}

/// Parse a raw query string into a JSON object of strings.
///
/// Names and values are URL-decoded; repeated names keep the last value.
#[must_use]
pub fn parse_query_params(query: &str) -> Value {
    let map: Map<String, Value> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
        .collect();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_query_params() {
        let q = parse_query_params("x=1&y=hello%20world&x=2");
        assert_eq!(q, json!({"x": "2", "y": "hello world"}));
    }

    #[test]
    fn test_query_comes_from_url() {
        let req = ActionRequest::new(Method::GET, "/pets?limit=10");
        assert_eq!(req.path(), "/pets");
        assert_eq!(req.query(), json!({"limit": "10"}));
    }

    #[test]
    fn test_set_provider_overrides_query() {
        let mut req = ActionRequest::new(Method::GET, "/pets?limit=10");
        req.set_provider("query", json!({"limit": 10}));
        assert_eq!(req.provider("query"), Some(json!({"limit": 10})));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = ActionRequest::new(Method::GET, "/").with_header("Content-Type", "text/plain");
        assert_eq!(req.header("content-type"), Some("text/plain"));
        assert_eq!(req.headers_value(), json!({"content-type": "text/plain"}));
    }

    #[test]
    fn test_header_prefers_normalized_value() {
        let mut req = ActionRequest::new(Method::GET, "/")
            .with_header("X-Tenant", " Acme ")
            .with_header("X-Retries", "3");
        req.set_provider("headers", json!({"x-tenant": "acme", "x-retries": 3}));
        assert_eq!(req.header("X-Tenant"), Some("acme"));
        assert_eq!(req.header("x-retries"), Some("3"));
        assert_eq!(req.provider("headers"), Some(json!({"x-tenant": "acme", "x-retries": 3})));
    }

    #[test]
    fn test_custom_provider_fields() {
        let mut req = ActionRequest::new(Method::POST, "/").with_field("session", json!({"id": 1}));
        assert_eq!(req.provider("session"), Some(json!({"id": 1})));
        assert_eq!(req.provider("missing"), None);
        req.set_provider("session", json!({"id": 2}));
        assert_eq!(req.provider("session"), Some(json!({"id": 2})));
    }

    #[test]
    fn test_body_and_method_flags() {
        let req = ActionRequest::new(Method::PATCH, "/").with_body(json!({"a": 1}));
        assert!(req.has_body());
        assert!(req.is_mutating());
        let req = ActionRequest::new(Method::GET, "/").with_body(Value::Null);
        assert!(!req.has_body());
        assert!(!req.is_mutating());
    }
}
