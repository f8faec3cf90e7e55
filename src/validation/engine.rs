use super::schema::{Schema, ValidationFailure};
use crate::error::{panic_message, ErrorObject};
use crate::request::ActionRequest;
use serde_json::{json, Map, Value};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Reads a provider's raw data from the request.
pub type DataAccessor = Arc<dyn Fn(&ActionRequest) -> Option<Value> + Send + Sync>;

/// One declared validation: which provider, where its data comes from, and
/// the schema it must satisfy.
#[derive(Clone)]
pub struct ValidationEntry {
    provider: Arc<str>,
    accessor: Option<DataAccessor>,
    schema: Arc<dyn Schema>,
}

impl ValidationEntry {
    /// Validate `request[provider]` against `schema`.
    pub fn new(provider: &str, schema: impl Schema + 'static) -> Self {
        Self {
            provider: Arc::from(provider),
            accessor: None,
            schema: Arc::new(schema),
        }
    }

    /// Read the provider's data with a custom accessor instead of `request[provider]`.
    #[must_use]
    pub fn with_accessor<F>(mut self, accessor: F) -> Self
    where
        F: Fn(&ActionRequest) -> Option<Value> + Send + Sync + 'static,
    {
        self.accessor = Some(Arc::new(accessor));
        self
    }

    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    fn extract(&self, req: &ActionRequest) -> Value {
        let raw = match &self.accessor {
            Some(accessor) => accessor(req),
            None => req.provider(&self.provider),
        };
        match raw {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(v) => v,
        }
    }
}

impl fmt::Debug for ValidationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationEntry")
            .field("provider", &self.provider)
            .field("custom_accessor", &self.accessor.is_some())
            .finish()
    }
}

/// Result of validating one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResult {
    pub provider: String,
    pub error: Option<ValidationFailure>,
    /// Normalized value, present when the provider passed
    pub value: Option<Value>,
}

/// Aggregate outcome of a validation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationOutcome {
    pub results: Vec<ProviderResult>,
}

impl ValidationOutcome {
    /// True iff no provider carries an error (vacuously true when empty).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.results.iter().all(|r| r.error.is_none())
    }

    /// Providers that failed, in declaration order.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &ValidationFailure)> {
        self.results
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| (r.provider.as_str(), e)))
    }

    /// Build the `validation_error` envelope, or `None` when valid.
    ///
    /// The blob holds one `{message, provider, details}` entry per failing provider.
    #[must_use]
    pub fn to_error(&self) -> Option<ErrorObject> {
        if self.is_valid() {
            return None;
        }
        let blob: Vec<Value> = self
            .failures()
            .map(|(provider, failure)| {
                json!({
                    "message": failure.message,
                    "provider": provider,
                    "details": failure.details,
                })
            })
            .collect();
        let providers: Vec<&str> = self.failures().map(|(p, _)| p).collect();
        Some(ErrorObject::validation_error(
            format!("Validation failed for: {}", providers.join(", ")),
            Value::Array(blob),
        ))
    }
}

/// Ordered list of validations run against a request.
///
/// One engine is created per dispatch cycle and accumulates the entries
/// declared for the resolved action.
#[derive(Debug, Clone, Default)]
pub struct ValidationEngine {
    entries: Vec<ValidationEntry>,
}

impl ValidationEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ValidationEntry) {
        self.entries.push(entry);
    }

    /// Append declared entries, preserving their order.
    pub fn merge(&mut self, entries: &[ValidationEntry]) {
        self.entries.extend(entries.iter().cloned());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every entry and write passing values back onto the request.
    pub fn validate(&self, req: &mut ActionRequest) -> ValidationOutcome {
        let mut results = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let data = entry.extract(req);
            let checked = catch_unwind(AssertUnwindSafe(|| entry.schema.validate(data)))
                .unwrap_or_else(|panic| {
                    let reason = panic_message(panic.as_ref());
                    warn!(
                        request_id = %req.request_id,
                        provider = %entry.provider,
                        reason = %reason,
                        "Validator panicked"
                    );
                    Err(ValidationFailure::new(reason))
                });
            match checked {
                Ok(normalized) => {
                    req.set_provider(&entry.provider, normalized.clone());
                    results.push(ProviderResult {
                        provider: entry.provider.to_string(),
                        error: None,
                        value: Some(normalized),
                    });
                }
                Err(failure) => {
                    debug!(
                        request_id = %req.request_id,
                        provider = %entry.provider,
                        message = %failure.message,
                        "Provider failed validation"
                    );
                    results.push(ProviderResult {
                        provider: entry.provider.to_string(),
                        error: Some(failure),
                        value: None,
                    });
                }
            }
        }
        ValidationOutcome { results }
    }
}
