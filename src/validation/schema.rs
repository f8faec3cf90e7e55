use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;

/// A provider failed its schema.
///
/// `details` is validator specific; for [`JsonSchema`] it is one
/// `{message}` object per violated keyword.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationFailure {
    pub message: String,
    pub details: Vec<Value>,
}

impl ValidationFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: Vec<Value>) -> Self {
        self.details = details;
        self
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ValidationFailure {}

/// Validates (and optionally normalizes) one provider's data.
///
/// On success the returned value replaces the raw value on the request.
pub trait Schema: Send + Sync {
    fn validate(&self, value: Value) -> Result<Value, ValidationFailure>;
}

impl<F> Schema for F
where
    F: Fn(Value) -> Result<Value, ValidationFailure> + Send + Sync,
{
    fn validate(&self, value: Value) -> Result<Value, ValidationFailure> {
        self(value)
    }
}

/// JSON Schema validator that coerces string primitives before checking.
///
/// Query strings, route params and headers arrive as text; a schema that
/// declares `integer`, `number` or `boolean` gets the parsed value, so
/// `{"a": "1"}` against `{"properties": {"a": {"type": "integer"}}}` is
/// normalized to `{"a": 1}`.
#[derive(Clone)]
pub struct JsonSchema {
    schema: Arc<Value>,
    validator: Arc<jsonschema::Validator>,
}

impl JsonSchema {
    /// Compile a schema once at registration time.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema document itself is invalid.
    pub fn compile(schema: Value) -> Result<Self> {
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| anyhow!("invalid JSON schema: {e}"))?;
        Ok(Self {
            schema: Arc::new(schema),
            validator: Arc::new(validator),
        })
    }

    #[must_use]
    pub fn schema(&self) -> &Value {
        &self.schema
    }
}

impl fmt::Debug for JsonSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchema")
            .field("schema", &self.schema)
            .finish()
    }
}

impl Schema for JsonSchema {
    fn validate(&self, value: Value) -> Result<Value, ValidationFailure> {
        let coerced = coerce(value, &self.schema);
        let details: Vec<Value> = self
            .validator
            .iter_errors(&coerced)
            .map(|e| json!({ "message": e.to_string() }))
            .collect();
        if details.is_empty() {
            Ok(coerced)
        } else {
            Err(ValidationFailure::new("schema validation failed").with_details(details))
        }
    }
}

/// First concrete (non-null) `type` named by a schema.
fn declared_type(schema: &Value) -> Option<&str> {
    match schema.get("type")? {
        Value::String(s) => Some(s.as_str()),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null"),
        _ => None,
    }
}

fn coerce_primitive(raw: String, ty: &str) -> Value {
    let parsed = match ty {
        "integer" => raw.trim().parse::<i64>().ok().map(Value::from),
        "number" => {
            let raw = raw.trim();
            raw.parse::<i64>()
                .ok()
                .map(Value::from)
                .or_else(|| {
                    raw.parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                        .map(Value::Number)
                })
        }
        "boolean" => raw.trim().parse::<bool>().ok().map(Value::from),
        _ => None,
    };
    parsed.unwrap_or(Value::String(raw))
}

/// Walk `value` alongside `schema`, parsing strings where a primitive is declared.
///
/// Unparseable strings are left alone so the validator reports them.
pub fn coerce(value: Value, schema: &Value) -> Value {
    match (value, declared_type(schema)) {
        (Value::Object(mut map), Some("object") | None) => {
            if let Some(props) = schema.get("properties").and_then(Value::as_object) {
                for (name, prop_schema) in props {
                    if let Some(field) = map.remove(name) {
                        map.insert(name.clone(), coerce(field, prop_schema));
                    }
                }
            }
            Value::Object(map)
        }
        (Value::Array(items), Some("array") | None) => match schema.get("items") {
            Some(item_schema) => Value::Array(
                items
                    .into_iter()
                    .map(|item| coerce(item, item_schema))
                    .collect(),
            ),
            None => Value::Array(items),
        },
        (Value::String(s), Some(ty)) => coerce_primitive(s, ty),
        (other, _) => other,
    }
}
