//! # Parameter Injection
//!
//! Actions declare, in order, the named values they want. At dispatch time
//! the [`ParameterResolver`] turns that list into [`Args`].
//!
//! | Name | Injected value |
//! |------|----------------|
//! | `$req`, `$request` | the validated [`ActionRequest`] |
//! | `$resp` | a [`ResponseWriter`] bound to this response |
//! | `$query` | query parameters (normalized if validated) |
//! | `$params` | route parameters |
//! | `$body` | parsed body (undefined when absent) |
//! | `$headers` | request headers as an object |
//! | `$next`, `$continuation` | the [`FailureSink`] |
//! | `$context` | the frozen [`RequestContext`] |
//! | registry-declared names | the value produced by the custom injector |
//!
//! Any other name resolves to [`Injected::Undefined`] rather than failing.
//! Registries can opt into rejecting such names at build time.
//!
//! Computed values (query, headers, custom injectors) are memoized for the
//! dispatch cycle, so an action asking for `$query` twice parses it once.

use crate::controller::ActionDef;
use crate::dispatcher::{FailureSink, RequestContext};
use crate::request::ActionRequest;
use crate::response::ResponseWriter;
use once_cell::unsync::OnceCell;
use serde_json::Value;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Most actions take a handful of parameters.
pub const MAX_INLINE_ARGS: usize = 8;

/// Produces a custom injected value from the request and its context.
pub type InjectorFn = Arc<dyn Fn(&ActionRequest, &RequestContext) -> Value + Send + Sync>;

/// Custom injectors declared on a registry, keyed by name.
pub type CustomInjectors = HashMap<Arc<str>, InjectorFn>;

/// A declared parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Injector {
    Request,
    Response,
    Query,
    Params,
    Body,
    Headers,
    Next,
    Context,
    /// Registry-declared injector
    Custom(Arc<str>),
    /// No injector by this name; resolves to undefined
    Unbound(Arc<str>),
}

impl Injector {
    /// Map a parameter name onto a built-in injector, or `Unbound`.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "$req" | "$request" => Injector::Request,
            "$resp" => Injector::Response,
            "$query" => Injector::Query,
            "$params" => Injector::Params,
            "$body" => Injector::Body,
            "$headers" => Injector::Headers,
            "$next" | "$continuation" => Injector::Next,
            "$context" => Injector::Context,
            other => Injector::Unbound(Arc::from(other)),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Injector::Request => "$req",
            Injector::Response => "$resp",
            Injector::Query => "$query",
            Injector::Params => "$params",
            Injector::Body => "$body",
            Injector::Headers => "$headers",
            Injector::Next => "$next",
            Injector::Context => "$context",
            Injector::Custom(name) | Injector::Unbound(name) => name,
        }
    }
}

/// A resolved parameter value.
#[derive(Clone)]
pub enum Injected {
    Request(Arc<ActionRequest>),
    Response(ResponseWriter),
    Value(Value),
    Next(FailureSink),
    Context(Arc<RequestContext>),
    Undefined,
}

impl Injected {
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Injected::Undefined)
    }

    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Injected::Value(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_request(&self) -> Option<&Arc<ActionRequest>> {
        match self {
            Injected::Request(r) => Some(r),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_response(&self) -> Option<&ResponseWriter> {
        match self {
            Injected::Response(w) => Some(w),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_next(&self) -> Option<&FailureSink> {
        match self {
            Injected::Next(n) => Some(n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_context(&self) -> Option<&Arc<RequestContext>> {
        match self {
            Injected::Context(c) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Debug for Injected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Injected::Request(r) => write!(f, "Request({} {})", r.method, r.url),
            Injected::Response(_) => f.write_str("Response"),
            Injected::Value(v) => write!(f, "Value({v})"),
            Injected::Next(_) => f.write_str("Next"),
            Injected::Context(c) => write!(f, "Context({})", c.request_id()),
            Injected::Undefined => f.write_str("Undefined"),
        }
    }
}

/// Ordered parameter values passed to an action.
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: SmallVec<[Injected; MAX_INLINE_ARGS]>,
}

impl Args {
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parameter at `index`; out of range reads as undefined.
    #[must_use]
    pub fn get(&self, index: usize) -> &Injected {
        self.values.get(index).unwrap_or(&Injected::Undefined)
    }

    #[must_use]
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.get(index).as_value()
    }

    #[must_use]
    pub fn request(&self, index: usize) -> Option<&Arc<ActionRequest>> {
        self.get(index).as_request()
    }

    #[must_use]
    pub fn response(&self, index: usize) -> Option<&ResponseWriter> {
        self.get(index).as_response()
    }

    #[must_use]
    pub fn next(&self, index: usize) -> Option<&FailureSink> {
        self.get(index).as_next()
    }

    #[must_use]
    pub fn context(&self, index: usize) -> Option<&Arc<RequestContext>> {
        self.get(index).as_context()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Injected> {
        self.values.iter()
    }
}

impl FromIterator<Injected> for Args {
    fn from_iter<I: IntoIterator<Item = Injected>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Declared parameter list of an action, in declaration order.
#[must_use]
pub fn resolve_parameters<C>(action: &ActionDef<C>) -> &[Injector] {
    action.injectors()
}

/// Resolves injectors for one dispatch cycle.
pub struct ParameterResolver<'a> {
    request: &'a Arc<ActionRequest>,
    context: &'a Arc<RequestContext>,
    response: &'a ResponseWriter,
    failure: &'a FailureSink,
    custom: &'a CustomInjectors,
    query: OnceCell<Value>,
    headers: OnceCell<Value>,
    custom_memo: RefCell<HashMap<Arc<str>, Value>>,
}

impl<'a> ParameterResolver<'a> {
    #[must_use]
    pub fn new(
        request: &'a Arc<ActionRequest>,
        context: &'a Arc<RequestContext>,
        response: &'a ResponseWriter,
        failure: &'a FailureSink,
        custom: &'a CustomInjectors,
    ) -> Self {
        Self {
            request,
            context,
            response,
            failure,
            custom,
            query: OnceCell::new(),
            headers: OnceCell::new(),
            custom_memo: RefCell::new(HashMap::new()),
        }
    }

    /// Resolve every injector, preserving order.
    #[must_use]
    pub fn get_params(&self, injectors: &[Injector]) -> Args {
        injectors.iter().map(|inj| self.resolve(inj)).collect()
    }

    /// Resolve a single injector.
    #[must_use]
    pub fn resolve(&self, injector: &Injector) -> Injected {
        match injector {
            Injector::Request => Injected::Request(Arc::clone(self.request)),
            Injector::Response => Injected::Response(self.response.clone()),
            Injector::Query => {
                Injected::Value(self.query.get_or_init(|| self.request.query()).clone())
            }
            Injector::Params => Injected::Value(self.request.params.clone()),
            Injector::Body => match &self.request.body {
                Some(body) => Injected::Value(body.clone()),
                None => Injected::Undefined,
            },
            Injector::Headers => Injected::Value(
                self.headers
                    .get_or_init(|| self.request.headers_value())
                    .clone(),
            ),
            Injector::Next => Injected::Next(self.failure.clone()),
            Injector::Context => Injected::Context(Arc::clone(self.context)),
            Injector::Custom(name) => self.resolve_custom(name),
            Injector::Unbound(_) => Injected::Undefined,
        }
    }

    fn resolve_custom(&self, name: &Arc<str>) -> Injected {
        if let Some(v) = self.custom_memo.borrow().get(name) {
            return Injected::Value(v.clone());
        }
        let Some(injector) = self.custom.get(name) else {
            return Injected::Undefined;
        };
        let value = injector(self.request, self.context);
        self.custom_memo
            .borrow_mut()
            .insert(Arc::clone(name), value.clone());
        Injected::Value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::BufferedResponse;
    use http::Method;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fixture() -> (Arc<ActionRequest>, Arc<RequestContext>, ResponseWriter, FailureSink) {
        let req = ActionRequest::new(Method::POST, "/pets/7?verbose=true")
            .with_header("X-Tenant", "acme")
            .with_params(json!({"id": "7"}))
            .with_body(json!({"name": "Rex"}));
        let cx = RequestContext::new("Pets", Arc::from("update"), &req);
        let (sink, _rx) = FailureSink::channel();
        (
            Arc::new(req),
            Arc::new(cx),
            ResponseWriter::new(BufferedResponse::new()),
            sink,
        )
    }

    #[test]
    fn test_parse_builtin_names() {
        assert_eq!(Injector::parse("$req"), Injector::Request);
        assert_eq!(Injector::parse("$request"), Injector::Request);
        assert_eq!(Injector::parse("$continuation"), Injector::Next);
        assert_eq!(Injector::parse("a"), Injector::Unbound(Arc::from("a")));
        assert_eq!(Injector::parse("$continuation").name(), "$next");
    }

    #[test]
    fn test_order_matches_declaration_and_unknown_is_undefined() {
        let (req, cx, resp, sink) = fixture();
        let custom = CustomInjectors::new();
        let resolver = ParameterResolver::new(&req, &cx, &resp, &sink, &custom);
        let args = resolver.get_params(&[
            Injector::parse("a"),
            Injector::parse("$req"),
            Injector::parse("$query"),
        ]);
        assert_eq!(args.len(), 3);
        assert!(args.get(0).is_undefined());
        assert_eq!(args.request(1).map(|r| r.url.as_str()), Some("/pets/7?verbose=true"));
        assert_eq!(args.value(2), Some(&json!({"verbose": "true"})));
        assert!(args.get(9).is_undefined());
    }

    #[test]
    fn test_body_params_headers() {
        let (req, cx, resp, sink) = fixture();
        let custom = CustomInjectors::new();
        let resolver = ParameterResolver::new(&req, &cx, &resp, &sink, &custom);
        let args = resolver.get_params(&[Injector::Body, Injector::Params, Injector::Headers]);
        assert_eq!(args.value(0), Some(&json!({"name": "Rex"})));
        assert_eq!(args.value(1), Some(&json!({"id": "7"})));
        assert_eq!(args.value(2).and_then(|h| h.get("x-tenant")), Some(&json!("acme")));
    }

    #[test]
    fn test_custom_injector_is_memoized() {
        let (req, cx, resp, sink) = fixture();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut custom = CustomInjectors::new();
        custom.insert(
            Arc::from("$tenant"),
            Arc::new(move |req: &ActionRequest, _cx: &RequestContext| {
                counter.fetch_add(1, Ordering::SeqCst);
                json!(req.header("x-tenant"))
            }) as InjectorFn,
        );
        let resolver = ParameterResolver::new(&req, &cx, &resp, &sink, &custom);
        let tenant = Injector::Custom(Arc::from("$tenant"));
        let args = resolver.get_params(&[tenant.clone(), tenant]);
        assert_eq!(args.value(0), Some(&json!("acme")));
        assert_eq!(args.value(1), Some(&json!("acme")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
