//! # Controllers and Action Registries
//!
//! A controller is a value that owns a set of named actions. Each action is
//! an [`ActionDef`]: a callable, a visibility flag, the validations it
//! requires and the ordered list of injectors for its parameters.
//!
//! Actions are registered up front through a [`RegistryBuilder`]; the built
//! [`ActionRegistry`] is immutable and shared by every dispatch.
//!
//! ```rust
//! use brrtaction::controller::{ActionDef, ActionRegistry, Controller};
//! use brrtaction::dispatcher::ActionOutcome;
//! use serde_json::json;
//!
//! struct Pets;
//! impl Controller for Pets {}
//!
//! let registry = ActionRegistry::<Pets>::builder()
//!     .register(
//!         ActionDef::new("list", |_pets: &Pets, _args| ActionOutcome::json(&json!([])))
//!             .public()
//!             .inject(["$query"]),
//!     )
//!     .build()
//!     .unwrap();
//! assert!(registry.resolve_public("list").is_some());
//! ```

use crate::dispatcher::{ActionResult, RequestContext};
use crate::error::ErrorObject;
use crate::injector::{Args, CustomInjectors, Injector, InjectorFn};
use crate::request::ActionRequest;
use crate::runtime_config::RuntimeConfig;
use crate::validation::ValidationEntry;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Names that may not be used for actions.
pub const RESERVED_ACTION_NAMES: [&str; 3] = ["before", "after", "dispatch"];

/// Controller-level hooks. Every method has a no-op default.
pub trait Controller: Send + Sync + 'static {
    /// Name used in logs and `invalid_action` errors.
    fn name(&self) -> &'static str {
        let full = std::any::type_name::<Self>();
        let path = full.split('<').next().unwrap_or(full);
        path.rsplit("::").next().unwrap_or(path)
    }

    /// Runs after validation, before any registered hook.
    ///
    /// # Errors
    ///
    /// An error short-circuits the dispatch; the action is never invoked.
    fn before(&self, _cx: &mut RequestContext, _req: &ActionRequest) -> Result<(), ErrorObject> {
        Ok(())
    }

    /// Runs once the action has completed successfully.
    ///
    /// # Errors
    ///
    /// Reported through the failure sink if nothing has settled yet.
    fn after(&self, _cx: &RequestContext, _req: &ActionRequest) -> Result<(), ErrorObject> {
        Ok(())
    }
}

/// Whether an action can be reached by name from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

type ActionFn<C> = dyn Fn(&C, Args) -> ActionResult + Send + Sync;

/// A registered action.
pub struct ActionDef<C> {
    name: Arc<str>,
    visibility: Visibility,
    validations: Vec<ValidationEntry>,
    injectors: Vec<Injector>,
    func: Arc<ActionFn<C>>,
}

impl<C> ActionDef<C> {
    /// Private action with no validations and no parameters.
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&C, Args) -> ActionResult + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            visibility: Visibility::Private,
            validations: Vec::new(),
            injectors: Vec::new(),
            func: Arc::new(func),
        }
    }

    #[must_use]
    pub fn public(mut self) -> Self {
        self.visibility = Visibility::Public;
        self
    }

    #[must_use]
    pub fn private(mut self) -> Self {
        self.visibility = Visibility::Private;
        self
    }

    /// Require `entry` to pass before the action runs.
    #[must_use]
    pub fn validate(mut self, entry: ValidationEntry) -> Self {
        self.validations.push(entry);
        self
    }

    /// Declare the action's parameters by injector name, in order.
    #[must_use]
    pub fn inject<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.injectors
            .extend(names.into_iter().map(|n| Injector::parse(n.as_ref())));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    #[must_use]
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    #[must_use]
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    #[must_use]
    pub fn validations(&self) -> &[ValidationEntry] {
        &self.validations
    }

    #[must_use]
    pub fn injectors(&self) -> &[Injector] {
        &self.injectors
    }

    /// Call the action with already-resolved parameters.
    ///
    /// # Errors
    ///
    /// Whatever the action itself returns.
    pub fn invoke(&self, controller: &C, args: Args) -> ActionResult {
        (self.func)(controller, args)
    }
}

impl<C> fmt::Debug for ActionDef<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDef")
            .field("name", &self.name)
            .field("visibility", &self.visibility)
            .field("validations", &self.validations.len())
            .field("injectors", &self.injectors)
            .finish()
    }
}

/// Error building a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Two actions share a name
    DuplicateAction(String),
    /// Action name collides with a controller hook
    ReservedName(String),
    /// An action declares an injector nothing provides (strict mode only)
    UnknownInjector { action: String, name: String },
    /// Custom injector names must start with `$` and not shadow a built-in
    InvalidInjectorName(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateAction(name) => write!(f, "action '{name}' registered twice"),
            RegistryError::ReservedName(name) => write!(f, "'{name}' is reserved and cannot be an action"),
            RegistryError::UnknownInjector { action, name } => {
                write!(f, "action '{action}' declares unknown injector '{name}'")
            }
            RegistryError::InvalidInjectorName(name) => {
                write!(f, "invalid custom injector name '{name}'")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Immutable table of a controller's actions and custom injectors.
pub struct ActionRegistry<C> {
    actions: HashMap<Arc<str>, Arc<ActionDef<C>>>,
    injectors: CustomInjectors,
}

impl<C> ActionRegistry<C> {
    #[must_use]
    pub fn builder() -> RegistryBuilder<C> {
        RegistryBuilder::default()
    }

    /// Any registered action, public or private.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Arc<ActionDef<C>>> {
        self.actions.get(name)
    }

    /// Action reachable by name from outside the controller.
    #[must_use]
    pub fn resolve_public(&self, name: &str) -> Option<&Arc<ActionDef<C>>> {
        self.lookup(name).filter(|def| def.is_public())
    }

    /// Sorted action names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(AsRef::as_ref).collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    #[must_use]
    pub fn custom_injectors(&self) -> &CustomInjectors {
        &self.injectors
    }
}

impl<C> fmt::Debug for ActionRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .field("injectors", &self.injectors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Collects actions and custom injectors, validated on [`build`](Self::build).
pub struct RegistryBuilder<C> {
    actions: Vec<ActionDef<C>>,
    injectors: CustomInjectors,
    strict_injectors: bool,
}

impl<C> Default for RegistryBuilder<C> {
    fn default() -> Self {
        Self {
            actions: Vec::new(),
            injectors: HashMap::new(),
            strict_injectors: false,
        }
    }
}

impl<C> RegistryBuilder<C> {
    #[must_use]
    pub fn register(mut self, def: ActionDef<C>) -> Self {
        self.actions.push(def);
        self
    }

    /// Declare a custom injector available to every action of this registry.
    #[must_use]
    pub fn injector<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&ActionRequest, &RequestContext) -> serde_json::Value + Send + Sync + 'static,
    {
        self.injectors.insert(Arc::from(name), Arc::new(f) as InjectorFn);
        self
    }

    /// Reject actions declaring injectors nobody provides.
    #[must_use]
    pub fn strict_injectors(mut self, strict: bool) -> Self {
        self.strict_injectors = strict;
        self
    }

    /// Take registry settings (`strict_injectors`) from a runtime config.
    #[must_use]
    pub fn with_config(self, config: &RuntimeConfig) -> Self {
        self.strict_injectors(config.strict_injectors)
    }

    /// Validate names and bind custom injectors.
    ///
    /// # Errors
    ///
    /// See [`RegistryError`].
    pub fn build(self) -> Result<ActionRegistry<C>, RegistryError> {
        for name in self.injectors.keys() {
            if !name.starts_with('$') || !matches!(Injector::parse(name), Injector::Unbound(_)) {
                return Err(RegistryError::InvalidInjectorName(name.to_string()));
            }
        }

        let mut actions = HashMap::with_capacity(self.actions.len());
        for mut def in self.actions {
            if RESERVED_ACTION_NAMES.contains(&def.name()) {
                return Err(RegistryError::ReservedName(def.name().to_string()));
            }
            let action = def.name_arc();
            for injector in &mut def.injectors {
                let name = match &*injector {
                    Injector::Unbound(name) => Arc::clone(name),
                    _ => continue,
                };
                if self.injectors.contains_key(&name) {
                    *injector = Injector::Custom(name);
                } else if self.strict_injectors {
                    return Err(RegistryError::UnknownInjector {
                        action: action.to_string(),
                        name: name.to_string(),
                    });
                } else {
                    warn!(
                        action = %action,
                        injector = %name,
                        "Unknown injector; parameter will be undefined"
                    );
                }
            }
            let key = def.name_arc();
            if actions.insert(Arc::clone(&key), Arc::new(def)).is_some() {
                return Err(RegistryError::DuplicateAction(key.to_string()));
            }
        }

        debug!(
            actions = actions.len(),
            injectors = self.injectors.len(),
            "Action registry built"
        );
        Ok(ActionRegistry {
            actions,
            injectors: self.injectors,
        })
    }
}
