//! Guards: boolean filter methods gating fragment application.
//!
//! A guard is a user-supplied predicate deciding whether a fragment applies
//! at a given shadow. Guards are registered explicitly - each guard type
//! declares its methods with their metadata (staticness, return type,
//! parameter kinds) and a Rust function implementing the predicate. Exactly
//! one method per guard must carry the guard marker.
//!
//! Error tiers follow the crate convention: resolution and validation
//! failures are checked [`Error`]s raised before weaving; failures while
//! *running* guard code are unchecked panics carrying the failing guard's
//! qualified name, aborting the whole request.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock},
};

use log::trace;

use crate::{
    argproc::ArgumentContext,
    context::{ContextEngine, ContextValue},
    shadow::Shadow,
    Error, Result,
};

/// The kinds of context a guard method may declare as parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum GuardContextKind {
    /// Any registered static context type.
    #[strum(serialize = "static context")]
    Static,
    /// The guard context, able to recursively invoke other guards.
    #[strum(serialize = "guard context")]
    Guard,
    /// The per-argument context, available only inside argument processors.
    #[strum(serialize = "argument context")]
    Argument,
}

/// One declared parameter of a guard method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardParamKind {
    /// A static context of the named type.
    StaticContext(String),
    /// The recursive guard context.
    GuardContext,
    /// The per-argument context.
    ArgumentContext,
}

impl GuardParamKind {
    /// Returns the context kind this parameter belongs to.
    #[must_use]
    pub const fn kind(&self) -> GuardContextKind {
        match self {
            GuardParamKind::StaticContext(_) => GuardContextKind::Static,
            GuardParamKind::GuardContext => GuardContextKind::Guard,
            GuardParamKind::ArgumentContext => GuardContextKind::Argument,
        }
    }
}

/// The predicate function implementing a guard method.
pub type GuardFn = fn(&GuardInvocation<'_>) -> bool;

/// One method of a registered guard type.
///
/// Carries the declared metadata mirrored from the user's definition - the
/// validation rules operate on this record - plus the function to invoke.
/// The validated parameter kind set is cached after the first full
/// validation; later validations only re-check containment in the allowed
/// set.
pub struct GuardMethod {
    /// Name of the owning guard type.
    pub guard_name: String,
    /// Method name.
    pub name: String,
    /// Whether this method carries the guard marker.
    pub marked: bool,
    /// Whether the method is declared static.
    pub is_static: bool,
    /// Whether the method is declared to return boolean.
    pub returns_boolean: bool,
    /// Declared parameters.
    pub params: Vec<GuardParamKind>,
    /// The predicate implementation.
    pub func: GuardFn,
    /// Parameter kinds, cached on first successful validation.
    validated: OnceLock<Vec<GuardContextKind>>,
}

impl GuardMethod {
    /// Creates a marked, static, boolean-returning guard method - the shape
    /// every valid guard has.
    #[must_use]
    pub fn new(guard_name: &str, name: &str, params: Vec<GuardParamKind>, func: GuardFn) -> Self {
        Self {
            guard_name: guard_name.to_string(),
            name: name.to_string(),
            marked: true,
            is_static: true,
            returns_boolean: true,
            params,
            func,
            validated: OnceLock::new(),
        }
    }

    /// Returns the `guard.method` qualified name used in diagnostics.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.guard_name, self.name)
    }
}

impl std::fmt::Debug for GuardMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardMethod")
            .field("guard_name", &self.guard_name)
            .field("name", &self.name)
            .field("marked", &self.marked)
            .field("params", &self.params)
            .finish()
    }
}

/// Registry of guard types, built at configuration time.
#[derive(Debug, Default)]
pub struct GuardRegistry {
    guards: HashMap<String, Vec<Arc<GuardMethod>>>,
}

impl GuardRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a guard type with its methods.
    pub fn register(&mut self, name: &str, methods: Vec<GuardMethod>) {
        self.guards
            .insert(name.to_string(), methods.into_iter().map(Arc::new).collect());
    }

    /// Returns the methods of a guard type.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[Arc<GuardMethod>]> {
        self.guards.get(name).map(Vec::as_slice)
    }

    /// Returns `true` if the guard type is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.guards.contains_key(name)
    }
}

/// Resolves, validates and invokes guards.
///
/// Resolution results are cached per guard type; the cache's critical section
/// covers only the lookup-or-insert.
pub struct GuardEngine {
    registry: Arc<GuardRegistry>,
    contexts: Arc<ContextEngine>,
    resolved: Mutex<HashMap<String, Arc<GuardMethod>>>,
}

impl GuardEngine {
    /// Creates an engine over the given registry, resolving static context
    /// parameters through `contexts`.
    #[must_use]
    pub fn new(registry: Arc<GuardRegistry>, contexts: Arc<ContextEngine>) -> Self {
        Self {
            registry,
            contexts,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// The context kinds a snippet guard may declare.
    #[must_use]
    pub fn snippet_context_set() -> Vec<GuardContextKind> {
        vec![GuardContextKind::Guard, GuardContextKind::Static]
    }

    /// The context kinds an argument processor guard may declare.
    #[must_use]
    pub fn processor_context_set() -> Vec<GuardContextKind> {
        vec![
            GuardContextKind::Guard,
            GuardContextKind::Static,
            GuardContextKind::Argument,
        ]
    }

    /// Resolves the single marked guard method of a guard type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownGuard`] for an unregistered guard and
    /// [`Error::Guard`] when zero or multiple methods carry the guard
    /// marker.
    pub fn resolve(&self, guard: &str) -> Result<Arc<GuardMethod>> {
        {
            let cache = self.resolved.lock().map_err(|_| Error::LockError)?;
            if let Some(method) = cache.get(guard) {
                return Ok(Arc::clone(method));
            }
        }

        let methods = self
            .registry
            .get(guard)
            .ok_or_else(|| Error::UnknownGuard(guard.to_string()))?;

        let mut marked = methods.iter().filter(|m| m.marked);
        let method = match (marked.next(), marked.next()) {
            (Some(method), None) => Arc::clone(method),
            (Some(_), Some(_)) => {
                return Err(Error::Guard(format!(
                    "detected several guard methods on guard {guard}"
                )))
            }
            (None, _) => {
                return Err(Error::Guard(format!(
                    "no guard method on guard {guard}"
                )))
            }
        };

        let mut cache = self.resolved.lock().map_err(|_| Error::LockError)?;
        cache.insert(guard.to_string(), Arc::clone(&method));
        Ok(method)
    }

    /// Validates a guard method against a set of allowed context kinds.
    ///
    /// A first validation checks the full method shape - boolean return,
    /// static, every parameter within the allowed set and every static
    /// context parameter registered - and caches the parameter kinds on the
    /// method. Later validations only re-check the cached kinds against the
    /// allowed set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Guard`] naming the offending method and type.
    pub fn validate(&self, method: &GuardMethod, allowed: &[GuardContextKind]) -> Result<()> {
        // quick validation against the cached parameter kinds
        if let Some(kinds) = method.validated.get() {
            if let Some(bad) = kinds.iter().find(|kind| !allowed.contains(kind)) {
                return Err(Error::Guard(format!(
                    "guard {} is using {} not allowed in this particular case (misused guard?)",
                    method.qualified_name(),
                    bad
                )));
            }
            return Ok(());
        }

        // validate properly
        if !method.returns_boolean {
            return Err(Error::Guard(format!(
                "guard method {} MUST return boolean type",
                method.qualified_name()
            )));
        }

        if !method.is_static {
            return Err(Error::Guard(format!(
                "guard method {} MUST be static",
                method.qualified_name()
            )));
        }

        let mut kinds = Vec::with_capacity(method.params.len());
        for param in &method.params {
            if let GuardParamKind::StaticContext(context_type) = param {
                if !self.contexts.registry().contains(context_type) {
                    return Err(Error::Guard(format!(
                        "guard argument {} in {} is not a registered static context type",
                        context_type,
                        method.qualified_name()
                    )));
                }
            }

            let kind = param.kind();
            if !allowed.contains(&kind) {
                let allowed_names = allowed
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(Error::Guard(format!(
                    "guard argument {} in {} is not in the set of allowed contexts \
                     (misused guard?): {}",
                    kind,
                    method.qualified_name(),
                    allowed_names
                )));
            }
            kinds.push(kind);
        }

        let _ = method.validated.set(kinds);
        Ok(())
    }

    /// Decides whether a fragment guarded by `guard` applies at `shadow`.
    ///
    /// An absent guard always applies. The allowed context set is chosen by
    /// whether an argument context is supplied (processor guard) or not
    /// (snippet guard).
    ///
    /// # Errors
    ///
    /// Propagates resolution and validation failures.
    ///
    /// # Panics
    ///
    /// A failure while running the guard's own code, or resolving a context
    /// for it, panics with the guard's qualified name: user code failures
    /// are unrecoverable for the current request.
    pub fn applicable(
        &self,
        guard: Option<&str>,
        shadow: &Shadow,
        arg_ctx: Option<&ArgumentContext>,
    ) -> Result<bool> {
        let Some(guard) = guard else {
            return Ok(true);
        };

        let method = self.resolve(guard)?;
        let allowed = if arg_ctx.is_some() {
            Self::processor_context_set()
        } else {
            Self::snippet_context_set()
        };
        self.validate(&method, &allowed)?;

        Ok(self.invoke(&method, shadow, arg_ctx))
    }

    /// Invokes a validated guard method with its context arguments.
    fn invoke(
        &self,
        method: &GuardMethod,
        shadow: &Shadow,
        arg_ctx: Option<&ArgumentContext>,
    ) -> bool {
        // Validation guarantees an argument context is only declared where
        // one can be supplied; reaching this state otherwise is a defect in
        // the engine.
        if arg_ctx.is_none()
            && method
                .params
                .iter()
                .any(|p| matches!(p, GuardParamKind::ArgumentContext))
        {
            panic!(
                "missing argument context for guard {}",
                method.qualified_name()
            );
        }

        let invocation = GuardInvocation {
            engine: self,
            shadow,
            arg_ctx,
            method,
        };

        let decision = (method.func)(&invocation);
        trace!(
            "guard {} at shadow {:?}: {}",
            method.qualified_name(),
            shadow.id(),
            decision
        );
        decision
    }
}

impl std::fmt::Debug for GuardEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardEngine")
            .field("registry", &self.registry)
            .finish()
    }
}

/// The arguments available to a running guard method.
///
/// Each accessor corresponds to a context kind the guard may have declared.
/// Accessing a context the guard did not declare - or whose resolution fails
/// - panics, because guard runtime failures abort the request.
pub struct GuardInvocation<'a> {
    engine: &'a GuardEngine,
    shadow: &'a Shadow,
    arg_ctx: Option<&'a ArgumentContext>,
    method: &'a GuardMethod,
}

impl GuardInvocation<'_> {
    /// Returns the per-argument context.
    ///
    /// # Panics
    ///
    /// Panics if no argument context is available; validation prevents this
    /// for correctly declared guards.
    #[must_use]
    pub fn argument(&self) -> &ArgumentContext {
        match self.arg_ctx {
            Some(ctx) => ctx,
            None => panic!(
                "missing argument context in guard {}",
                self.method.qualified_name()
            ),
        }
    }

    /// Returns a guard context able to recursively invoke other guards for
    /// the same shadow.
    #[must_use]
    pub fn guards(&self) -> GuardContext<'_> {
        GuardContext {
            engine: self.engine,
            shadow: self.shadow,
            arg_ctx: self.arg_ctx,
        }
    }

    /// Seeds the named static context for the current shadow and computes
    /// one of its methods.
    ///
    /// # Panics
    ///
    /// Panics, naming this guard, if the context cannot be resolved or the
    /// invocation fails.
    #[must_use]
    pub fn static_value(&self, context_type: &str, method: &str) -> ContextValue {
        match self.engine.contexts.value(context_type, method, self.shadow) {
            Ok(value) => value,
            Err(error) => panic!(
                "static context initialization for guard {} failed: {error}",
                self.method.qualified_name()
            ),
        }
    }
}

/// A context handle allowing one guard to invoke another.
pub struct GuardContext<'a> {
    engine: &'a GuardEngine,
    shadow: &'a Shadow,
    arg_ctx: Option<&'a ArgumentContext>,
}

impl GuardContext<'_> {
    /// Resolves, validates and invokes another guard for the same shadow,
    /// propagating the current argument context if any.
    ///
    /// # Errors
    ///
    /// Returns resolution or validation failures of the invoked guard.
    pub fn invoke(&self, guard: &str) -> Result<bool> {
        let method = self.engine.resolve(guard)?;
        let allowed = if self.arg_ctx.is_some() {
            GuardEngine::processor_context_set()
        } else {
            GuardEngine::snippet_context_set()
        };
        self.engine.validate(&method, &allowed)?;
        Ok(self.engine.invoke(&method, self.shadow, self.arg_ctx))
    }
}
