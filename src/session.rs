//! Weaving sessions: configuration, registries and per-run caches.
//!
//! A [`WeavingSession`] owns everything that was historically global in this
//! kind of system - the context and guard registries, the static context
//! instance cache, the resolved-guard cache and the processor memo - so that
//! concurrent sessions are trivially independent. Configuration happens
//! through a [`SessionBuilder`]; every fragment template is processed at
//! [`SessionBuilder::build`] time, surfacing all checked failures before any
//! weaving is attempted.

use std::{collections::HashMap, sync::Arc};

use log::debug;

use crate::{
    argproc::{ArgProcessor, ArgProcessorKind, ArgProcessorMethod, PIResolver, ProcEngine},
    context::{register_builtins, ContextEngine, ContextRegistry, ContextTypeDef, StaticInfo},
    fragment::CodeTemplate,
    guard::{GuardEngine, GuardMethod, GuardRegistry},
    method::MethodBody,
    scope::ScopeFilter,
    shadow::Shadow,
    snippet::{ProcInvocation, Snippet, SnippetCode},
    vars::{SyntheticLocalVar, ThreadLocalVar, VariableCatalog},
    Error, Result,
};

/// Snippet-to-shadow markings, as produced by the (out-of-scope) marker: for
/// each snippet, the shadows where it applies.
pub type SnippetMarkings = Vec<(Arc<Snippet>, Vec<Arc<Shadow>>)>;

/// Declaration of one snippet, as collected by the configuration front end.
#[derive(Debug)]
pub struct SnippetSpec {
    /// Internal name of the defining instrumentation class.
    pub origin_class: String,
    /// Name of the defining method.
    pub origin_method: String,
    /// The scope expression selecting eligible methods.
    pub scope: String,
    /// Composition order.
    pub order: i32,
    /// Guard gating the snippet, if any.
    pub guard: Option<String>,
    /// The raw snippet body.
    pub body: MethodBody,
    /// Declared processor applications: raw instruction index plus
    /// invocation.
    pub processor_invocations: Vec<(usize, ProcInvocation)>,
}

/// Declaration of one argument processor method.
#[derive(Debug)]
pub struct ProcMethodSpec {
    /// Method name.
    pub name: String,
    /// The argument kind the method processes.
    pub kind: ArgProcessorKind,
    /// Guard gating the method, if any.
    pub guard: Option<String>,
    /// The raw method body.
    pub body: MethodBody,
}

/// Declaration of one argument processor.
#[derive(Debug)]
pub struct ProcessorSpec {
    /// Processor name.
    pub name: String,
    /// Internal name of the defining class.
    pub defined_in: String,
    /// The processor's methods.
    pub methods: Vec<ProcMethodSpec>,
}

/// Collects configuration and produces an immutable [`WeavingSession`].
///
/// The built-in static context types are pre-registered.
#[derive(Debug)]
pub struct SessionBuilder {
    contexts: ContextRegistry,
    guards: GuardRegistry,
    catalog: VariableCatalog,
    processors: Vec<ProcessorSpec>,
    snippets: Vec<SnippetSpec>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    /// Creates a builder with the built-in context types registered.
    #[must_use]
    pub fn new() -> Self {
        let mut contexts = ContextRegistry::new();
        register_builtins(&mut contexts);
        Self {
            contexts,
            guards: GuardRegistry::new(),
            catalog: VariableCatalog::new(),
            processors: Vec::new(),
            snippets: Vec::new(),
        }
    }

    /// Registers a static context type.
    #[must_use]
    pub fn register_context(mut self, def: ContextTypeDef) -> Self {
        self.contexts.register(def);
        self
    }

    /// Registers a guard type with its methods.
    #[must_use]
    pub fn register_guard(mut self, name: &str, methods: Vec<GuardMethod>) -> Self {
        self.guards.register(name, methods);
        self
    }

    /// Registers an argument processor.
    #[must_use]
    pub fn register_processor(mut self, spec: ProcessorSpec) -> Self {
        self.processors.push(spec);
        self
    }

    /// Declares a synthetic local variable.
    #[must_use]
    pub fn synthetic_local(mut self, var: SyntheticLocalVar) -> Self {
        self.catalog.put_synthetic(var);
        self
    }

    /// Declares a thread local variable.
    #[must_use]
    pub fn thread_local(mut self, var: ThreadLocalVar) -> Self {
        self.catalog.put_thread(var);
        self
    }

    /// Declares a snippet.
    #[must_use]
    pub fn snippet(mut self, spec: SnippetSpec) -> Self {
        self.snippets.push(spec);
        self
    }

    /// Processes every declared fragment and assembles the session.
    ///
    /// Scope expressions are parsed, snippet and processor bodies are run
    /// through [`CodeTemplate::process`], and every referenced guard is
    /// resolved and validated. All checked failures surface here, before any
    /// weaving.
    ///
    /// # Errors
    ///
    /// Returns the first configuration failure encountered: scope parse
    /// errors, invalid context calls, guard resolution/validation failures,
    /// or references to unregistered processors.
    pub fn build(self) -> Result<WeavingSession> {
        let context_registry = Arc::new(self.contexts);
        let contexts = Arc::new(ContextEngine::new(Arc::clone(&context_registry)));
        let guards = Arc::new(GuardEngine::new(Arc::new(self.guards), Arc::clone(&contexts)));

        // -- argument processors --
        let mut processors = HashMap::new();
        for spec in self.processors {
            let mut methods = Vec::new();
            for method in spec.methods {
                let template = CodeTemplate::new(&spec.defined_in, method.body);
                let code = template.process(&self.catalog, &context_registry)?;

                if let Some(guard) = &method.guard {
                    let resolved = guards.resolve(guard)?;
                    guards.validate(&resolved, &GuardEngine::processor_context_set())?;
                }

                methods.push(ArgProcessorMethod {
                    name: method.name,
                    kind: method.kind,
                    guard: method.guard,
                    code: Arc::new(code),
                });
            }
            processors.insert(
                spec.name.clone(),
                Arc::new(ArgProcessor {
                    name: spec.name,
                    methods,
                }),
            );
        }

        // -- snippets --
        let mut snippets = Vec::new();
        for spec in self.snippets {
            let scope = ScopeFilter::parse(&spec.scope)?;
            let template = CodeTemplate::new(&spec.origin_class, spec.body);
            let code = template.process(&self.catalog, &context_registry)?;

            if let Some(guard) = &spec.guard {
                let resolved = guards.resolve(guard)?;
                guards.validate(&resolved, &GuardEngine::snippet_context_set())?;
            }

            for (_, invocation) in &spec.processor_invocations {
                if !processors.contains_key(&invocation.processor) {
                    return Err(Error::UnknownProcessor(invocation.processor.clone()));
                }
            }

            snippets.push(Arc::new(Snippet {
                origin_class: spec.origin_class,
                origin_method: spec.origin_method,
                scope,
                order: spec.order,
                guard: spec.guard,
                code: SnippetCode {
                    code,
                    invoked_processors: spec.processor_invocations.into_iter().collect(),
                },
            }));
        }

        snippets.sort_by_key(|snippet| snippet.ordering_key());

        debug!(
            "weaving session configured: {} snippets, {} processors",
            snippets.len(),
            processors.len()
        );

        let procs = ProcEngine::new(processors, Arc::clone(&guards));

        Ok(WeavingSession {
            contexts,
            guards,
            procs,
            catalog: self.catalog,
            snippets,
        })
    }
}

/// An immutable, fully validated weaving configuration with its per-run
/// caches.
///
/// A session may serve concurrent, independent compiled units: every shared
/// cache inside serializes only its lookup-or-insert, and all fragment code
/// is shared read-only.
#[derive(Debug)]
pub struct WeavingSession {
    contexts: Arc<ContextEngine>,
    guards: Arc<GuardEngine>,
    procs: ProcEngine,
    catalog: VariableCatalog,
    snippets: Vec<Arc<Snippet>>,
}

impl WeavingSession {
    /// Returns all snippets, in deterministic composition order.
    #[must_use]
    pub fn snippets(&self) -> &[Arc<Snippet>] {
        &self.snippets
    }

    /// Returns the snippets whose scope matches the given method, in
    /// composition order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if the method descriptor cannot be
    /// parsed.
    pub fn matching_snippets(
        &self,
        class_name: &str,
        method_name: &str,
        method_desc: &str,
    ) -> Result<Vec<Arc<Snippet>>> {
        let mut matched = Vec::new();
        for snippet in &self.snippets {
            if snippet.scope.matches(class_name, method_name, method_desc)? {
                matched.push(Arc::clone(snippet));
            }
        }
        Ok(matched)
    }

    /// Decides whether a snippet's guard admits the given shadow.
    ///
    /// # Errors
    ///
    /// Propagates guard resolution and validation failures.
    pub fn snippet_applicable(&self, snippet: &Snippet, shadow: &Shadow) -> Result<bool> {
        self.guards
            .applicable(snippet.guard.as_deref(), shadow, None)
    }

    /// Precomputes every static context value referenced by the given
    /// markings.
    ///
    /// # Errors
    ///
    /// Propagates context resolution and invocation failures.
    pub fn compute_static_info(&self, markings: &SnippetMarkings) -> Result<StaticInfo> {
        self.contexts.compute_static_info(markings)
    }

    /// Resolves every argument processor application for the given markings.
    ///
    /// # Errors
    ///
    /// Propagates processor and guard failures.
    pub fn compute_processors(&self, markings: &SnippetMarkings) -> Result<PIResolver> {
        self.procs.compute(markings)
    }

    /// Returns the session's context engine.
    #[must_use]
    pub fn contexts(&self) -> &ContextEngine {
        &self.contexts
    }

    /// Returns the session's guard engine.
    #[must_use]
    pub fn guards(&self) -> &GuardEngine {
        &self.guards
    }

    /// Returns the declared variable catalog.
    #[must_use]
    pub fn variables(&self) -> &VariableCatalog {
        &self.catalog
    }
}
