//! Static contexts: values derived from structural analysis of the target
//! method.
//!
//! A *static context* is a capability object that, seeded with a
//! [`Shadow`], answers no-argument queries returning primitives or strings.
//! Context types are registered explicitly - type name to constructor plus a
//! declared method table - at configuration time; there is no runtime
//! discovery. The [`ContextEngine`] caches one instance per context type for
//! the lifetime of the session and seeds it with the shadow immediately
//! before each use.

mod builtin;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use log::debug;

use crate::{
    method::TypeDesc,
    shadow::{Shadow, ShadowId},
    snippet::Snippet,
    Error, Result,
};

pub use builtin::{
    register_builtins, BasicBlockStaticContext, LoopStaticContext, MethodStaticContext,
    BASIC_BLOCK_CONTEXT, LOOP_CONTEXT, METHOD_CONTEXT,
};

/// Well-known type name of the dynamic context interface (runtime values at a
/// shadow). Recognized in fragment parameters, but resolved by the weaver,
/// not by this engine.
pub const DYNAMIC_CONTEXT: &str = "classweave.DynamicContext";

/// Well-known type name of the per-argument context supplied to argument
/// processor fragments and their guards.
pub const ARGUMENT_CONTEXT: &str = "classweave.ArgumentContext";

/// Well-known type name of the argument processor context through which
/// snippets apply processors.
pub const PROCESSOR_CONTEXT: &str = "classweave.ArgumentProcessorContext";

/// The kind of context a fragment parameter consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKind {
    /// A registered static context type.
    Static,
    /// The dynamic context interface.
    Dynamic,
    /// The per-argument context.
    Argument,
    /// The argument processor context.
    ArgumentProcessor,
}

impl ContextKind {
    /// Classifies a parameter type name, given the session's context
    /// registry. Returns `None` for ordinary (non-context) types.
    #[must_use]
    pub fn for_type(name: &str, registry: &ContextRegistry) -> Option<Self> {
        match name {
            DYNAMIC_CONTEXT => Some(ContextKind::Dynamic),
            ARGUMENT_CONTEXT => Some(ContextKind::Argument),
            PROCESSOR_CONTEXT => Some(ContextKind::ArgumentProcessor),
            _ if registry.contains(name) => Some(ContextKind::Static),
            _ => None,
        }
    }
}

/// A value produced by a static context method.
///
/// Static context methods are restricted to primitive and string returns, so
/// this closed enum covers everything they can yield.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    /// A boolean value.
    Bool(bool),
    /// A byte value.
    Byte(i8),
    /// A UTF-16 code unit.
    Char(u16),
    /// A short value.
    Short(i16),
    /// An int value.
    Int(i32),
    /// A long value.
    Long(i64),
    /// A float value.
    Float(f32),
    /// A double value.
    Double(f64),
    /// A string value.
    Str(String),
}

/// The kind of a [`ContextValue`], used for validating declared context
/// method return types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ContextValueKind {
    /// boolean
    Bool,
    /// byte
    Byte,
    /// char
    Char,
    /// short
    Short,
    /// int
    Int,
    /// long
    Long,
    /// float
    Float,
    /// double
    Double,
    /// java.lang.String
    Str,
}

impl ContextValueKind {
    /// Maps an allowed return type to its value kind: any primitive, or
    /// `java.lang.String`. Everything else - including void - is not a legal
    /// static context method return type and yields `None`.
    #[must_use]
    pub fn from_type(desc: &TypeDesc) -> Option<Self> {
        match desc {
            TypeDesc::Boolean => Some(Self::Bool),
            TypeDesc::Byte => Some(Self::Byte),
            TypeDesc::Char => Some(Self::Char),
            TypeDesc::Short => Some(Self::Short),
            TypeDesc::Int => Some(Self::Int),
            TypeDesc::Long => Some(Self::Long),
            TypeDesc::Float => Some(Self::Float),
            TypeDesc::Double => Some(Self::Double),
            TypeDesc::Object(name) if name == "java.lang.String" => Some(Self::Str),
            _ => None,
        }
    }
}

impl ContextValue {
    /// Returns the kind of this value.
    #[must_use]
    pub const fn kind(&self) -> ContextValueKind {
        match self {
            ContextValue::Bool(_) => ContextValueKind::Bool,
            ContextValue::Byte(_) => ContextValueKind::Byte,
            ContextValue::Char(_) => ContextValueKind::Char,
            ContextValue::Short(_) => ContextValueKind::Short,
            ContextValue::Int(_) => ContextValueKind::Int,
            ContextValue::Long(_) => ContextValueKind::Long,
            ContextValue::Float(_) => ContextValueKind::Float,
            ContextValue::Double(_) => ContextValueKind::Double,
            ContextValue::Str(_) => ContextValueKind::Str,
        }
    }
}

/// A static context implementation.
///
/// Implementations are constructed through the registry's constructor, seeded
/// with a shadow, and then queried by method name. The engine guarantees that
/// `seed` and the subsequent `call`s happen under one per-instance lock, so
/// implementations may keep per-shadow state in plain fields and may cache
/// per-method analysis results across shadows.
pub trait StaticContext: Send {
    /// Installs the shadow whose values subsequent calls compute.
    fn seed(&mut self, shadow: &Shadow);

    /// Computes the value of the named context method for the seeded shadow.
    ///
    /// # Errors
    ///
    /// Returns an error if the method name is unknown to this context type;
    /// a well-configured session validates method names at template
    /// processing time, so this surfaces only on registry/implementation
    /// mismatch.
    fn call(&self, method: &str) -> Result<ContextValue>;
}

/// Constructor for a registered static context type.
pub type ContextCtor = fn() -> Box<dyn StaticContext>;

/// Registration record of one static context type.
#[derive(Clone)]
pub struct ContextTypeDef {
    /// Canonical dotted type name under which fragments reference the type.
    pub name: String,
    /// Constructor invoked lazily, once per session.
    pub ctor: ContextCtor,
    /// Declared method table: method name to return kind.
    pub methods: HashMap<String, ContextValueKind>,
}

impl std::fmt::Debug for ContextTypeDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextTypeDef")
            .field("name", &self.name)
            .field("methods", &self.methods)
            .finish()
    }
}

/// Registry of static context types, built at configuration time.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    types: HashMap<String, ContextTypeDef>,
}

impl ContextRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a context type under its canonical name.
    pub fn register(&mut self, def: ContextTypeDef) {
        self.types.insert(def.name.clone(), def);
    }

    /// Returns `true` if the given type name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Returns the registration record for the given type name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ContextTypeDef> {
        self.types.get(name)
    }
}

/// One static context method referenced by a fragment.
///
/// Identity is owner type plus method name - static context methods take no
/// arguments, so there is no overloading and no signature in the identity.
#[derive(Debug, Clone)]
pub struct StaticContextMethod {
    /// Canonical dotted name of the owning context type.
    pub owner: String,
    /// Method name.
    pub name: String,
    /// Declared return kind.
    pub return_kind: ContextValueKind,
}

impl StaticContextMethod {
    /// Returns the `owner.name` identity of this method.
    #[must_use]
    pub fn id(&self) -> String {
        format!("{}.{}", self.owner, self.name)
    }
}

impl PartialEq for StaticContextMethod {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner && self.name == other.name
    }
}

impl Eq for StaticContextMethod {}

impl std::hash::Hash for StaticContextMethod {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.owner.hash(state);
        self.name.hash(state);
    }
}

/// Shared handle to a cached static context instance.
type ContextInstance = Arc<Mutex<Box<dyn StaticContext>>>;

/// Resolves and caches static context instances, one per context type per
/// session.
///
/// The instance cache's critical section covers only the lookup-or-insert;
/// seeding and invocation happen under the per-instance lock, so concurrent
/// weaving of independent compiled units never corrupts the cache and never
/// serializes on another unit's context computation.
pub struct ContextEngine {
    registry: Arc<ContextRegistry>,
    instances: Mutex<HashMap<String, ContextInstance>>,
}

impl ContextEngine {
    /// Creates an engine over the given registry.
    #[must_use]
    pub fn new(registry: Arc<ContextRegistry>) -> Self {
        Self {
            registry,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the registry this engine resolves against.
    #[must_use]
    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    /// Returns the cached instance for a context type, constructing it on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownContext`] if the type is not registered, or
    /// [`Error::LockError`] if the cache mutex is poisoned.
    pub fn instance(&self, context_type: &str) -> Result<ContextInstance> {
        let def = self
            .registry
            .get(context_type)
            .ok_or_else(|| Error::UnknownContext(context_type.to_string()))?;

        let mut cache = self.instances.lock().map_err(|_| Error::LockError)?;
        let instance = cache.entry(context_type.to_string()).or_insert_with(|| {
            debug!("constructing static context instance for {context_type}");
            Arc::new(Mutex::new((def.ctor)()))
        });
        Ok(Arc::clone(instance))
    }

    /// Seeds the cached instance of `context_type` with `shadow` and invokes
    /// the named context method.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownContext`] for an unregistered type, or
    /// whatever the context implementation reports for an unknown method.
    pub fn value(
        &self,
        context_type: &str,
        method: &str,
        shadow: &Shadow,
    ) -> Result<ContextValue> {
        let instance = self.instance(context_type)?;
        let mut instance = instance.lock().map_err(|_| Error::LockError)?;
        instance.seed(shadow);
        instance.call(method)
    }

    /// Precomputes, for every fragment and every matched shadow, the value of
    /// every static context method the fragment references.
    ///
    /// Later composition steps read the precomputed results from the returned
    /// [`StaticInfo`] instead of re-resolving context instances.
    ///
    /// # Errors
    ///
    /// Propagates any resolution or invocation error.
    pub fn compute_static_info(
        &self,
        markings: &[(Arc<Snippet>, Vec<Arc<Shadow>>)],
    ) -> Result<StaticInfo> {
        let mut values = HashMap::new();

        for (snippet, shadows) in markings {
            for scm in &snippet.code.code.info().context_methods {
                for shadow in shadows {
                    let value = self.value(&scm.owner, &scm.name, shadow)?;
                    values.insert((shadow.id(), scm.id()), value);
                }
            }
        }

        Ok(StaticInfo { values })
    }
}

impl std::fmt::Debug for ContextEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextEngine")
            .field("registry", &self.registry)
            .finish()
    }
}

/// Precomputed static context values, keyed by shadow and method identity.
#[derive(Debug, Default)]
pub struct StaticInfo {
    values: HashMap<(ShadowId, String), ContextValue>,
}

impl StaticInfo {
    /// Returns `true` if a value was computed for the given shadow and
    /// `owner.name` context method.
    #[must_use]
    pub fn contains(&self, shadow: ShadowId, owner: &str, name: &str) -> bool {
        self.values.contains_key(&(shadow, format!("{owner}.{name}")))
    }

    /// Returns the precomputed value for the given shadow and context method.
    #[must_use]
    pub fn get(&self, shadow: ShadowId, owner: &str, name: &str) -> Option<&ContextValue> {
        self.values.get(&(shadow, format!("{owner}.{name}")))
    }

    /// Returns the number of precomputed values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no values were computed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::MethodBodyBuilder;
    use crate::method::{Insn, ReturnKind};

    struct Probe {
        seeded: u32,
    }

    impl StaticContext for Probe {
        fn seed(&mut self, _shadow: &Shadow) {
            self.seeded += 1;
        }

        fn call(&self, method: &str) -> Result<ContextValue> {
            match method {
                "seedCount" => Ok(ContextValue::Int(self.seeded as i32)),
                other => Err(Error::Error(format!("unknown context method {other}"))),
            }
        }
    }

    fn probe_registry() -> ContextRegistry {
        let mut registry = ContextRegistry::new();
        registry.register(ContextTypeDef {
            name: "test.Probe".to_string(),
            ctor: || Box::new(Probe { seeded: 0 }),
            methods: HashMap::from([("seedCount".to_string(), ContextValueKind::Int)]),
        });
        registry
    }

    fn test_shadow(id: u64) -> Shadow {
        let body = MethodBodyBuilder::new("Test", "m", "()V")
            .op(Insn::Return(ReturnKind::Void))
            .build();
        Shadow::new(ShadowId(id), Arc::new(body), 0, vec![0])
    }

    #[test]
    fn test_one_instance_per_type() {
        let engine = ContextEngine::new(Arc::new(probe_registry()));
        let shadow = test_shadow(1);

        // Two value computations seed the same cached instance twice.
        assert_eq!(
            engine.value("test.Probe", "seedCount", &shadow).unwrap(),
            ContextValue::Int(1)
        );
        assert_eq!(
            engine.value("test.Probe", "seedCount", &shadow).unwrap(),
            ContextValue::Int(2)
        );
    }

    #[test]
    fn test_unknown_context_type() {
        let engine = ContextEngine::new(Arc::new(probe_registry()));
        let shadow = test_shadow(1);
        assert!(matches!(
            engine.value("test.Missing", "m", &shadow),
            Err(Error::UnknownContext(_))
        ));
    }

    #[test]
    fn test_value_kind_mapping() {
        assert_eq!(
            ContextValueKind::from_type(&TypeDesc::Int),
            Some(ContextValueKind::Int)
        );
        assert_eq!(
            ContextValueKind::from_type(&TypeDesc::Object("java.lang.String".to_string())),
            Some(ContextValueKind::Str)
        );
        assert_eq!(ContextValueKind::from_type(&TypeDesc::Void), None);
        assert_eq!(
            ContextValueKind::from_type(&TypeDesc::Object("java.lang.Object".to_string())),
            None
        );
    }
}
