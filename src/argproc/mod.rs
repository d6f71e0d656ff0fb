//! Argument processors: per-argument-type fragments applied to method or
//! call-site arguments.

mod engine;

use std::sync::Arc;

use strum::{Display, EnumIter};

use crate::{fragment::Code, method::TypeDesc};

pub use engine::{PIResolver, ProcEngine, ProcInstance, ProcMethodInstance};

/// The closed classification of argument types a processor method can
/// declare.
///
/// Each kind may additionally accept a set of *secondary* kinds - always
/// strictly narrower ones, so a processor for a narrow kind can never
/// silently cover wider or object arguments.
#[derive(Debug, Display, EnumIter, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum ArgProcessorKind {
    /// boolean arguments.
    Boolean,
    /// byte arguments.
    Byte,
    /// char arguments.
    Char,
    /// double arguments.
    Double,
    /// float arguments.
    Float,
    /// int arguments.
    Int,
    /// long arguments.
    Long,
    /// short arguments.
    Short,
    /// Reference (object and array) arguments.
    Object,
}

impl ArgProcessorKind {
    /// Returns the narrower kinds this kind also accepts.
    ///
    /// The containment is strictly one-directional: `Int` accepts `Boolean`,
    /// `Byte` and `Short` arguments, but none of those accept `Int`.
    #[must_use]
    pub const fn secondary_kinds(self) -> &'static [ArgProcessorKind] {
        match self {
            ArgProcessorKind::Byte => &[ArgProcessorKind::Boolean],
            ArgProcessorKind::Short => &[ArgProcessorKind::Boolean, ArgProcessorKind::Byte],
            ArgProcessorKind::Int => &[
                ArgProcessorKind::Boolean,
                ArgProcessorKind::Byte,
                ArgProcessorKind::Short,
            ],
            _ => &[],
        }
    }

    /// Returns `true` if a processor method declared for this kind handles
    /// an argument of kind `arg`, either as its primary kind or as one of
    /// its secondary kinds.
    #[must_use]
    pub fn handles(self, arg: ArgProcessorKind) -> bool {
        self == arg || self.secondary_kinds().contains(&arg)
    }

    /// Classifies an argument's static type.
    ///
    /// Objects and arrays map to [`ArgProcessorKind::Object`].
    ///
    /// # Panics
    ///
    /// Panics on `void`, which cannot occur as an argument type; reaching it
    /// is a defect in the engine.
    #[must_use]
    pub fn from_type(desc: &TypeDesc) -> Self {
        match desc {
            TypeDesc::Boolean => ArgProcessorKind::Boolean,
            TypeDesc::Byte => ArgProcessorKind::Byte,
            TypeDesc::Char => ArgProcessorKind::Char,
            TypeDesc::Double => ArgProcessorKind::Double,
            TypeDesc::Float => ArgProcessorKind::Float,
            TypeDesc::Int => ArgProcessorKind::Int,
            TypeDesc::Long => ArgProcessorKind::Long,
            TypeDesc::Short => ArgProcessorKind::Short,
            TypeDesc::Object(_) | TypeDesc::Array(_) => ArgProcessorKind::Object,
            TypeDesc::Void => panic!("conversion from void not defined"),
        }
    }
}

/// The two ways a processor application resolves its argument list.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentProcessorMode {
    /// Process the arguments of the instrumented method itself.
    #[strum(serialize = "method arguments")]
    MethodArgs,
    /// Process the arguments of the invocation at the shadow's single end.
    #[strum(serialize = "call site arguments")]
    CallsiteArgs,
}

/// The per-argument context supplied to processor fragments and their
/// guards: which argument is being processed, its static type and the total
/// argument count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentContext {
    /// Zero-based position of the processed argument.
    pub position: usize,
    /// Static type of the processed argument.
    pub type_desc: TypeDesc,
    /// Total number of arguments in the processed list.
    pub total_count: usize,
}

/// One method of an argument processor: the kind it declares, an optional
/// guard, and its processed fragment code.
#[derive(Debug, Clone)]
pub struct ArgProcessorMethod {
    /// Method name, for diagnostics.
    pub name: String,
    /// The argument kind this method processes.
    pub kind: ArgProcessorKind,
    /// Guard gating this method, if any.
    pub guard: Option<String>,
    /// The processed fragment, shared read-only between instances.
    pub code: Arc<Code>,
}

impl ArgProcessorMethod {
    /// Returns `true` if this method handles arguments of the given kind.
    #[must_use]
    pub fn handles(&self, kind: ArgProcessorKind) -> bool {
        self.kind.handles(kind)
    }
}

/// A registered argument processor: a named collection of processor methods.
#[derive(Debug, Clone)]
pub struct ArgProcessor {
    /// Processor name, the identity it is registered and referenced under.
    pub name: String,
    /// The processor's methods.
    pub methods: Vec<ArgProcessorMethod>,
}
