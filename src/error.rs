use thiserror::Error;

/// The generic Error type, which provides coverage for all checked errors this
/// library can potentially return.
///
/// All variants represent **initialization-time** failures: they are raised
/// while a weaving session is being configured or while fragment templates are
/// being processed, always before any weaving of the affected compiled unit is
/// attempted. Runtime failures in user-supplied guard or context code, as well
/// as internal invariant violations, are *not* represented here - they are
/// panics that abort the whole request (see the crate-level documentation on
/// error tiers).
///
/// # Error Categories
///
/// ## Configuration Errors
/// - [`Error::ScopeParse`] - Malformed scope expression
/// - [`Error::UnknownContext`] - Static context type not present in the registry
/// - [`Error::UnknownGuard`] - Guard not present in the registry
/// - [`Error::UnknownProcessor`] - Argument processor not present in the registry
///
/// ## Code Processing Errors
/// - [`Error::InvalidContextCall`] - Invalid static context method invocation
///   in a fragment body
/// - [`Error::Malformed`] - Structurally invalid method body or descriptor
///
/// ## Validation Errors
/// - [`Error::Guard`] - Guard resolution or validation failure
/// - [`Error::Processor`] - Argument processor applied where structurally
///   impossible
#[derive(Error, Debug)]
pub enum Error {
    /// A scope expression could not be parsed.
    ///
    /// The message contains the offending expression and the reason. A scope
    /// that fails to parse never silently degrades to "match everything".
    #[error("scope \"{expression}\": {message}")]
    ScopeParse {
        /// The scope expression that failed to parse
        expression: String,
        /// Why the expression was rejected
        message: String,
    },

    /// A fragment body invokes a static context method in an invalid way.
    ///
    /// Static context methods must take no arguments and return a primitive
    /// type or a string. The location names the owning fragment and the
    /// offending instruction.
    #[error("{location}: invocation of static context method {owner}.{name}: {message}")]
    InvalidContextCall {
        /// Owning fragment and instruction index, e.g. `snippet Foo.before:12`
        location: String,
        /// Owner type of the invoked context method
        owner: String,
        /// Name of the invoked context method
        name: String,
        /// Why the invocation was rejected
        message: String,
    },

    /// A static context type was requested that is not in the session registry.
    #[error("static context type {0} is not registered")]
    UnknownContext(String),

    /// A guard was referenced that is not in the session registry.
    #[error("guard {0} is not registered")]
    UnknownGuard(String),

    /// An argument processor was referenced that is not in the session registry.
    #[error("argument processor {0} is not registered")]
    UnknownProcessor(String),

    /// Guard resolution or validation failed.
    ///
    /// Raised when a guard declares zero or multiple guard methods, or when a
    /// guard method has an invalid shape (non-boolean return, non-static, or a
    /// parameter type outside the allowed context set). The message names the
    /// offending guard and type.
    #[error("{0}")]
    Guard(String),

    /// An argument processor was applied at a structurally impossible place.
    ///
    /// Call-site argument processing requires a shadow with exactly one region
    /// end, and that end must be a method invocation instruction.
    #[error("{0}")]
    Processor(String),

    /// A method body or type descriptor is structurally invalid.
    #[error("malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the malformed input
        message: String,
        /// The source file in which this error was raised
        file: &'static str,
        /// The source line in which this error was raised
        line: u32,
    },

    /// Failed to lock a shared cache.
    ///
    /// Raised when a cache mutex was poisoned by a panicking thread. The
    /// request owning the poisoned cache cannot continue.
    #[error("failed to lock target")]
    LockError,

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
