//! Snippets: user-authored fragments bound to a scope, an ordering and an
//! optional guard.

use std::collections::HashMap;

use crate::{argproc::ArgumentProcessorMode, fragment::Code, scope::ScopeFilter};

/// One declared argument processor application inside a snippet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcInvocation {
    /// Name of the applied processor.
    pub processor: String,
    /// Whether the current method's or a call site's arguments are processed.
    pub mode: ArgumentProcessorMode,
}

/// The processed code of a snippet, together with the argument processor
/// applications it declares.
///
/// Processor invocations are keyed by the instruction index of the
/// application site in the snippet's raw body; the key identifies the
/// application when its resolved instances are looked up per shadow.
#[derive(Debug, Clone)]
pub struct SnippetCode {
    /// The processed fragment.
    pub code: Code,
    /// Declared processor applications, keyed by raw instruction index.
    pub invoked_processors: HashMap<usize, ProcInvocation>,
}

/// A user-authored instrumentation fragment: where it was defined, which
/// methods it applies to, its composition order, its guard and its processed
/// code.
#[derive(Debug)]
pub struct Snippet {
    /// Internal name of the defining instrumentation class.
    pub origin_class: String,
    /// Name of the defining method.
    pub origin_method: String,
    /// The scope selecting eligible target methods.
    pub scope: ScopeFilter,
    /// Composition order: snippets at one shadow are merged in ascending
    /// order, ties broken by origin for determinism.
    pub order: i32,
    /// Guard gating this snippet, if any.
    pub guard: Option<String>,
    /// The processed snippet code.
    pub code: SnippetCode,
}

impl Snippet {
    /// Returns the `class.method` name of the snippet's origin.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.origin_class.replace('/', "."), self.origin_method)
    }

    /// Returns the deterministic composition key: declared order first, then
    /// origin name.
    #[must_use]
    pub fn ordering_key(&self) -> (i32, String) {
        (self.order, self.full_name())
    }
}
