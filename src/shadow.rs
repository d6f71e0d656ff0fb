//! Shadows: matched instrumentation points.

use std::sync::Arc;

use crate::method::MethodBody;

/// Stable identifier of a [`Shadow`], unique within one weaving run.
///
/// Shadows are keyed by id in every per-shadow cache, taking the place of
/// object identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShadowId(pub u64);

/// One matched instrumentation point inside a method.
///
/// A shadow covers the instruction region from its start up to any of its end
/// instructions. Shadows are produced fresh per matched location by the
/// (out-of-scope) marker; the engine only consumes them.
#[derive(Debug, Clone)]
pub struct Shadow {
    id: ShadowId,
    method: Arc<MethodBody>,
    region_start: usize,
    region_ends: Vec<usize>,
}

impl Shadow {
    /// Creates a shadow over the given instruction region.
    ///
    /// `region_ends` must contain at least one instruction index; exactly one
    /// is required when the shadow is used for call-site argument processing,
    /// which is checked at the point of use.
    #[must_use]
    pub fn new(
        id: ShadowId,
        method: Arc<MethodBody>,
        region_start: usize,
        region_ends: Vec<usize>,
    ) -> Self {
        debug_assert!(!region_ends.is_empty());
        Self {
            id,
            method,
            region_start,
            region_ends,
        }
    }

    /// Returns the shadow's stable identifier.
    #[must_use]
    pub const fn id(&self) -> ShadowId {
        self.id
    }

    /// Returns the method containing the shadow.
    #[must_use]
    pub fn method(&self) -> &Arc<MethodBody> {
        &self.method
    }

    /// Returns the instruction index where the region starts.
    #[must_use]
    pub const fn region_start(&self) -> usize {
        self.region_start
    }

    /// Returns the instruction indices where the region ends.
    #[must_use]
    pub fn region_ends(&self) -> &[usize] {
        &self.region_ends
    }
}

impl PartialEq for Shadow {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Shadow {}

impl std::hash::Hash for Shadow {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
