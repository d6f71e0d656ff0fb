//! Processed fragment code.

use std::{collections::HashSet, sync::Arc};

use crate::{
    context::StaticContextMethod,
    method::{Insn, TryBlock},
    vars::{SyntheticLocalVar, ThreadLocalVar},
};

/// The immutable analysis results of a processed fragment.
///
/// Computed once by [`CodeTemplate::process`](crate::fragment::CodeTemplate::process)
/// and never mutated afterwards; every clone of a [`Code`] shares the same
/// `CodeInfo` behind an [`Arc`].
#[derive(Debug)]
pub struct CodeInfo {
    /// Synthetic local variables referenced by the fragment.
    pub synthetic_locals: HashSet<Arc<SyntheticLocalVar>>,
    /// Thread local variables referenced by the fragment.
    pub thread_locals: HashSet<Arc<ThreadLocalVar>>,
    /// Static context methods invoked by the fragment.
    pub context_methods: HashSet<StaticContextMethod>,
    /// Whether the fragment contains an exception handler that handles an
    /// exception without propagating it. Such a handler may break the stack
    /// height assumptions the weaver relies on, so it is flagged here.
    pub handles_exception: bool,
}

/// A validated, transformed fragment ready for composition.
///
/// A `Code` pairs a mutable instruction buffer with the shared, immutable
/// [`CodeInfo`] derived from it. Sharing versus copying is an explicit choice
/// at the call site: consumers that only read hold the `Code` (or an `Arc` of
/// it); a consumer that needs to mutate instructions independently calls
/// [`Clone::clone`], which duplicates the instruction buffer and exception
/// ranges while sharing the derived sets.
#[derive(Debug, Clone)]
pub struct Code {
    instructions: Vec<Insn>,
    try_blocks: Vec<TryBlock>,
    info: Arc<CodeInfo>,
}

impl Code {
    /// Assembles a `Code` from its transformed instruction stream, exception
    /// ranges and analysis results.
    #[must_use]
    pub fn new(instructions: Vec<Insn>, try_blocks: Vec<TryBlock>, info: CodeInfo) -> Self {
        Self {
            instructions,
            try_blocks,
            info: Arc::new(info),
        }
    }

    /// Returns the instruction stream.
    #[must_use]
    pub fn instructions(&self) -> &[Insn] {
        &self.instructions
    }

    /// Returns the instruction stream for in-place mutation.
    ///
    /// Only clones should be mutated when the `Code` is shared; the derived
    /// [`info`](Self::info) always describes the originally processed
    /// instructions.
    pub fn instructions_mut(&mut self) -> &mut Vec<Insn> {
        &mut self.instructions
    }

    /// Returns the exception ranges of the fragment.
    #[must_use]
    pub fn try_blocks(&self) -> &[TryBlock] {
        &self.try_blocks
    }

    /// Returns the shared analysis results.
    #[must_use]
    pub fn info(&self) -> &Arc<CodeInfo> {
        &self.info
    }

    /// Returns `true` if the fragment contains a non-propagating exception
    /// handler.
    #[must_use]
    pub fn handles_exception(&self) -> bool {
        self.info.handles_exception
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::ReturnKind;

    #[test]
    fn test_clone_shares_info_and_copies_instructions() {
        let code = Code::new(
            vec![Insn::Other { mnemonic: "nop" }],
            Vec::new(),
            CodeInfo {
                synthetic_locals: HashSet::new(),
                thread_locals: HashSet::new(),
                context_methods: HashSet::new(),
                handles_exception: false,
            },
        );

        let mut copy = code.clone();

        // Derived sets are reference-identical.
        assert!(Arc::ptr_eq(code.info(), copy.info()));

        // The instruction buffer is independent.
        copy.instructions_mut().push(Insn::Return(ReturnKind::Void));
        assert_eq!(code.instructions().len(), 1);
        assert_eq!(copy.instructions().len(), 2);
    }
}
