//! Method body container and builder.

use bitflags::bitflags;

use crate::{
    method::{
        descriptor::MethodDesc,
        insn::{first_real_fwd, Insn, LabelId},
    },
    Result,
};

bitflags! {
    /// Method access and property flags, as carried in the class file format.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodAccess: u16 {
        /// Declared public.
        const PUBLIC = 0x0001;
        /// Declared private.
        const PRIVATE = 0x0002;
        /// Declared protected.
        const PROTECTED = 0x0004;
        /// Declared static.
        const STATIC = 0x0008;
        /// Declared final.
        const FINAL = 0x0010;
        /// Declared synchronized.
        const SYNCHRONIZED = 0x0020;
        /// Compiler-generated bridge method.
        const BRIDGE = 0x0040;
        /// Declared with variable arity.
        const VARARGS = 0x0080;
        /// Declared native.
        const NATIVE = 0x0100;
        /// Declared abstract.
        const ABSTRACT = 0x0400;
        /// Compiler-generated synthetic method.
        const SYNTHETIC = 0x1000;
    }
}

/// One exception table entry: the protected range `[start, end)` and the
/// handler entry point, all addressed by labels so that they stay valid across
/// instruction-list edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryBlock {
    /// Label at the first protected instruction.
    pub start: LabelId,
    /// Label just past the last protected instruction.
    pub end: LabelId,
    /// Label at the handler entry.
    pub handler: LabelId,
    /// Internal name of the caught exception type, `None` for catch-all.
    pub catch_type: Option<String>,
}

/// An in-memory method body: the unit the weaving engine analyzes.
///
/// Bodies are produced by the (out-of-scope) class file reader or assembled
/// programmatically via [`MethodBodyBuilder`]. The engine never mutates a
/// target method's body; fragment bodies are cloned before transformation.
#[derive(Debug, Clone)]
pub struct MethodBody {
    /// Internal name of the declaring class, e.g. `my/pkg/TargetClass`.
    pub owner: String,
    /// Method name.
    pub name: String,
    /// Raw method descriptor.
    pub desc: String,
    /// Access and property flags.
    pub access: MethodAccess,
    /// The instruction stream.
    pub instructions: Vec<Insn>,
    /// Exception table.
    pub try_blocks: Vec<TryBlock>,
}

impl MethodBody {
    /// Returns the index of the given label in the instruction stream.
    #[must_use]
    pub fn label_index(&self, label: LabelId) -> Option<usize> {
        self.instructions
            .iter()
            .position(|insn| matches!(insn, Insn::Label(l) if *l == label))
    }

    /// Returns the index of the first real instruction of the body.
    #[must_use]
    pub fn first_real(&self) -> Option<usize> {
        first_real_fwd(&self.instructions, 0)
    }

    /// Returns the index of the first real instruction at or after the given
    /// label, the execution entry point the label stands for.
    #[must_use]
    pub fn real_at_label(&self, label: LabelId) -> Option<usize> {
        self.label_index(label)
            .and_then(|idx| first_real_fwd(&self.instructions, idx))
    }

    /// Returns `true` if the method is declared static.
    #[must_use]
    pub const fn is_static(&self) -> bool {
        self.access.contains(MethodAccess::STATIC)
    }

    /// Parses this body's method descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the descriptor is invalid.
    pub fn parsed_desc(&self) -> Result<MethodDesc> {
        MethodDesc::parse(&self.desc)
    }

    /// Returns the fully qualified `owner.name` form used in diagnostics.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.owner.replace('/', "."), self.name)
    }
}

/// Incremental builder for [`MethodBody`] values.
///
/// Used by tests and by configuration code that assembles fragment bodies
/// programmatically. Labels are allocated by the builder so that they are
/// unique within the body.
#[derive(Debug)]
pub struct MethodBodyBuilder {
    owner: String,
    name: String,
    desc: String,
    access: MethodAccess,
    instructions: Vec<Insn>,
    try_blocks: Vec<TryBlock>,
    next_label: u32,
}

impl MethodBodyBuilder {
    /// Starts a new builder for `owner.name` with the given descriptor.
    #[must_use]
    pub fn new(owner: &str, name: &str, desc: &str) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
            access: MethodAccess::PUBLIC | MethodAccess::STATIC,
            instructions: Vec::new(),
            try_blocks: Vec::new(),
            next_label: 0,
        }
    }

    /// Replaces the access flags (the default is `PUBLIC | STATIC`).
    #[must_use]
    pub fn access(mut self, access: MethodAccess) -> Self {
        self.access = access;
        self
    }

    /// Allocates a fresh label id without placing it.
    pub fn new_label(&mut self) -> LabelId {
        let label = LabelId(self.next_label);
        self.next_label += 1;
        label
    }

    /// Places a previously allocated label at the current position.
    #[must_use]
    pub fn label(mut self, label: LabelId) -> Self {
        self.instructions.push(Insn::Label(label));
        self
    }

    /// Appends an instruction.
    #[must_use]
    pub fn op(mut self, insn: Insn) -> Self {
        self.instructions.push(insn);
        self
    }

    /// Adds an exception table entry.
    #[must_use]
    pub fn try_block(
        mut self,
        start: LabelId,
        end: LabelId,
        handler: LabelId,
        catch_type: Option<&str>,
    ) -> Self {
        self.try_blocks.push(TryBlock {
            start,
            end,
            handler,
            catch_type: catch_type.map(str::to_string),
        });
        self
    }

    /// Finishes the body.
    #[must_use]
    pub fn build(self) -> MethodBody {
        MethodBody {
            owner: self.owner,
            name: self.name,
            desc: self.desc,
            access: self.access,
            instructions: self.instructions,
            try_blocks: self.try_blocks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::insn::ReturnKind;

    #[test]
    fn test_label_resolution() {
        let mut builder = MethodBodyBuilder::new("Test", "m", "()V");
        let l0 = builder.new_label();
        let body = builder
            .op(Insn::Other { mnemonic: "nop" })
            .label(l0)
            .op(Insn::Return(ReturnKind::Void))
            .build();

        assert_eq!(body.label_index(l0), Some(1));
        assert_eq!(body.real_at_label(l0), Some(2));
        assert_eq!(body.first_real(), Some(0));
    }

    #[test]
    fn test_access_flags() {
        let body = MethodBodyBuilder::new("Test", "m", "()V")
            .access(MethodAccess::PUBLIC)
            .build();
        assert!(!body.is_static());
        assert_eq!(body.full_name(), "Test.m");
    }
}
