//! Instruction model for method bodies.
//!
//! The weaving engine does not encode or decode bytecode - a reader/writer for
//! the binary format is assumed to exist. What it does need is an in-memory
//! instruction representation rich enough to reason about control flow, method
//! invocations and field accesses. [`Insn`] is that representation: a closed
//! enum over the instruction shapes the engine inspects, with everything else
//! collapsed into [`Insn::Other`].
//!
//! Instructions are stored in a flat `Vec<Insn>` and referenced by index.
//! Labels are *virtual* instructions: they occupy a position in the stream and
//! serve as branch targets, but are skipped by the "real instruction" cursors
//! used during analysis.

use strum::Display;

/// Identifier of a [`Insn::Label`] pseudo-instruction within one method body.
///
/// Labels are allocated by whoever builds the body (the decoder, a builder, or
/// a code transformation) and are only meaningful within that body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

/// The jump instruction family.
///
/// Covers the unconditional `goto` and all conditional branches. Subroutine
/// jumps are not modeled; bodies using them are rejected upstream.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum JumpKind {
    /// Unconditional jump. Control never falls through.
    Goto,
    /// Branch if the top of stack is zero.
    IfEq,
    /// Branch if the top of stack is non-zero.
    IfNe,
    /// Branch if the top of stack is less than zero.
    IfLt,
    /// Branch if the top of stack is greater or equal to zero.
    IfGe,
    /// Branch if the top of stack is greater than zero.
    IfGt,
    /// Branch if the top of stack is less or equal to zero.
    IfLe,
    /// Branch if the two top integer operands are equal.
    IfICmpEq,
    /// Branch if the two top integer operands differ.
    IfICmpNe,
    /// Branch on integer less-than comparison.
    IfICmpLt,
    /// Branch on integer greater-or-equal comparison.
    IfICmpGe,
    /// Branch if the two top reference operands are identical.
    IfACmpEq,
    /// Branch if the two top reference operands are not identical.
    IfACmpNe,
    /// Branch if the top reference operand is null.
    IfNull,
    /// Branch if the top reference operand is not null.
    IfNonNull,
}

impl JumpKind {
    /// Returns `true` for every kind except [`JumpKind::Goto`].
    ///
    /// Conditional jumps have a fall-through successor; `goto` does not.
    #[must_use]
    pub const fn is_conditional(self) -> bool {
        !matches!(self, JumpKind::Goto)
    }
}

/// The value category carried by a return instruction.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum ReturnKind {
    /// `return` without a value.
    Void,
    /// Integer-category return (covers boolean, byte, char, short, int).
    Int,
    /// Wide long return.
    Long,
    /// Float return.
    Float,
    /// Wide double return.
    Double,
    /// Reference return.
    Reference,
}

/// Dispatch kind of a method invocation instruction.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum InvokeKind {
    /// Static dispatch, no receiver.
    Static,
    /// Virtual dispatch through a class receiver.
    Virtual,
    /// Non-virtual dispatch (constructors, private and super calls).
    Special,
    /// Dispatch through an interface receiver.
    Interface,
}

/// Direction and addressing of a field access instruction.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum FieldOp {
    /// Read of a static field.
    GetStatic,
    /// Write of a static field.
    PutStatic,
    /// Read of an instance field.
    GetField,
    /// Write of an instance field.
    PutField,
}

impl FieldOp {
    /// Returns `true` for static field accesses.
    #[must_use]
    pub const fn is_static(self) -> bool {
        matches!(self, FieldOp::GetStatic | FieldOp::PutStatic)
    }

    /// Returns `true` for field reads.
    #[must_use]
    pub const fn is_read(self) -> bool {
        matches!(self, FieldOp::GetStatic | FieldOp::GetField)
    }
}

/// Pure operand-stack manipulation instructions.
///
/// Only the ops the engine itself emits (for thread-local access rewriting)
/// plus their immediate family are modeled explicitly.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum StackOp {
    /// Discard the top slot.
    Pop,
    /// Discard the top two slots.
    Pop2,
    /// Duplicate the top slot.
    Dup,
    /// Duplicate the top slot beneath the second slot.
    DupX1,
    /// Duplicate the top slot beneath the third slot.
    DupX2,
    /// Swap the two top slots.
    Swap,
}

/// Value category of a local variable load or store.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum SlotKind {
    /// Integer-category slot.
    Int,
    /// Wide long slot pair.
    Long,
    /// Float slot.
    Float,
    /// Wide double slot pair.
    Double,
    /// Reference slot.
    Reference,
}

/// One instruction in a method body.
///
/// The variants cover exactly what the weaving engine needs to see: control
/// flow ([`Insn::Jump`], the switches, [`Insn::Return`], [`Insn::Throw`]),
/// the invocations and field accesses that fragment analysis classifies, the
/// stack and local-variable operations that code transformations emit, and
/// [`Insn::Label`] as a virtual position marker. Any instruction the engine
/// treats as opaque straight-line code is an [`Insn::Other`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insn {
    /// Virtual position marker; branch targets and exception ranges refer to it.
    Label(LabelId),
    /// Conditional or unconditional jump to a label.
    Jump {
        /// The jump family member.
        kind: JumpKind,
        /// Branch target label.
        target: LabelId,
    },
    /// Dense-range switch: `value - low` indexes into `targets`.
    TableSwitch {
        /// Lowest case value covered by the table.
        low: i32,
        /// One target per consecutive case value.
        targets: Vec<LabelId>,
        /// Target when the value is outside the table.
        default: LabelId,
    },
    /// Sparse switch over explicit case keys.
    LookupSwitch {
        /// Case keys, parallel to `targets`.
        keys: Vec<i32>,
        /// One target per case key.
        targets: Vec<LabelId>,
        /// Target when no key matches.
        default: LabelId,
    },
    /// Method return.
    Return(ReturnKind),
    /// Throw the exception reference on top of the stack.
    Throw,
    /// Method invocation.
    Invoke {
        /// Dispatch kind.
        kind: InvokeKind,
        /// Internal name of the owner type, e.g. `java/lang/Thread`.
        owner: String,
        /// Method name.
        name: String,
        /// Method descriptor, e.g. `()Ljava/lang/Thread;`.
        desc: String,
    },
    /// Field access.
    Field {
        /// Access direction and addressing.
        op: FieldOp,
        /// Internal name of the owner type.
        owner: String,
        /// Field name.
        name: String,
        /// Field type descriptor.
        desc: String,
    },
    /// Operand stack manipulation.
    Stack(StackOp),
    /// Local variable load.
    Load {
        /// Value category of the slot.
        kind: SlotKind,
        /// Slot index.
        slot: u16,
    },
    /// Local variable store.
    Store {
        /// Value category of the slot.
        kind: SlotKind,
        /// Slot index.
        slot: u16,
    },
    /// Push a small integer constant.
    PushInt(i32),
    /// Any instruction the engine treats as opaque straight-line code.
    Other {
        /// Mnemonic, for diagnostics only.
        mnemonic: &'static str,
    },
}

impl Insn {
    /// Returns `true` for virtual instructions (labels), which occupy a
    /// position in the stream but do not execute.
    #[must_use]
    pub const fn is_virtual(&self) -> bool {
        matches!(self, Insn::Label(_))
    }

    /// Returns `true` for return instructions of any kind.
    #[must_use]
    pub const fn is_return(&self) -> bool {
        matches!(self, Insn::Return(_))
    }

    /// Returns `true` for instructions that exit the method (return or throw).
    #[must_use]
    pub const fn is_exit(&self) -> bool {
        matches!(self, Insn::Return(_) | Insn::Throw)
    }
}

/// Returns the index of the first real (non-virtual) instruction at or after
/// `from`, or `None` if only virtual instructions remain.
#[must_use]
pub fn first_real_fwd(insns: &[Insn], from: usize) -> Option<usize> {
    insns
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, insn)| !insn.is_virtual())
        .map(|(idx, _)| idx)
}

/// Returns the index of the first real (non-virtual) instruction at or before
/// `from`, scanning backwards, or `None` if only virtual instructions precede.
#[must_use]
pub fn first_real_rev(insns: &[Insn], from: usize) -> Option<usize> {
    if insns.is_empty() {
        return None;
    }
    insns[..=from.min(insns.len() - 1)]
        .iter()
        .rposition(|insn| !insn.is_virtual())
}

/// Returns the index of the first real instruction strictly after `from`.
#[must_use]
pub fn next_real(insns: &[Insn], from: usize) -> Option<usize> {
    first_real_fwd(insns, from + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_insn_cursors() {
        let insns = vec![
            Insn::Label(LabelId(0)),
            Insn::Other { mnemonic: "nop" },
            Insn::Label(LabelId(1)),
            Insn::Return(ReturnKind::Void),
        ];

        assert_eq!(first_real_fwd(&insns, 0), Some(1));
        assert_eq!(first_real_fwd(&insns, 2), Some(3));
        assert_eq!(first_real_rev(&insns, 2), Some(1));
        assert_eq!(first_real_rev(&insns, 0), None);
        assert_eq!(next_real(&insns, 1), Some(3));
        assert_eq!(next_real(&insns, 3), None);
    }

    #[test]
    fn test_jump_kind_conditionality() {
        assert!(!JumpKind::Goto.is_conditional());
        assert!(JumpKind::IfEq.is_conditional());
        assert!(JumpKind::IfNull.is_conditional());
    }

    #[test]
    fn test_field_op_classification() {
        assert!(FieldOp::GetStatic.is_static());
        assert!(FieldOp::PutStatic.is_static());
        assert!(!FieldOp::GetField.is_static());
        assert!(FieldOp::GetStatic.is_read());
        assert!(!FieldOp::PutField.is_read());
    }
}
