//! In-memory method model: instructions, bodies and type descriptors.
//!
//! Everything the engine knows about a compiled method lives here. The model
//! deliberately stops at the shapes weaving needs - it is not a full class
//! file object model, and instruction encoding/decoding belongs to the
//! (external) reader and writer for the binary format.

mod body;
mod descriptor;
mod insn;

pub use body::{MethodAccess, MethodBody, MethodBodyBuilder, TryBlock};
pub use descriptor::{MethodDesc, TypeDesc};
pub use insn::{
    first_real_fwd, first_real_rev, next_real, FieldOp, Insn, InvokeKind, JumpKind, LabelId,
    ReturnKind, SlotKind, StackOp,
};
