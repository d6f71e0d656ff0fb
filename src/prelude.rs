//! Convenient re-exports of the most commonly used types.
//!
//! ```rust
//! use classweave::prelude::*;
//! ```

pub use crate::{
    argproc::{
        ArgProcessor, ArgProcessorKind, ArgProcessorMethod, ArgumentContext,
        ArgumentProcessorMode, PIResolver, ProcInstance, ProcMethodInstance,
    },
    context::{
        ContextEngine, ContextRegistry, ContextTypeDef, ContextValue, ContextValueKind,
        StaticContext, StaticContextMethod, StaticInfo,
    },
    fragment::{Code, CodeInfo, CodeTemplate},
    guard::{GuardContextKind, GuardEngine, GuardInvocation, GuardMethod, GuardParamKind},
    method::{
        FieldOp, Insn, InvokeKind, JumpKind, LabelId, MethodAccess, MethodBody,
        MethodBodyBuilder, MethodDesc, ReturnKind, SlotKind, StackOp, TryBlock, TypeDesc,
    },
    scope::ScopeFilter,
    session::{
        ProcMethodSpec, ProcessorSpec, SessionBuilder, SnippetMarkings, SnippetSpec,
        WeavingSession,
    },
    snippet::{ProcInvocation, Snippet, SnippetCode},
    vars::{SyntheticLocalInit, SyntheticLocalVar, ThreadLocalVar, VariableCatalog},
    Error, Result, Shadow, ShadowId,
};
