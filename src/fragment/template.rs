//! Raw fragment bodies and their validation/transformation into [`Code`].
//!
//! A [`CodeTemplate`] holds one snippet or argument processor method body
//! exactly as written by the user. [`CodeTemplate::process`] analyzes the
//! body (context usage, static context method invocations, referenced
//! special variables, exception handler behavior) and then produces a
//! transformed copy with normalized returns and rewritten thread-local
//! variable accesses. The original body is never mutated, so a template can
//! be processed any number of times.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use rayon::prelude::*;

use crate::{
    analysis::BlockGraph,
    context::{ContextKind, ContextRegistry, ContextValueKind, StaticContextMethod},
    fragment::code::{Code, CodeInfo},
    method::{first_real_rev, FieldOp, Insn, InvokeKind, JumpKind, LabelId, MethodBody, MethodDesc,
        StackOp, TypeDesc},
    vars::{fq_field_name, ThreadLocalVar, VariableCatalog},
    Error, Result,
};

const THREAD_TYPE: &str = "java/lang/Thread";
const CURRENT_THREAD_NAME: &str = "currentThread";
const CURRENT_THREAD_DESC: &str = "()Ljava/lang/Thread;";

/// The kinds of contexts and the static context types a fragment's
/// parameters consume.
#[derive(Debug)]
struct ContextUsage {
    static_types: HashSet<String>,
}

impl ContextUsage {
    /// Collects the context kinds appearing in the body's parameters and the
    /// canonical names of all referenced static context types.
    fn for_body(body: &MethodBody, registry: &ContextRegistry) -> Result<Self> {
        let desc = body.parsed_desc()?;
        let mut static_types = HashSet::new();

        for param in &desc.params {
            if let TypeDesc::Object(name) = param {
                if ContextKind::for_type(name, registry) == Some(ContextKind::Static) {
                    static_types.insert(name.clone());
                }
            }
        }

        Ok(Self { static_types })
    }
}

/// A raw snippet or argument processor method body, validated and expanded
/// on demand into a woveable [`Code`].
#[derive(Debug, Clone)]
pub struct CodeTemplate {
    /// Internal name of the class where the fragment was defined.
    class_name: String,
    /// The original, untransformed body.
    method: MethodBody,
}

impl CodeTemplate {
    /// Creates a template for a fragment defined in `class_name`.
    #[must_use]
    pub fn new(class_name: &str, method: MethodBody) -> Self {
        Self {
            class_name: class_name.to_string(),
            method,
        }
    }

    /// Returns the internal name of the defining class.
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Returns the fragment method name.
    #[must_use]
    pub fn method_name(&self) -> &str {
        &self.method.name
    }

    /// Formats a human-readable source location for an instruction of this
    /// fragment, used in error messages.
    #[must_use]
    pub fn location(&self, insn: usize) -> String {
        format!(
            "snippet {}.{}:{}",
            self.class_name.replace('/', "."),
            self.method.name,
            insn
        )
    }

    /// Analyzes and transforms the raw body into a [`Code`].
    ///
    /// Analysis collects the invoked static context methods (validating each
    /// invocation), the referenced synthetic-local and thread-local
    /// variables, and whether any exception handler swallows an exception
    /// instead of propagating it. The transformation then clones the
    /// instruction stream, replaces multiple return points with jumps to one
    /// trailing label, and rewrites thread-local static field accesses into
    /// per-thread field accesses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContextCall`] for a static context method
    /// invocation with arguments, a disallowed return type, or an
    /// unresolvable method, and [`Error::Malformed`] for unparseable
    /// descriptors.
    pub fn process(&self, catalog: &VariableCatalog, contexts: &ContextRegistry) -> Result<Code> {
        let usage = ContextUsage::for_body(&self.method, contexts)?;

        let context_methods = self.collect_context_methods(&usage.static_types, contexts)?;
        let synthetic_locals = collect_referenced_vars(&self.method, catalog.synthetic_locals());
        let thread_locals = collect_referenced_vars(&self.method, catalog.thread_locals());
        let handles_exception = self.handles_exception_without_throwing();

        let mut instructions = self.method.instructions.clone();
        let mut next_label = next_free_label(&self.method);
        replace_returns_with_goto(&mut instructions, &mut next_label);
        rewrite_thread_local_accesses(&mut instructions, &thread_locals)?;

        Ok(Code::new(
            instructions,
            self.method.try_blocks.clone(),
            CodeInfo {
                synthetic_locals,
                thread_locals,
                context_methods,
                handles_exception,
            },
        ))
    }

    /// Collects the distinct static context methods invoked by the body.
    ///
    /// The scan is order-independent and runs in parallel; duplicates are
    /// eliminated by an insert-if-absent on the `owner.name` identity, so
    /// which physical occurrence is retained is unspecified - content
    /// equality among duplicates is guaranteed by the identity itself.
    fn collect_context_methods(
        &self,
        static_types: &HashSet<String>,
        contexts: &ContextRegistry,
    ) -> Result<HashSet<StaticContextMethod>> {
        let seen: DashMap<String, ()> = DashMap::new();

        let methods = self
            .method
            .instructions
            .par_iter()
            .enumerate()
            .map(|(idx, insn)| -> Result<Option<StaticContextMethod>> {
                let Insn::Invoke {
                    owner, name, desc, ..
                } = insn
                else {
                    return Ok(None);
                };

                let owner = owner.replace('/', ".");
                if !static_types.contains(&owner) {
                    return Ok(None);
                }

                let invalid = |message: &str| Error::InvalidContextCall {
                    location: self.location(idx),
                    owner: owner.clone(),
                    name: name.clone(),
                    message: message.to_string(),
                };

                let parsed = MethodDesc::parse(desc)?;
                if !parsed.params.is_empty() {
                    return Err(invalid("arguments found, but NONE allowed"));
                }
                if ContextValueKind::from_type(&parsed.ret).is_none() {
                    return Err(invalid("return type MUST be a primitive type or a String"));
                }

                // Resolve the method against the registered context type.
                let def = contexts
                    .get(&owner)
                    .ok_or_else(|| invalid("context type is not registered"))?;
                let Some(&return_kind) = def.methods.get(name) else {
                    return Err(invalid("method is not declared by the context type"));
                };

                // First registration wins; later duplicates are dropped.
                let id = format!("{owner}.{name}");
                if seen.insert(id, ()).is_some() {
                    return Ok(None);
                }

                Ok(Some(StaticContextMethod {
                    owner,
                    name: name.clone(),
                    return_kind,
                }))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(methods.into_iter().flatten().collect())
    }

    /// Determines whether the body contains an exception handler that
    /// resumes normal control flow after catching.
    ///
    /// The block graph is visited from the body entry first; then each
    /// handler entry is visited in turn. A handler whose visit reports a
    /// non-empty set of rejoin points reconnects to the normal graph,
    /// indicating the exception is swallowed rather than propagated.
    fn handles_exception_without_throwing(&self) -> bool {
        if self.method.try_blocks.is_empty() {
            return false;
        }

        let mut graph = BlockGraph::new(&self.method);
        if let Some(first) = self.method.first_real() {
            graph.visit(first);
        }

        for try_block in self.method.try_blocks.iter().rev() {
            if let Some(handler) = self.method.real_at_label(try_block.handler) {
                if !graph.visit(handler).is_empty() {
                    return true;
                }
            }
        }

        false
    }
}

/// Scans the body for field accesses and collects the set of special
/// variables referenced, identified by fully qualified field name.
///
/// The scan has no ordering requirement and commutes, so it runs as a
/// parallel filter followed by a set union.
fn collect_referenced_vars<T>(
    body: &MethodBody,
    vars: &std::collections::HashMap<String, Arc<T>>,
) -> HashSet<Arc<T>>
where
    T: Send + Sync,
    Arc<T>: Eq + std::hash::Hash,
{
    body.instructions
        .par_iter()
        .filter_map(|insn| {
            let Insn::Field { owner, name, .. } = insn else {
                return None;
            };
            vars.get(&fq_field_name(owner, name)).cloned()
        })
        .collect()
}

/// Returns a label id one past the highest label referenced by the body.
fn next_free_label(body: &MethodBody) -> LabelId {
    let mut max = 0u32;
    let mut track = |label: LabelId| max = max.max(label.0 + 1);

    for insn in &body.instructions {
        match insn {
            Insn::Label(label) | Insn::Jump { target: label, .. } => track(*label),
            Insn::TableSwitch {
                targets, default, ..
            }
            | Insn::LookupSwitch {
                targets, default, ..
            } => {
                targets.iter().copied().for_each(&mut track);
                track(*default);
            }
            _ => {}
        }
    }
    for try_block in &body.try_blocks {
        track(try_block.start);
        track(try_block.end);
        track(try_block.handler);
    }

    LabelId(max)
}

/// Normalizes the fragment's return points.
///
/// Two or more returns are all replaced with jumps to one fresh label placed
/// at the very end of the instruction list. A single return that is already
/// the last real instruction is left unrewritten; a single return anywhere
/// else is rewritten like the multi-return case.
fn replace_returns_with_goto(instructions: &mut Vec<Insn>, next_label: &mut LabelId) {
    let returns: Vec<usize> = instructions
        .iter()
        .enumerate()
        .filter(|(_, insn)| insn.is_return())
        .map(|(idx, _)| idx)
        .collect();

    if returns.is_empty() {
        return;
    }

    if returns.len() == 1 {
        let last_real = first_real_rev(instructions, instructions.len() - 1);
        if last_real == Some(returns[0]) {
            return;
        }
    }

    let target = *next_label;
    next_label.0 += 1;

    for idx in returns {
        instructions[idx] = Insn::Jump {
            kind: JumpKind::Goto,
            target,
        };
    }
    instructions.push(Insn::Label(target));
}

/// Rewrites every static field access naming a referenced thread-local
/// variable into an access on the current thread.
///
/// A read becomes `Thread.currentThread()` followed by a field get on the
/// thread. A write additionally has to move the value-to-store beneath the
/// thread reference: a single-slot swap for narrow values, a three-slot
/// rotation (`dup_x2`, `pop`) for wide ones. The original static field
/// instruction is removed.
fn rewrite_thread_local_accesses(
    instructions: &mut Vec<Insn>,
    thread_locals: &HashSet<Arc<ThreadLocalVar>>,
) -> Result<()> {
    if thread_locals.is_empty() {
        return Ok(());
    }

    let tlv_ids: HashSet<String> = thread_locals.iter().map(|tlv| tlv.id()).collect();

    let mut rewritten = Vec::with_capacity(instructions.len());
    for insn in instructions.drain(..) {
        let is_tlv_access = match &insn {
            Insn::Field {
                op, owner, name, ..
            } if op.is_static() => tlv_ids.contains(&fq_field_name(owner, name)),
            _ => false,
        };

        if !is_tlv_access {
            rewritten.push(insn);
            continue;
        }

        let Insn::Field { op, name, desc, .. } = insn else {
            unreachable!("field access matched above");
        };

        rewritten.push(Insn::Invoke {
            kind: InvokeKind::Static,
            owner: THREAD_TYPE.to_string(),
            name: CURRENT_THREAD_NAME.to_string(),
            desc: CURRENT_THREAD_DESC.to_string(),
        });

        if op.is_read() {
            rewritten.push(Insn::Field {
                op: FieldOp::GetField,
                owner: THREAD_TYPE.to_string(),
                name,
                desc,
            });
        } else {
            // The thread reference now sits above the value to store, but
            // putfield needs it below. Narrow values swap; wide values
            // rotate three slots.
            if TypeDesc::parse(&desc)?.slot_width() == 1 {
                rewritten.push(Insn::Stack(StackOp::Swap));
            } else {
                rewritten.push(Insn::Stack(StackOp::DupX2));
                rewritten.push(Insn::Stack(StackOp::Pop));
            }
            rewritten.push(Insn::Field {
                op: FieldOp::PutField,
                owner: THREAD_TYPE.to_string(),
                name,
                desc,
            });
        }
    }

    *instructions = rewritten;
    Ok(())
}
