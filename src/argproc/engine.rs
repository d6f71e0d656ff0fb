//! Type-directed dispatch of argument processors over shadows.

use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;
use log::debug;

use crate::{
    argproc::{
        ArgProcessor, ArgProcessorKind, ArgumentContext, ArgumentProcessorMode,
    },
    fragment::Code,
    guard::GuardEngine,
    method::{Insn, MethodDesc, TypeDesc},
    shadow::{Shadow, ShadowId},
    snippet::Snippet,
    Error, Result,
};

/// One selected processor method, bound to one argument position.
#[derive(Debug, Clone)]
pub struct ProcMethodInstance {
    /// Zero-based index of the processed argument.
    pub arg_index: usize,
    /// Static type of the processed argument.
    pub arg_type: TypeDesc,
    /// Total number of arguments in the processed list.
    pub args_count: usize,
    /// The argument kind the position was classified as.
    pub kind: ArgProcessorKind,
    /// The processor method's fragment, shared read-only across instances.
    /// A consumer that needs to mutate instructions clones the [`Code`]
    /// explicitly.
    pub code: Arc<Code>,
}

/// One processor application resolved for one shadow: the mode plus the
/// selected method instances across all argument positions.
#[derive(Debug, Clone)]
pub struct ProcInstance {
    /// How the argument list was resolved.
    pub mode: ArgumentProcessorMode,
    /// The selected method instances, in argument order.
    pub methods: Vec<ProcMethodInstance>,
}

/// Resolved processor instances, keyed by shadow and the snippet instruction
/// position of the processor invocation.
#[derive(Debug, Default)]
pub struct PIResolver {
    instances: HashMap<(ShadowId, usize), Arc<ProcInstance>>,
}

impl PIResolver {
    /// Records a resolved instance.
    pub fn set(&mut self, shadow: ShadowId, position: usize, instance: Arc<ProcInstance>) {
        self.instances.insert((shadow, position), instance);
    }

    /// Returns the resolved instance for a shadow and invocation position.
    #[must_use]
    pub fn get(&self, shadow: ShadowId, position: usize) -> Option<&Arc<ProcInstance>> {
        self.instances.get(&(shadow, position))
    }

    /// Returns the number of resolved instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns `true` if nothing was resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Resolves argument processor applications for matched shadows.
///
/// In current-method mode, every application of the same processor inside
/// the same method produces an identical instantiation, so instances are
/// memoized per (processor, method) and reused; the memo's critical section
/// is a single insert-if-absent.
pub struct ProcEngine {
    processors: HashMap<String, Arc<ArgProcessor>>,
    guards: Arc<GuardEngine>,
    method_args_memo: DashMap<String, Arc<ProcInstance>>,
}

impl ProcEngine {
    /// Creates an engine over the registered processors, consulting `guards`
    /// for per-method applicability.
    #[must_use]
    pub fn new(processors: HashMap<String, Arc<ArgProcessor>>, guards: Arc<GuardEngine>) -> Self {
        Self {
            processors,
            guards,
            method_args_memo: DashMap::new(),
        }
    }

    /// Returns the registered processor of the given name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownProcessor`] if no such processor exists.
    pub fn processor(&self, name: &str) -> Result<&Arc<ArgProcessor>> {
        self.processors
            .get(name)
            .ok_or_else(|| Error::UnknownProcessor(name.to_string()))
    }

    /// Resolves every processor invocation of every snippet for every
    /// matched shadow.
    ///
    /// A processor application that selects no method instance across all
    /// argument positions is a no-op for that shadow, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Processor`] for a call-site application at a shadow
    /// without exactly one end instruction, or whose end is not a method
    /// invocation; propagates guard resolution/validation failures.
    pub fn compute(&self, markings: &[(Arc<Snippet>, Vec<Arc<Shadow>>)]) -> Result<PIResolver> {
        let mut resolver = PIResolver::default();

        for (snippet, shadows) in markings {
            for shadow in shadows {
                for (&position, invocation) in &snippet.code.invoked_processors {
                    let processor = self.processor(&invocation.processor)?;

                    let instance = match invocation.mode {
                        ArgumentProcessorMode::MethodArgs => {
                            self.compute_method_args(shadow, processor)?
                        }
                        ArgumentProcessorMode::CallsiteArgs => {
                            self.compute_callsite(shadow, processor)?
                        }
                    };

                    if let Some(instance) = instance {
                        resolver.set(shadow.id(), position, instance);
                    }
                }
            }
        }

        Ok(resolver)
    }

    /// Resolves a processor over the current method's own arguments,
    /// memoizing per (processor, method).
    fn compute_method_args(
        &self,
        shadow: &Shadow,
        processor: &Arc<ArgProcessor>,
    ) -> Result<Option<Arc<ProcInstance>>> {
        let body = shadow.method();
        let memo_key = format!("{}@{}{}{}", processor.name, body.owner, body.name, body.desc);

        if let Some(hit) = self.method_args_memo.get(&memo_key) {
            return Ok(Some(Arc::clone(hit.value())));
        }

        let instance = self.create_instance(
            ArgumentProcessorMode::MethodArgs,
            &body.desc,
            shadow,
            processor,
        )?;

        Ok(instance.map(|instance| {
            let instance = Arc::new(instance);
            self.method_args_memo
                .entry(memo_key)
                .or_insert_with(|| Arc::clone(&instance))
                .clone()
        }))
    }

    /// Resolves a processor over the arguments of the invocation at the
    /// shadow's single end instruction.
    fn compute_callsite(
        &self,
        shadow: &Shadow,
        processor: &Arc<ArgProcessor>,
    ) -> Result<Option<Arc<ProcInstance>>> {
        let full_name = shadow.method().full_name();

        if shadow.region_ends().len() != 1 {
            return Err(Error::Processor(format!(
                "argument processor {} applied where there is no single call site in method {}",
                processor.name, full_name
            )));
        }

        let end = shadow.region_ends()[0];
        let Some(Insn::Invoke { desc, .. }) = shadow.method().instructions.get(end) else {
            return Err(Error::Processor(format!(
                "argument processor {} is not applied before a method invocation in method {}",
                processor.name, full_name
            )));
        };

        let instance =
            self.create_instance(ArgumentProcessorMode::CallsiteArgs, desc, shadow, processor)?;
        Ok(instance.map(Arc::new))
    }

    /// Creates processor method instances for each applicable argument of
    /// the given descriptor.
    fn create_instance(
        &self,
        mode: ArgumentProcessorMode,
        method_desc: &str,
        shadow: &Shadow,
        processor: &Arc<ArgProcessor>,
    ) -> Result<Option<ProcInstance>> {
        let desc = MethodDesc::parse(method_desc)?;
        let args_count = desc.params.len();

        let mut methods = Vec::new();
        for (arg_index, arg_type) in desc.params.iter().enumerate() {
            methods.extend(self.method_instances(
                arg_index,
                arg_type,
                args_count,
                processor,
                shadow,
            )?);
        }

        if methods.is_empty() {
            debug!(
                "processor {} selects no methods for {} ({mode}): no-op",
                processor.name,
                shadow.method().full_name()
            );
            return Ok(None);
        }

        Ok(Some(ProcInstance { mode, methods }))
    }

    /// Selects every processor method handling one argument position,
    /// filtering out those whose guard rejects the shadow.
    fn method_instances(
        &self,
        arg_index: usize,
        arg_type: &TypeDesc,
        args_count: usize,
        processor: &Arc<ArgProcessor>,
        shadow: &Shadow,
    ) -> Result<Vec<ProcMethodInstance>> {
        let kind = ArgProcessorKind::from_type(arg_type);
        let mut result = Vec::new();

        for method in &processor.methods {
            if !method.handles(kind) {
                continue;
            }

            let arg_ctx = ArgumentContext {
                position: arg_index,
                type_desc: arg_type.clone(),
                total_count: args_count,
            };

            if self
                .guards
                .applicable(method.guard.as_deref(), shadow, Some(&arg_ctx))?
            {
                result.push(ProcMethodInstance {
                    arg_index,
                    arg_type: arg_type.clone(),
                    args_count,
                    kind,
                    code: Arc::clone(&method.code),
                });
            }
        }

        Ok(result)
    }
}

impl std::fmt::Debug for ProcEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcEngine")
            .field("processors", &self.processors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::argproc::ArgProcessorMethod;
    use crate::context::{register_builtins, ContextEngine, ContextRegistry};
    use crate::fragment::{Code, CodeInfo};
    use crate::guard::GuardRegistry;
    use crate::method::{InvokeKind, MethodBodyBuilder, ReturnKind, StackOp};
    use std::collections::HashSet;

    fn empty_code() -> Arc<Code> {
        Arc::new(Code::new(
            vec![Insn::Stack(StackOp::Pop)],
            Vec::new(),
            CodeInfo {
                synthetic_locals: HashSet::new(),
                thread_locals: HashSet::new(),
                context_methods: HashSet::new(),
                handles_exception: false,
            },
        ))
    }

    fn engine(processor: ArgProcessor) -> ProcEngine {
        let mut context_registry = ContextRegistry::new();
        register_builtins(&mut context_registry);
        let contexts = Arc::new(ContextEngine::new(Arc::new(context_registry)));
        let guards = Arc::new(GuardEngine::new(Arc::new(GuardRegistry::new()), contexts));

        let mut processors = HashMap::new();
        processors.insert(processor.name.clone(), Arc::new(processor));
        ProcEngine::new(processors, guards)
    }

    fn int_processor() -> ArgProcessor {
        ArgProcessor {
            name: "IntProc".to_string(),
            methods: vec![ArgProcessorMethod {
                name: "processInt".to_string(),
                kind: ArgProcessorKind::Int,
                guard: None,
                code: empty_code(),
            }],
        }
    }

    fn shadow_for(desc: &str, ends: Vec<usize>) -> Shadow {
        let body = MethodBodyBuilder::new("my/pkg/Target", "run", desc)
            .op(Insn::Invoke {
                kind: InvokeKind::Static,
                owner: "other/Class".to_string(),
                name: "callee".to_string(),
                desc: "(IZ)V".to_string(),
            })
            .op(Insn::Return(ReturnKind::Void))
            .build();
        Shadow::new(ShadowId(1), Arc::new(body), 0, ends)
    }

    #[test]
    fn test_method_args_selection_and_memoization() {
        let engine = engine(int_processor());
        let processor = Arc::clone(engine.processor("IntProc").unwrap());

        // (I S J)V: int and short positions match (short is a secondary kind
        // of int), long does not.
        let shadow = shadow_for("(ISJ)V", vec![1]);
        let first = engine
            .compute_method_args(&shadow, &processor)
            .unwrap()
            .unwrap();
        assert_eq!(first.mode, ArgumentProcessorMode::MethodArgs);
        assert_eq!(first.methods.len(), 2);
        assert_eq!(first.methods[0].arg_index, 0);
        assert_eq!(first.methods[0].kind, ArgProcessorKind::Int);
        assert_eq!(first.methods[1].arg_index, 1);
        assert_eq!(first.methods[1].kind, ArgProcessorKind::Short);

        // The second resolution for the same method reuses the instance.
        let second = engine
            .compute_method_args(&shadow, &processor)
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_no_matching_method_is_noop() {
        let engine = engine(int_processor());
        let processor = Arc::clone(engine.processor("IntProc").unwrap());

        let shadow = shadow_for("(Ljava/lang/String;)V", vec![1]);
        let instance = engine.compute_method_args(&shadow, &processor).unwrap();
        assert!(instance.is_none());
    }

    #[test]
    fn test_callsite_resolves_invocation_arguments() {
        let engine = engine(int_processor());
        let processor = Arc::clone(engine.processor("IntProc").unwrap());

        // End 0 is the invocation of other/Class.callee(IZ)V.
        let shadow = shadow_for("()V", vec![0]);
        let instance = engine
            .compute_callsite(&shadow, &processor)
            .unwrap()
            .unwrap();
        assert_eq!(instance.mode, ArgumentProcessorMode::CallsiteArgs);
        // int matches directly, boolean is a secondary kind of int.
        assert_eq!(instance.methods.len(), 2);
        assert_eq!(instance.methods[1].kind, ArgProcessorKind::Boolean);
    }

    #[test]
    fn test_callsite_requires_single_end() {
        let engine = engine(int_processor());
        let processor = Arc::clone(engine.processor("IntProc").unwrap());

        let shadow = shadow_for("()V", vec![0, 1]);
        let err = engine.compute_callsite(&shadow, &processor).unwrap_err();
        assert!(err.to_string().contains("no single call site"));
    }

    #[test]
    fn test_callsite_requires_invocation_end() {
        let engine = engine(int_processor());
        let processor = Arc::clone(engine.processor("IntProc").unwrap());

        // End 1 is the return instruction, not an invocation.
        let shadow = shadow_for("()V", vec![1]);
        let err = engine.compute_callsite(&shadow, &processor).unwrap_err();
        assert!(err
            .to_string()
            .contains("not applied before a method invocation"));
    }
}
