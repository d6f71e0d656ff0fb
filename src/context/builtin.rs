//! Built-in static context types.
//!
//! These cover the structural queries most instrumentation needs out of the
//! box: method identity ([`MethodStaticContext`]), basic block shape
//! ([`BasicBlockStaticContext`]) and loop headers ([`LoopStaticContext`]).
//! User-defined context types register through the same
//! [`ContextRegistry`](crate::context::ContextRegistry) mechanism.

use std::collections::HashMap;

use crate::{
    analysis::BlockGraph,
    context::{ContextRegistry, ContextTypeDef, ContextValue, ContextValueKind, StaticContext},
    method::MethodBody,
    shadow::Shadow,
    Error, Result,
};

/// Canonical name of [`MethodStaticContext`].
pub const METHOD_CONTEXT: &str = "classweave.MethodStaticContext";

/// Canonical name of [`BasicBlockStaticContext`].
pub const BASIC_BLOCK_CONTEXT: &str = "classweave.BasicBlockStaticContext";

/// Canonical name of [`LoopStaticContext`].
pub const LOOP_CONTEXT: &str = "classweave.LoopStaticContext";

/// Registers the built-in context types.
pub fn register_builtins(registry: &mut ContextRegistry) {
    registry.register(ContextTypeDef {
        name: METHOD_CONTEXT.to_string(),
        ctor: || Box::new(MethodStaticContext::default()),
        methods: HashMap::from([
            ("thisClassName".to_string(), ContextValueKind::Str),
            ("thisClassCanonicalName".to_string(), ContextValueKind::Str),
            ("thisClassSimpleName".to_string(), ContextValueKind::Str),
            ("thisMethodName".to_string(), ContextValueKind::Str),
            ("thisMethodFullName".to_string(), ContextValueKind::Str),
            ("thisMethodDescriptor".to_string(), ContextValueKind::Str),
            ("isMethodStatic".to_string(), ContextValueKind::Bool),
        ]),
    });

    registry.register(ContextTypeDef {
        name: BASIC_BLOCK_CONTEXT.to_string(),
        ctor: || Box::new(BasicBlockStaticContext::default()),
        methods: HashMap::from([
            ("getTotBBs".to_string(), ContextValueKind::Int),
            ("getBBindex".to_string(), ContextValueKind::Int),
            ("getBBSize".to_string(), ContextValueKind::Int),
        ]),
    });

    registry.register(ContextTypeDef {
        name: LOOP_CONTEXT.to_string(),
        ctor: || Box::new(LoopStaticContext::default()),
        methods: HashMap::from([("isFirstOfLoop".to_string(), ContextValueKind::Bool)]),
    });
}

fn seeded(current: &Option<Shadow>) -> Result<&Shadow> {
    current
        .as_ref()
        .ok_or_else(|| Error::Error("static context used before seeding".to_string()))
}

/// Provides static context information about the instrumented method.
#[derive(Default)]
pub struct MethodStaticContext {
    current: Option<Shadow>,
}

impl StaticContext for MethodStaticContext {
    fn seed(&mut self, shadow: &Shadow) {
        self.current = Some(shadow.clone());
    }

    fn call(&self, method: &str) -> Result<ContextValue> {
        let shadow = seeded(&self.current)?;
        let body = shadow.method();

        let value = match method {
            // Internal name of the instrumented class.
            "thisClassName" => ContextValue::Str(body.owner.clone()),
            // Fully qualified name with packages delimited by '.'.
            "thisClassCanonicalName" => ContextValue::Str(body.owner.replace('/', ".")),
            // Class name without the package part.
            "thisClassSimpleName" => {
                let name = body
                    .owner
                    .rsplit('/')
                    .next()
                    .unwrap_or(body.owner.as_str());
                ContextValue::Str(name.to_string())
            }
            "thisMethodName" => ContextValue::Str(body.name.clone()),
            "thisMethodFullName" => ContextValue::Str(format!("{}.{}", body.owner, body.name)),
            "thisMethodDescriptor" => ContextValue::Str(body.desc.clone()),
            "isMethodStatic" => ContextValue::Bool(body.is_static()),
            other => {
                return Err(Error::Error(format!(
                    "unknown method {other} on {METHOD_CONTEXT}"
                )))
            }
        };

        Ok(value)
    }
}

/// Per-method block analysis results kept by the block-oriented contexts.
///
/// Context instances live for the whole session, so this map acts as a
/// per-method cache across all shadows of a method.
struct BlockInfo {
    /// Block entry instruction indices, ascending.
    entries: Vec<usize>,
    /// Whether each block starts a loop (only filled by [`LoopStaticContext`]).
    loop_starts: Vec<bool>,
}

impl BlockInfo {
    fn method_key(body: &MethodBody) -> String {
        format!("{}{}{}", body.owner, body.name, body.desc)
    }

    fn compute(body: &MethodBody, with_loops: bool) -> Self {
        let graph = BlockGraph::build(body);
        let entries = graph.blocks().iter().map(|block| block.entry).collect();
        let loop_starts = if with_loops {
            let dominators = graph.dominators();
            graph
                .blocks()
                .iter()
                .map(|block| {
                    block
                        .predecessors
                        .iter()
                        .any(|&pred| dominators.dominates(block.index, pred))
                })
                .collect()
        } else {
            Vec::new()
        };

        Self {
            entries,
            loop_starts,
        }
    }

    /// Index of the block containing the given instruction.
    fn block_of(&self, insn: usize) -> Option<usize> {
        let pos = self.entries.partition_point(|&entry| entry <= insn);
        if pos == 0 {
            None
        } else {
            Some(pos - 1)
        }
    }
}

/// Provides static context information about the instrumented basic block.
#[derive(Default)]
pub struct BasicBlockStaticContext {
    current: Option<Shadow>,
    cache: HashMap<String, BlockInfo>,
}

impl BasicBlockStaticContext {
    fn info(&self) -> Result<(&Shadow, &BlockInfo)> {
        let shadow = seeded(&self.current)?;
        let info = self
            .cache
            .get(&BlockInfo::method_key(shadow.method()))
            .ok_or_else(|| Error::Error("block info missing for seeded method".to_string()))?;
        Ok((shadow, info))
    }

    fn query(&self, method: &str) -> Result<ContextValue> {
        let (shadow, info) = self.info()?;

        let value = match method {
            // Total number of basic blocks in the method.
            "getTotBBs" => ContextValue::Int(info.entries.len() as i32),
            // Index of the block containing the region start.
            "getBBindex" => {
                ContextValue::Int(info.block_of(shadow.region_start()).map_or(-1, |b| b as i32))
            }
            // Number of real instructions from the region start up to the
            // first region end hit, counting the start itself.
            "getBBSize" => {
                let insns = &shadow.method().instructions;
                let ends = shadow.region_ends();
                let mut count = 1i32;
                let mut idx = shadow.region_start();
                while idx < insns.len() && !ends.contains(&idx) {
                    if !insns[idx].is_virtual() {
                        count += 1;
                    }
                    idx += 1;
                }
                ContextValue::Int(count)
            }
            other => {
                return Err(Error::Error(format!(
                    "unknown method {other} on {BASIC_BLOCK_CONTEXT}"
                )))
            }
        };

        Ok(value)
    }
}

impl StaticContext for BasicBlockStaticContext {
    fn seed(&mut self, shadow: &Shadow) {
        let key = BlockInfo::method_key(shadow.method());
        self.cache
            .entry(key)
            .or_insert_with(|| BlockInfo::compute(shadow.method(), false));
        self.current = Some(shadow.clone());
    }

    fn call(&self, method: &str) -> Result<ContextValue> {
        self.query(method)
    }
}

/// Provides loop information about the instrumented instruction.
///
/// A region starts a loop when its block has an incoming back edge: a
/// predecessor the block itself already dominates.
#[derive(Default)]
pub struct LoopStaticContext {
    current: Option<Shadow>,
    cache: HashMap<String, BlockInfo>,
}

impl StaticContext for LoopStaticContext {
    fn seed(&mut self, shadow: &Shadow) {
        let key = BlockInfo::method_key(shadow.method());
        self.cache
            .entry(key)
            .or_insert_with(|| BlockInfo::compute(shadow.method(), true));
        self.current = Some(shadow.clone());
    }

    fn call(&self, method: &str) -> Result<ContextValue> {
        let shadow = seeded(&self.current)?;
        let info = self
            .cache
            .get(&BlockInfo::method_key(shadow.method()))
            .ok_or_else(|| Error::Error("block info missing for seeded method".to_string()))?;

        match method {
            "isFirstOfLoop" => {
                let is_loop = info
                    .block_of(shadow.region_start())
                    .and_then(|block| info.loop_starts.get(block).copied())
                    .unwrap_or(false);
                Ok(ContextValue::Bool(is_loop))
            }
            other => Err(Error::Error(format!(
                "unknown method {other} on {LOOP_CONTEXT}"
            ))),
        }
    }
}
