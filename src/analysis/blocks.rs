//! Basic block partitioning and lazy control flow connectivity.
//!
//! [`BlockGraph`] partitions a method's instruction stream (plus its exception
//! ranges) into basic blocks and builds successor/predecessor/join edges
//! lazily as new entry points are visited. Blocks live in an arena and refer
//! to each other by index, so the naturally cyclic graph carries no owning
//! references.
//!
//! The traversal is deliberately incremental: [`BlockGraph::visit`] is called
//! once for the method entry and once per exception handler entry. A block
//! reached again *within* the same visit contributes an ordinary control flow
//! edge; a block that was already connected before the visit started marks a
//! **join point** - the place where the freshly explored subgraph reconnects
//! to previously explored code. Join points are what the fragment analysis
//! uses to detect exception handlers that swallow instead of propagating.

use std::sync::OnceLock;

use crate::{
    analysis::bitset::BitSet,
    method::{first_real_fwd, first_real_rev, next_real, Insn, MethodBody},
};

/// One basic block: a maximal straight-line instruction run with a single
/// entry and a single exit.
///
/// All cross-block references are arena indices into the owning
/// [`BlockGraph`].
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Position of this block in method order.
    pub index: usize,
    /// Instruction index of the first real instruction of the block.
    pub entry: usize,
    /// Instruction index of the last real instruction of the block.
    pub exit: usize,
    /// Blocks reachable from this block's exit by normal control flow.
    pub successors: Vec<usize>,
    /// Blocks from which this block is reachable by normal control flow.
    pub predecessors: Vec<usize>,
    /// Blocks where this block's subgraph rejoined an earlier-explored one.
    pub joins: Vec<usize>,
}

/// Computes the ordered set of basic block boundaries of a method body.
///
/// A basic block starts at the first real instruction, at every jump or
/// switch target, at the fall-through instruction after a conditional jump,
/// and at every exception handler entry. The result is sorted in instruction
/// order and free of duplicates.
#[must_use]
pub fn block_boundaries(body: &MethodBody) -> Vec<usize> {
    let insns = &body.instructions;
    let mut starts = std::collections::BTreeSet::new();

    if let Some(first) = body.first_real() {
        starts.insert(first);
    }

    for (idx, insn) in insns.iter().enumerate() {
        match insn {
            Insn::Jump { kind, target } => {
                if let Some(t) = body.real_at_label(*target) {
                    starts.insert(t);
                }
                if kind.is_conditional() {
                    if let Some(next) = next_real(insns, idx) {
                        starts.insert(next);
                    }
                }
            }
            Insn::TableSwitch {
                targets, default, ..
            }
            | Insn::LookupSwitch {
                targets, default, ..
            } => {
                for label in targets.iter().chain(std::iter::once(default)) {
                    if let Some(t) = body.real_at_label(*label) {
                        starts.insert(t);
                    }
                }
            }
            _ => {}
        }
    }

    for try_block in &body.try_blocks {
        if let Some(handler) = body.real_at_label(try_block.handler) {
            starts.insert(handler);
        }
    }

    starts.into_iter().collect()
}

/// Outcome of attempting to reach a block during traversal.
enum Visit {
    /// The instruction does not belong to any block.
    NotFound,
    /// The block was reached for the first time.
    New,
    /// The block was already connected; carries its position in visit order.
    Seen(usize),
}

/// Basic block graph of one method body, with lazily built connectivity.
#[derive(Debug)]
pub struct BlockGraph<'a> {
    body: &'a MethodBody,
    blocks: Vec<BasicBlock>,
    /// Block entry instruction indices, ascending; parallel to `blocks`.
    entries: Vec<usize>,
    /// Blocks in the order they were connected, across all visits.
    connected: Vec<usize>,
    /// Position of each block in `connected`, if connected.
    connected_pos: Vec<Option<usize>>,
    /// Size of `connected` when the previous visit finished.
    connected_size: usize,
    /// Blocks ending in a return or throw.
    method_exits: Vec<usize>,
    /// Lazily computed dominator sets.
    dominators: OnceLock<Dominators>,
}

impl<'a> BlockGraph<'a> {
    /// Partitions the body into basic blocks without building connectivity.
    ///
    /// Call [`visit`](Self::visit) for the method entry and each handler
    /// entry afterwards, or use [`build`](Self::build) which does both.
    #[must_use]
    pub fn new(body: &'a MethodBody) -> Self {
        let insns = &body.instructions;
        let mut separators = block_boundaries(body);
        if !insns.is_empty() {
            separators.push(insns.len() - 1);
        }

        let mut blocks = Vec::new();
        let mut entries = Vec::new();
        for i in 0..separators.len().saturating_sub(1) {
            let entry = separators[i];
            let bound = separators[i + 1];
            // Every block but the last ends just before the next separator.
            let raw_exit = if i != separators.len() - 2 {
                bound - 1
            } else {
                bound
            };
            let Some(exit) = first_real_rev(insns, raw_exit) else {
                continue;
            };

            entries.push(entry);
            blocks.push(BasicBlock {
                index: blocks.len(),
                entry,
                exit,
                successors: Vec::new(),
                predecessors: Vec::new(),
                joins: Vec::new(),
            });
        }

        let count = blocks.len();
        Self {
            body,
            blocks,
            entries,
            connected: Vec::new(),
            connected_pos: vec![None; count],
            connected_size: 0,
            method_exits: Vec::new(),
            dominators: OnceLock::new(),
        }
    }

    /// Builds the complete graph: partitions the body, then visits the method
    /// entry and every exception handler entry.
    #[must_use]
    pub fn build(body: &'a MethodBody) -> Self {
        let mut graph = Self::new(body);
        if let Some(first) = body.first_real() {
            graph.visit(first);
        }
        for try_block in &body.try_blocks {
            if let Some(handler) = body.real_at_label(try_block.handler) {
                graph.visit(handler);
            }
        }
        graph
    }

    /// Returns the blocks of the graph, in method order.
    #[must_use]
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// Returns the number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Returns the index of the block containing the given instruction, or
    /// `None` if the instruction precedes all blocks.
    #[must_use]
    pub fn block_at(&self, insn: usize) -> Option<usize> {
        let probe = first_real_fwd(&self.body.instructions, insn).unwrap_or(insn);
        let pos = self.entries.partition_point(|&entry| entry <= probe);
        if pos == 0 {
            None
        } else {
            Some(pos - 1)
        }
    }

    /// Returns the blocks whose exit is a return or throw instruction.
    #[must_use]
    pub fn method_exits(&self) -> &[usize] {
        &self.method_exits
    }

    /// Returns the exit instruction indices of blocks with no successors.
    #[must_use]
    pub fn ends(&self) -> Vec<usize> {
        self.blocks
            .iter()
            .filter(|block| block.successors.is_empty())
            .map(|block| block.exit)
            .collect()
    }

    /// Lazily builds connectivity starting at the given instruction.
    ///
    /// Newly reached blocks are appended to the connected list and their exit
    /// instructions classified: jumps visit their target (and the
    /// fall-through, unless unconditional), switches visit every case label
    /// and the default, returns and throws record the block as a method exit,
    /// and anything else falls through to the next instruction.
    ///
    /// # Returns
    ///
    /// The exit instruction indices where this visit rejoined blocks that were
    /// already connected before the visit started. For the first visit of a
    /// method this is empty; for a handler-entry visit a non-empty result
    /// means the handler resumes normal control flow.
    pub fn visit(&mut self, root: usize) -> Vec<usize> {
        let mut joins = Vec::new();

        if matches!(self.try_visit(None, root), Visit::NotFound) {
            return joins;
        }

        let mut i = self.connected_size;
        while i < self.connected.len() {
            let current = self.connected[i];
            let exit = self.blocks[current].exit;

            match &self.body.instructions[exit] {
                Insn::Jump { kind, target } => {
                    let kind = *kind;
                    let target = self.body.real_at_label(*target);
                    self.try_visit_join(current, target, exit, &mut joins);

                    // goto never returns
                    if kind.is_conditional() {
                        let next = next_real(&self.body.instructions, exit);
                        self.try_visit_join(current, next, exit, &mut joins);
                    }
                }
                Insn::TableSwitch {
                    targets, default, ..
                }
                | Insn::LookupSwitch {
                    targets, default, ..
                } => {
                    let mut case_targets: Vec<Option<usize>> = targets
                        .iter()
                        .map(|label| self.body.real_at_label(*label))
                        .collect();
                    case_targets.push(self.body.real_at_label(*default));

                    for target in case_targets {
                        self.try_visit_join(current, target, exit, &mut joins);
                    }
                }
                Insn::Return(_) | Insn::Throw => {
                    self.method_exits.push(current);
                }
                _ => {
                    let next = next_real(&self.body.instructions, exit);
                    self.try_visit_join(current, next, exit, &mut joins);
                }
            }

            i += 1;
        }

        self.connected_size = self.connected.len();
        joins
    }

    /// Attempts to reach the block containing `insn` from `current`.
    ///
    /// A block connected before the start of the current visit produces a
    /// join record on `current`; a block connected during the current visit
    /// produces a predecessor/successor edge.
    fn try_visit(&mut self, current: Option<usize>, insn: usize) -> Visit {
        let Some(block) = self.block_at(insn) else {
            return Visit::NotFound;
        };

        if let Some(pos) = self.connected_pos[block] {
            if let Some(cur) = current {
                if pos < self.connected_size {
                    self.blocks[cur].joins.push(block);
                } else {
                    self.blocks[cur].successors.push(block);
                    self.blocks[block].predecessors.push(cur);
                }
            }
            return Visit::Seen(pos);
        }

        if let Some(cur) = current {
            self.blocks[cur].successors.push(block);
            self.blocks[block].predecessors.push(cur);
        }

        self.connected_pos[block] = Some(self.connected.len());
        self.connected.push(block);
        Visit::New
    }

    /// Like [`try_visit`](Self::try_visit), additionally recording `exit` as
    /// a join exit when the reached block belongs to a previous visit.
    fn try_visit_join(
        &mut self,
        current: usize,
        insn: Option<usize>,
        exit: usize,
        joins: &mut Vec<usize>,
    ) {
        let Some(insn) = insn else { return };
        if let Visit::Seen(pos) = self.try_visit(Some(current), insn) {
            if pos < self.connected_size {
                joins.push(exit);
            }
        }
    }

    /// Returns the dominator sets of the graph, computed lazily on first
    /// access and cached.
    ///
    /// Call only after the graph is fully built (all entry points visited);
    /// later visits do not invalidate the cached result.
    #[must_use]
    pub fn dominators(&self) -> &Dominators {
        self.dominators.get_or_init(|| self.compute_dominators())
    }

    /// Iterative dominator computation.
    ///
    /// Entry blocks - the method entry and each exception handler entry - are
    /// seeded with themselves only; every other block starts with the full
    /// block set. The fixpoint intersects each block's set with those of its
    /// predecessors, keeping the block itself.
    fn compute_dominators(&self) -> Dominators {
        let count = self.blocks.len();

        let mut entry_blocks = BitSet::new(count.max(1));
        if let Some(first) = self.body.first_real() {
            if let Some(block) = self.block_at(first) {
                entry_blocks.insert(block);
            }
        }
        for try_block in &self.body.try_blocks {
            if let Some(handler) = self.body.real_at_label(try_block.handler) {
                if let Some(block) = self.block_at(handler) {
                    entry_blocks.insert(block);
                }
            }
        }

        let mut sets: Vec<BitSet> = (0..count)
            .map(|block| {
                if entry_blocks.contains(block) {
                    let mut set = BitSet::new(count);
                    set.insert(block);
                    set
                } else {
                    BitSet::full(count)
                }
            })
            .collect();

        loop {
            let mut changed = false;

            for block in 0..count {
                if entry_blocks.contains(block) {
                    continue;
                }

                let mut next = sets[block].clone();
                next.remove(block);
                for &pred in &self.blocks[block].predecessors {
                    next.intersect_with(&sets[pred]);
                }
                next.insert(block);

                if next != sets[block] {
                    sets[block] = next;
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }

        Dominators { sets }
    }

    /// Returns `true` if the block containing `insn` starts a loop: it has a
    /// predecessor whose dominator set already contains the block itself,
    /// i.e. a back edge points at it.
    #[must_use]
    pub fn is_loop_start(&self, insn: usize) -> bool {
        let Some(block) = self.block_at(insn) else {
            return false;
        };
        let dominators = self.dominators();
        self.blocks[block]
            .predecessors
            .iter()
            .any(|&pred| dominators.dominates(block, pred))
    }
}

/// Dominator sets of a [`BlockGraph`], indexed by block.
#[derive(Debug)]
pub struct Dominators {
    sets: Vec<BitSet>,
}

impl Dominators {
    /// Returns `true` if `dominator` dominates `dominated`: every path from
    /// an entry block to `dominated` passes through `dominator`.
    #[must_use]
    pub fn dominates(&self, dominator: usize, dominated: usize) -> bool {
        self.sets
            .get(dominated)
            .is_some_and(|set| set.contains(dominator))
    }

    /// Returns the dominator set of the given block.
    #[must_use]
    pub fn set(&self, block: usize) -> Option<&BitSet> {
        self.sets.get(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{Insn, JumpKind, MethodBodyBuilder, ReturnKind};

    /// 0: nop / 1: nop / 2: return - one straight-line block.
    #[test]
    fn test_single_block() {
        let body = MethodBodyBuilder::new("Test", "m", "()V")
            .op(Insn::Other { mnemonic: "nop" })
            .op(Insn::Other { mnemonic: "nop" })
            .op(Insn::Return(ReturnKind::Void))
            .build();

        let graph = BlockGraph::build(&body);
        assert_eq!(graph.block_count(), 1);
        assert_eq!(graph.blocks()[0].entry, 0);
        assert_eq!(graph.blocks()[0].exit, 2);
        assert_eq!(graph.method_exits(), &[0]);
    }

    #[test]
    fn test_conditional_split() {
        // if (..) goto L; nop; L: return
        let mut builder = MethodBodyBuilder::new("Test", "m", "()V");
        let label = builder.new_label();
        let body = builder
            .op(Insn::Jump {
                kind: JumpKind::IfEq,
                target: label,
            })
            .op(Insn::Other { mnemonic: "nop" })
            .label(label)
            .op(Insn::Return(ReturnKind::Void))
            .build();

        let graph = BlockGraph::build(&body);
        assert_eq!(graph.block_count(), 3);

        // The branch block has two successors: the target and the fall-through.
        let first = &graph.blocks()[0];
        assert_eq!(first.successors.len(), 2);
        assert!(first.joins.is_empty());
    }

    #[test]
    fn test_loop_back_edge() {
        // 0: nop | L: nop | if .. goto L | return
        let mut builder = MethodBodyBuilder::new("Test", "m", "()V");
        let header = builder.new_label();
        let body = builder
            .op(Insn::Other { mnemonic: "nop" })
            .label(header)
            .op(Insn::Other { mnemonic: "nop" })
            .op(Insn::Jump {
                kind: JumpKind::IfNe,
                target: header,
            })
            .op(Insn::Return(ReturnKind::Void))
            .build();

        let graph = BlockGraph::build(&body);

        // The header block (containing instruction 2) starts a loop, the
        // preheader and the exit block do not.
        assert!(graph.is_loop_start(2));
        assert!(!graph.is_loop_start(0));
        let ret = body.instructions.len() - 1;
        assert!(!graph.is_loop_start(ret));
    }

    #[test]
    fn test_diamond_dominance() {
        // 0: if goto L1 | nop | goto L2 | L1: nop | L2: return
        let mut builder = MethodBodyBuilder::new("Test", "m", "()V");
        let l1 = builder.new_label();
        let l2 = builder.new_label();
        let body = builder
            .op(Insn::Jump {
                kind: JumpKind::IfEq,
                target: l1,
            })
            .op(Insn::Other { mnemonic: "nop" })
            .op(Insn::Jump {
                kind: JumpKind::Goto,
                target: l2,
            })
            .label(l1)
            .op(Insn::Other { mnemonic: "nop" })
            .label(l2)
            .op(Insn::Return(ReturnKind::Void))
            .build();

        let graph = BlockGraph::build(&body);
        assert_eq!(graph.block_count(), 4);

        let entry = graph.block_at(0).unwrap();
        let join = graph.block_at(body.instructions.len() - 1).unwrap();
        let left = graph.block_at(1).unwrap();

        let dominators = graph.dominators();
        assert!(dominators.dominates(entry, join));
        assert!(dominators.dominates(entry, left));
        assert!(!dominators.dominates(left, join));
        assert!(!graph.is_loop_start(0));
    }

    #[test]
    fn test_handler_join_detection() {
        // try { nop } catch { nop; goto after } ; after: return
        //
        // The handler jumps back into normal control flow, so visiting the
        // handler entry reports a join.
        let mut builder = MethodBodyBuilder::new("Test", "m", "()V");
        let start = builder.new_label();
        let end = builder.new_label();
        let handler = builder.new_label();
        let after = builder.new_label();
        let body = builder
            .label(start)
            .op(Insn::Other { mnemonic: "nop" })
            .label(end)
            .op(Insn::Jump {
                kind: JumpKind::Goto,
                target: after,
            })
            .label(handler)
            .op(Insn::Other { mnemonic: "nop" })
            .op(Insn::Jump {
                kind: JumpKind::Goto,
                target: after,
            })
            .label(after)
            .op(Insn::Return(ReturnKind::Void))
            .try_block(start, end, handler, None)
            .build();

        let mut graph = BlockGraph::new(&body);
        let entry_joins = graph.visit(body.first_real().unwrap());
        assert!(entry_joins.is_empty());

        let handler_entry = body.real_at_label(handler).unwrap();
        let handler_joins = graph.visit(handler_entry);
        assert!(!handler_joins.is_empty());
    }

    #[test]
    fn test_rethrowing_handler_has_no_join() {
        // try { nop } catch { throw } ; return
        let mut builder = MethodBodyBuilder::new("Test", "m", "()V");
        let start = builder.new_label();
        let end = builder.new_label();
        let handler = builder.new_label();
        let after = builder.new_label();
        let body = builder
            .label(start)
            .op(Insn::Other { mnemonic: "nop" })
            .label(end)
            .op(Insn::Jump {
                kind: JumpKind::Goto,
                target: after,
            })
            .label(handler)
            .op(Insn::Throw)
            .label(after)
            .op(Insn::Return(ReturnKind::Void))
            .try_block(start, end, handler, None)
            .build();

        let mut graph = BlockGraph::new(&body);
        graph.visit(body.first_real().unwrap());
        let handler_joins = graph.visit(body.real_at_label(handler).unwrap());
        assert!(handler_joins.is_empty());
    }

    #[test]
    fn test_switch_targets() {
        let mut builder = MethodBodyBuilder::new("Test", "m", "()V");
        let c0 = builder.new_label();
        let c1 = builder.new_label();
        let dflt = builder.new_label();
        let body = builder
            .op(Insn::LookupSwitch {
                keys: vec![0, 1],
                targets: vec![c0, c1],
                default: dflt,
            })
            .label(c0)
            .op(Insn::Return(ReturnKind::Void))
            .label(c1)
            .op(Insn::Return(ReturnKind::Void))
            .label(dflt)
            .op(Insn::Return(ReturnKind::Void))
            .build();

        let graph = BlockGraph::build(&body);
        assert_eq!(graph.blocks()[0].successors.len(), 3);
        assert_eq!(graph.method_exits().len(), 3);
    }
}
