//! Structural analysis of method bodies.
//!
//! The block graph and its dominator computation back the static contexts
//! that need block or loop information, and back the fragment analysis that
//! detects exception handlers resuming normal control flow.

mod bitset;
mod blocks;

pub use bitset::BitSet;
pub use blocks::{block_boundaries, BasicBlock, BlockGraph, Dominators};
