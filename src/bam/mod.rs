// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Block summarization: states are reduced to the part that matters inside a block, so that a
//! summary computed for one call site can be reused at another one, and expanded again with
//! the caller's context afterwards.

mod block;
mod reducer;
mod ssa;

pub use block::{Block, BlockId, RelevanceOracle, VariableRelevance};
pub use reducer::{
    BlockState, PrecisionId, ReducedPrecision, Reducer, ReducerStats, StateKey,
};
pub use ssa::{InstantiatedPredicate, SsaMap};
