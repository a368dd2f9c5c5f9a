// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Abstract reachability graphs and counterexample-guided abstraction refinement.
//!
//! The crate maintains the graph of explored abstract states, prunes it when a refinement finds
//! that an error path is spurious, and summarizes blocks for reuse across call sites. Computing
//! successors, solving formulas and interpolation are left to the caller, see
//! [`explore::Analysis`] and the traits in [`cegar`].

pub mod arg;
pub mod bam;
pub mod cegar;
pub mod error;
pub mod explore;
pub mod precision;
pub mod reached;
pub mod shutdown;
