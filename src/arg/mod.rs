// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

mod graph;
mod meta;
mod node;
mod path;

pub use graph::Arg;
pub use meta::NodeMetaData;
pub use node::{AbstractState, Location, NodeRef};
pub use path::{fingerprint_paths, ArgPath, Edge, PathStep};
