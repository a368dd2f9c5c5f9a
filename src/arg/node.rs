// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use smallvec::SmallVec;
use std::fmt::{Debug, Display, Formatter};
use std::num::NonZeroU32;

/// Identity of a node in the reachability graph. Identities are handed out in creation order
/// and are never reused, not even after the node was removed.
#[derive(PartialEq, Eq, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct NodeRef(NonZeroU32);

impl Debug for NodeRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeRef({})", self.id())
    }
}

impl Display for NodeRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.id())
    }
}

impl NodeRef {
    pub(crate) fn from_index(index: usize) -> Self {
        NodeRef(NonZeroU32::new((index + 1) as u32).unwrap())
    }

    pub(crate) fn index(&self) -> usize {
        (self.0.get() - 1) as usize
    }

    /// Numeric identity, starting at one.
    pub fn id(&self) -> u32 {
        self.0.get()
    }
}

/// A program location, i.e., the number of a node in the control-flow graph of the program
/// under analysis.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct Location(pub u32);

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "N{}", self.0)
    }
}

/// The capabilities the graph needs from an abstract state payload.
pub trait AbstractState: Debug {
    fn location(&self) -> Location;
    /// Whether the state violates the property (an error state).
    fn is_target(&self) -> bool {
        false
    }
}

pub(crate) type Parents = SmallVec<[NodeRef; 2]>;
pub(crate) type Children = SmallVec<[NodeRef; 4]>;

/// Adjacency is kept sorted by identity which makes "first parent" a fixed tie-break.
#[derive(Debug, Clone)]
pub(crate) struct Node<S> {
    pub(crate) state: S,
    pub(crate) parents: Parents,
    pub(crate) children: Children,
}

impl<S> Node<S> {
    pub(crate) fn new(state: S) -> Self {
        Self {
            state,
            parents: Parents::new(),
            children: Children::new(),
        }
    }
}

/// Returns `true` if the value was not present yet.
pub(crate) fn insert_sorted<A: smallvec::Array<Item = NodeRef>>(
    set: &mut SmallVec<A>,
    value: NodeRef,
) -> bool {
    match set.binary_search(&value) {
        Ok(_) => false,
        Err(pos) => {
            set.insert(pos, value);
            true
        }
    }
}

/// Returns `true` if the value was present.
pub(crate) fn remove_sorted<A: smallvec::Array<Item = NodeRef>>(
    set: &mut SmallVec<A>,
    value: NodeRef,
) -> bool {
    match set.binary_search(&value) {
        Ok(pos) => {
            set.remove(pos);
            true
        }
        Err(_) => false,
    }
}
