// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::arg::{AbstractState, Arg, Location, NodeRef};
use crate::error::ArgError;
use std::collections::hash_map::DefaultHasher;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

/// Edge between two program locations that a path step was reached through.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct Edge {
    pub from: Location,
    pub to: Location,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PathStep {
    pub node: NodeRef,
    pub location: Location,
    /// `None` for the first step of a path.
    pub incoming: Option<Edge>,
}

/// A sequence of graph nodes where every node is a child of its predecessor.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct ArgPath {
    steps: Vec<PathStep>,
}

impl ArgPath {
    /// Builds a path along `nodes`, which must be connected by child edges.
    pub fn from_nodes<S: AbstractState>(arg: &Arg<S>, nodes: &[NodeRef]) -> Result<Self, ArgError> {
        let mut steps = Vec::with_capacity(nodes.len());
        let mut prev: Option<(NodeRef, Location)> = None;
        for node in nodes.iter() {
            let location = arg
                .state(*node)
                .ok_or(ArgError::UnknownNode(*node))?
                .location();
            let incoming = match prev {
                None => None,
                Some((p, from)) => {
                    if !arg.children(p).contains(node) {
                        return Err(ArgError::Malformed(format!(
                            "path step {p} -> {node} is not an edge"
                        )));
                    }
                    Some(Edge { from, to: location })
                }
            };
            steps.push(PathStep {
                node: *node,
                location,
                incoming,
            });
            prev = Some((*node, location));
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn first(&self) -> Option<NodeRef> {
        self.steps.first().map(|s| s.node)
    }

    pub fn last(&self) -> Option<NodeRef> {
        self.steps.last().map(|s| s.node)
    }

    pub fn nodes(&self) -> impl DoubleEndedIterator<Item = NodeRef> + '_ {
        self.steps.iter().map(|s| s.node)
    }

    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        self.steps.iter().filter_map(|s| s.incoming)
    }

    pub fn contains(&self, node: NodeRef) -> bool {
        self.steps.iter().any(|s| s.node == node)
    }

    /// Structural hash over the program locations the path visits. Node identities are not
    /// included, so the same program path found again after re-exploration has the same
    /// fingerprint.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for step in self.steps.iter() {
            step.location.hash(&mut hasher);
            step.incoming.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Order-independent fingerprint of a set of paths.
pub fn fingerprint_paths<'a>(paths: impl IntoIterator<Item = &'a ArgPath>) -> u64 {
    let mut prints: Vec<u64> = paths.into_iter().map(|p| p.fingerprint()).collect();
    prints.sort_unstable();
    prints.dedup();
    let mut hasher = DefaultHasher::new();
    prints.hash(&mut hasher);
    hasher.finish()
}

impl Display for ArgPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (ii, step) in self.steps.iter().enumerate() {
            if ii > 0 {
                write!(f, " -> ")?;
            }
            write!(f, "{}@{}", step.node, step.location)?;
        }
        Ok(())
    }
}

impl<S: AbstractState> Arg<S> {
    /// Reconstructs a path from the root to `node`. Whenever a node has several parents, the
    /// one with the lowest identity is taken.
    pub fn one_path_to(&self, node: NodeRef) -> Result<ArgPath, ArgError> {
        if !self.contains(node) {
            return Err(ArgError::UnknownNode(node));
        }
        let mut nodes = vec![node];
        let mut current = node;
        while !self.is_root(current) {
            current = self.first_parent(current).ok_or(ArgError::Orphan(current))?;
            nodes.push(current);
        }
        nodes.reverse();
        ArgPath::from_nodes(self, &nodes)
    }
}
