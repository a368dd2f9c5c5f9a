// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::arg::meta::NodeMetaData;
use crate::arg::node::{insert_sorted, remove_sorted, Node};
use crate::arg::NodeRef;
use crate::error::ArgError;
use indexmap::{IndexMap, IndexSet};

/// Abstract reachability graph. The graph owns all nodes; edges are relations over
/// [`NodeRef`]s. Removed nodes leave a tombstone behind so that their identity is never handed
/// out again.
#[derive(Debug, Clone)]
pub struct Arg<S> {
    nodes: Vec<Option<Node<S>>>,
    root: Option<NodeRef>,
    /// covered node -> covering node
    covered_by: IndexMap<NodeRef, NodeRef>,
    /// covering node -> covered nodes
    covering: IndexMap<NodeRef, IndexSet<NodeRef>>,
}

impl<S> Default for Arg<S> {
    fn default() -> Self {
        Self {
            nodes: Vec::default(),
            root: None,
            covered_by: IndexMap::default(),
            covering: IndexMap::default(),
        }
    }
}

/// Creating nodes and edges.
impl<S> Arg<S> {
    pub fn add_root(&mut self, state: S) -> Result<NodeRef, ArgError> {
        if let Some(root) = self.root {
            if self.contains(root) {
                return Err(ArgError::DuplicateRoot(root));
            }
        }
        let root = self.alloc(state);
        self.root = Some(root);
        Ok(root)
    }

    pub fn add_child(&mut self, parent: NodeRef, state: S) -> Result<NodeRef, ArgError> {
        self.live(parent)?;
        let child = self.alloc(state);
        self.link(parent, child);
        Ok(child)
    }

    /// Creates a node that has all of `parents` as predecessors. Used when merging produced a
    /// state that stands for several predecessors.
    pub fn add_joined(&mut self, parents: &[NodeRef], state: S) -> Result<NodeRef, ArgError> {
        for p in parents.iter() {
            self.live(*p)?;
        }
        let node = self.alloc(state);
        for p in parents.iter() {
            self.link(*p, node);
        }
        Ok(node)
    }

    /// Registers `parent` as an additional predecessor of `node`. Adding a parent twice is a
    /// no-op. Returns whether a new edge was created.
    pub fn add_parent(&mut self, node: NodeRef, parent: NodeRef) -> Result<bool, ArgError> {
        self.live(node)?;
        self.live(parent)?;
        if self.parents(node).contains(&parent) {
            return Ok(false);
        }
        if parent == node || self.subtree(node).contains(&parent) {
            return Err(ArgError::Cycle { node, parent });
        }
        self.link(parent, node);
        Ok(true)
    }

    fn alloc(&mut self, state: S) -> NodeRef {
        let node = NodeRef::from_index(self.nodes.len());
        self.nodes.push(Some(Node::new(state)));
        node
    }

    fn link(&mut self, parent: NodeRef, child: NodeRef) {
        if let Some(p) = self.nodes[parent.index()].as_mut() {
            insert_sorted(&mut p.children, child);
        }
        if let Some(c) = self.nodes[child.index()].as_mut() {
            insert_sorted(&mut c.parents, parent);
        }
    }

    /// Removes the edge `parent -> child` from both sides. Returns whether it existed.
    pub(crate) fn unlink(&mut self, parent: NodeRef, child: NodeRef) -> bool {
        let mut removed = false;
        if let Some(Some(p)) = self.nodes.get_mut(parent.index()) {
            removed |= remove_sorted(&mut p.children, child);
        }
        if let Some(Some(c)) = self.nodes.get_mut(child.index()) {
            removed |= remove_sorted(&mut c.parents, parent);
        }
        removed
    }
}

/// Queries.
impl<S> Arg<S> {
    pub fn root(&self) -> Option<NodeRef> {
        self.root.filter(|r| self.contains(*r))
    }

    pub fn is_root(&self, node: NodeRef) -> bool {
        self.root == Some(node)
    }

    pub fn contains(&self, node: NodeRef) -> bool {
        matches!(self.nodes.get(node.index()), Some(Some(_)))
    }

    pub fn state(&self, node: NodeRef) -> Option<&S> {
        self.node(node).map(|n| &n.state)
    }

    pub fn state_mut(&mut self, node: NodeRef) -> Option<&mut S> {
        self.nodes
            .get_mut(node.index())
            .and_then(|n| n.as_mut())
            .map(|n| &mut n.state)
    }

    /// Parents sorted by identity. Empty for removed nodes.
    pub fn parents(&self, node: NodeRef) -> &[NodeRef] {
        self.node(node).map(|n| n.parents.as_slice()).unwrap_or(&[])
    }

    /// Children sorted by identity. Empty for removed nodes.
    pub fn children(&self, node: NodeRef) -> &[NodeRef] {
        self.node(node).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// The parent with the lowest identity.
    pub fn first_parent(&self, node: NodeRef) -> Option<NodeRef> {
        self.parents(node).first().copied()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live nodes in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeRef, &S)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(ii, n)| n.as_ref().map(|n| (NodeRef::from_index(ii), &n.state)))
    }

    fn node(&self, node: NodeRef) -> Option<&Node<S>> {
        self.nodes.get(node.index()).and_then(|n| n.as_ref())
    }

    fn live(&self, node: NodeRef) -> Result<&Node<S>, ArgError> {
        self.node(node).ok_or(ArgError::UnknownNode(node))
    }

    /// All nodes reachable from `node` through child edges, `node` included. Nodes reachable
    /// through several paths are listed once, in breadth-first order.
    pub fn subtree(&self, node: NodeRef) -> IndexSet<NodeRef> {
        let mut result = IndexSet::new();
        if !self.contains(node) {
            return result;
        }
        let mut todo = std::collections::VecDeque::from([node]);
        while let Some(current) = todo.pop_front() {
            if result.insert(current) {
                todo.extend(self.children(current).iter().copied());
            }
        }
        result
    }

    /// The part of `subtree(node)` that becomes unreachable once `node` is gone: a descendant
    /// is only included if all of its parents are included. The result is in topological order
    /// starting with `node`, so iterating it in reverse visits children before parents.
    pub fn removable_subtree(&self, node: NodeRef) -> Vec<NodeRef> {
        if !self.contains(node) {
            return vec![];
        }
        let mut remaining_parents = NodeMetaData::<u32>::default();
        let mut seen = NodeMetaData::<bool>::default();
        let mut out = vec![node];
        let mut todo = vec![node];
        while let Some(current) = todo.pop() {
            for child in self.children(current).iter() {
                if !*seen.get(*child) {
                    *seen.get_mut(*child) = true;
                    *remaining_parents.get_mut(*child) = self.parents(*child).len() as u32;
                }
                let count = remaining_parents.get_mut(*child);
                *count -= 1;
                if *count == 0 {
                    out.push(*child);
                    todo.push(*child);
                }
            }
        }
        out
    }
}

/// Coverage relation.
impl<S> Arg<S> {
    pub fn is_covered(&self, node: NodeRef) -> bool {
        self.covered_by.contains_key(&node)
    }

    pub fn covered_by(&self, node: NodeRef) -> Option<NodeRef> {
        self.covered_by.get(&node).copied()
    }

    /// Nodes that are covered by `node`.
    pub fn covered_by_this(&self, node: NodeRef) -> impl Iterator<Item = NodeRef> + '_ {
        self.covering.get(&node).into_iter().flatten().copied()
    }

    pub fn set_covered(&mut self, node: NodeRef, by: NodeRef) -> Result<(), ArgError> {
        self.live(node)?;
        self.live(by)?;
        if node == by || self.is_covered(by) {
            return Err(ArgError::InvalidCoverage { node, by });
        }
        self.set_uncovered(node);
        self.covered_by.insert(node, by);
        self.covering.entry(by).or_default().insert(node);
        Ok(())
    }

    /// Returns whether the node was covered.
    pub fn set_uncovered(&mut self, node: NodeRef) -> bool {
        match self.covered_by.shift_remove(&node) {
            Some(by) => {
                if let Some(covered) = self.covering.get_mut(&by) {
                    covered.shift_remove(&node);
                    if covered.is_empty() {
                        self.covering.shift_remove(&by);
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Uncovers every node covered by `node`. Returns the uncovered nodes.
    fn uncover_all_covered_by(&mut self, node: NodeRef) -> Vec<NodeRef> {
        let covered: Vec<NodeRef> = self
            .covering
            .shift_remove(&node)
            .map(|c| c.into_iter().collect())
            .unwrap_or_default();
        for c in covered.iter() {
            self.covered_by.shift_remove(c);
        }
        covered
    }
}

/// Removing nodes.
impl<S> Arg<S> {
    /// Disconnects `node` from all parents and children. Descendants are left in place, which
    /// makes the ones without any other parent unreachable. `node` itself is uncovered, and so
    /// is every node it covers; those are returned.
    pub fn detach(&mut self, node: NodeRef) -> Result<Vec<NodeRef>, ArgError> {
        self.live(node)?;
        if self.is_root(node) {
            return Err(ArgError::RootDetach(node));
        }
        let (parents, children) = {
            let n = self.live(node)?;
            (n.parents.clone(), n.children.clone())
        };
        for child in children.iter() {
            self.unlink(node, *child);
        }
        for parent in parents.iter() {
            self.unlink(*parent, node);
        }
        self.set_uncovered(node);
        Ok(self.uncover_all_covered_by(node))
    }

    /// Detaches `node` and destroys it. Returns the nodes that were covered by it.
    pub fn remove_from_graph(&mut self, node: NodeRef) -> Result<Vec<NodeRef>, ArgError> {
        let uncovered = self.detach(node)?;
        self.nodes[node.index()] = None;
        Ok(uncovered)
    }

    /// Checks that parent and child relations mirror each other, that there are no cycles and
    /// that no coverage pointer refers to a removed node.
    pub fn check_well_formed(&self) -> Result<(), ArgError> {
        for (node, _) in self.iter() {
            for child in self.children(node).iter() {
                if !self.contains(*child) {
                    return Err(ArgError::Malformed(format!(
                        "{node} has removed child {child}"
                    )));
                }
                if !self.parents(*child).contains(&node) {
                    return Err(ArgError::Malformed(format!(
                        "{node} -> {child} is missing the parent back-edge"
                    )));
                }
            }
            for parent in self.parents(node).iter() {
                if !self.children(*parent).contains(&node) {
                    return Err(ArgError::Malformed(format!(
                        "{parent} -> {node} is missing the child edge"
                    )));
                }
            }
        }
        for (node, by) in self.covered_by.iter() {
            if !self.contains(*by) || !self.contains(*node) {
                return Err(ArgError::DanglingCoverage {
                    node: *node,
                    by: *by,
                });
            }
        }
        self.check_acyclic()
    }

    fn check_acyclic(&self) -> Result<(), ArgError> {
        // 0: unvisited, 1: on stack, 2: done
        let mut color = NodeMetaData::<u8>::default();
        for (start, _) in self.iter() {
            if *color.get(start) != 0 {
                continue;
            }
            let mut todo = vec![(start, false)];
            while let Some((node, finished)) = todo.pop() {
                if finished {
                    *color.get_mut(node) = 2;
                    continue;
                }
                if *color.get(node) != 0 {
                    continue;
                }
                *color.get_mut(node) = 1;
                todo.push((node, true));
                for child in self.children(node).iter() {
                    match *color.get(*child) {
                        0 => todo.push((*child, false)),
                        1 => {
                            return Err(ArgError::Malformed(format!(
                                "cycle through {node} -> {child}"
                            )))
                        }
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }
}
