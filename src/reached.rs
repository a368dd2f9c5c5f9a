// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::arg::{AbstractState, Arg, Location, NodeMetaData, NodeRef};
use crate::error::ArgError;
use crate::precision::{CompositePrecision, PrecisionComponent, PrecisionKind};
use indexmap::{IndexMap, IndexSet};
use std::collections::VecDeque;
use std::num::NonZeroU32;

/// Identity of an interned precision. Two nodes with equal precisions share the same reference.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct PrecisionRef(NonZeroU32);

impl PrecisionRef {
    fn from_index(index: usize) -> Self {
        PrecisionRef(NonZeroU32::new((index + 1) as u32).unwrap())
    }

    fn index(&self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// The set of explored nodes together with their precision and the waitlist of nodes whose
/// successors still need to be computed.
#[derive(Debug, Clone)]
pub struct ReachedSet<S> {
    arg: Arg<S>,
    precisions: IndexSet<CompositePrecision>,
    /// insertion ordered
    entries: IndexMap<NodeRef, PrecisionRef>,
    waitlist: VecDeque<NodeRef>,
    in_waitlist: NodeMetaData<bool>,
    by_location: IndexMap<Location, IndexSet<NodeRef>>,
}

impl<S: AbstractState> ReachedSet<S> {
    /// Creates a graph with a single root node that is waiting to be explored.
    pub fn new(root_state: S, precision: CompositePrecision) -> Result<Self, ArgError> {
        let mut arg = Arg::default();
        let root = arg.add_root(root_state)?;
        let mut reached = Self {
            arg,
            precisions: IndexSet::default(),
            entries: IndexMap::default(),
            waitlist: VecDeque::default(),
            in_waitlist: NodeMetaData::default(),
            by_location: IndexMap::default(),
        };
        reached.add(root, precision)?;
        Ok(reached)
    }

    pub fn arg(&self) -> &Arg<S> {
        &self.arg
    }

    /// Direct graph access for coverage updates. Nodes created through this handle still need
    /// to be registered with [`ReachedSet::add`].
    pub fn arg_mut(&mut self) -> &mut Arg<S> {
        &mut self.arg
    }

    /// Registers a node that is already part of the graph. Covered nodes are not put on the
    /// waitlist.
    pub fn add(&mut self, node: NodeRef, precision: CompositePrecision) -> Result<(), ArgError> {
        let location = self
            .arg
            .state(node)
            .ok_or(ArgError::UnknownNode(node))?
            .location();
        let prec = self.intern(precision);
        self.entries.insert(node, prec);
        self.by_location.entry(location).or_default().insert(node);
        if !self.arg.is_covered(node) {
            self.push_waiting(node);
        }
        Ok(())
    }

    /// Creates a child of `parent` and registers it.
    pub fn add_successor(
        &mut self,
        parent: NodeRef,
        state: S,
        precision: CompositePrecision,
    ) -> Result<NodeRef, ArgError> {
        if !self.contains(parent) {
            return Err(ArgError::UnknownNode(parent));
        }
        let node = self.arg.add_child(parent, state)?;
        self.add(node, precision)?;
        Ok(node)
    }

    pub fn re_add_to_waitlist(&mut self, node: NodeRef) -> Result<(), ArgError> {
        if !self.contains(node) {
            return Err(ArgError::UnknownNode(node));
        }
        self.push_waiting(node);
        Ok(())
    }

    fn push_waiting(&mut self, node: NodeRef) {
        if !*self.in_waitlist.get(node) {
            *self.in_waitlist.get_mut(node) = true;
            self.waitlist.push_back(node);
        }
    }

    /// Next node to explore. Nodes that were removed or covered while waiting are skipped.
    pub fn pop_from_waitlist(&mut self) -> Option<NodeRef> {
        while let Some(node) = self.waitlist.pop_front() {
            *self.in_waitlist.get_mut(node) = false;
            if self.contains(node) && !self.arg.is_covered(node) {
                return Some(node);
            }
        }
        None
    }

    pub fn has_waiting_state(&self) -> bool {
        self.waitlist
            .iter()
            .any(|n| self.contains(*n) && !self.arg.is_covered(*n))
    }

    pub fn waitlist(&self) -> impl Iterator<Item = NodeRef> + '_ {
        self.waitlist
            .iter()
            .copied()
            .filter(|n| self.contains(*n) && !self.arg.is_covered(*n))
    }

    fn intern(&mut self, precision: CompositePrecision) -> PrecisionRef {
        let (index, _) = self.precisions.insert_full(precision);
        PrecisionRef::from_index(index)
    }

    pub fn precision(&self, node: NodeRef) -> Option<&CompositePrecision> {
        self.entries
            .get(&node)
            .and_then(|p| self.precisions.get_index(p.index()))
    }

    pub fn precision_ref(&self, node: NodeRef) -> Option<PrecisionRef> {
        self.entries.get(&node).copied()
    }

    pub fn resolve_precision(&self, prec: PrecisionRef) -> &CompositePrecision {
        &self.precisions[prec.index()]
    }

    pub fn update_precision(
        &mut self,
        node: NodeRef,
        precision: CompositePrecision,
    ) -> Result<(), ArgError> {
        if !self.contains(node) {
            return Err(ArgError::UnknownNode(node));
        }
        let prec = self.intern(precision);
        self.entries.insert(node, prec);
        Ok(())
    }

    pub fn contains(&self, node: NodeRef) -> bool {
        self.entries.contains_key(&node)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first_state(&self) -> Option<NodeRef> {
        self.entries.keys().next().copied()
    }

    /// The most recently registered uncovered target, where a counterexample starts.
    pub fn last_state(&self) -> Option<NodeRef> {
        self.entries
            .keys()
            .rev()
            .copied()
            .find(|n| self.is_uncovered_target(*n))
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeRef, &S, &CompositePrecision)> + '_ {
        self.entries.iter().filter_map(|(node, prec)| {
            self.arg
                .state(*node)
                .map(|s| (*node, s, &self.precisions[prec.index()]))
        })
    }

    pub fn nodes_at(&self, location: Location) -> impl Iterator<Item = NodeRef> + '_ {
        self.by_location
            .get(&location)
            .into_iter()
            .flatten()
            .copied()
    }

    /// Uncovered target nodes in the order they were registered.
    pub fn target_states(&self) -> Vec<NodeRef> {
        self.entries
            .keys()
            .copied()
            .filter(|n| self.is_uncovered_target(*n))
            .collect()
    }

    fn is_uncovered_target(&self, node: NodeRef) -> bool {
        !self.arg.is_covered(node) && self.arg.state(node).map(|s| s.is_target()).unwrap_or(false)
    }

    fn forget(&mut self, node: NodeRef) {
        self.entries.shift_remove(&node);
        if let Some(location) = self.arg.state(node).map(|s| s.location()) {
            if let Some(nodes) = self.by_location.get_mut(&location) {
                nodes.shift_remove(&node);
            }
        }
    }

    /// Removes the given nodes, which must be ordered children first. Returns the surviving
    /// nodes that lost their coverage.
    fn remove_bottom_up(
        &mut self,
        nodes: impl Iterator<Item = NodeRef>,
    ) -> Result<Vec<NodeRef>, ArgError> {
        let mut uncovered = vec![];
        for node in nodes {
            self.forget(node);
            uncovered.extend(self.arg.remove_from_graph(node)?);
        }
        uncovered.retain(|n| self.contains(*n));
        for node in uncovered.iter() {
            self.push_waiting(*node);
        }
        Ok(uncovered)
    }

    /// Removes every strict descendant of `root` that is not held by a node outside of the
    /// subtree. `root` stays, gets its `selector` precision components replaced by the ones in
    /// `new_precisions` and is put back on the waitlist. Nodes that lose their coverage are
    /// re-enqueued as well. Returns the removed nodes.
    pub fn remove_subtree(
        &mut self,
        root: NodeRef,
        new_precisions: &[PrecisionComponent],
        selector: &[PrecisionKind],
    ) -> Result<Vec<NodeRef>, ArgError> {
        let old = self
            .precision(root)
            .ok_or(ArgError::UnknownNode(root))?
            .clone();
        let removable = self.arg.removable_subtree(root);
        let removed: Vec<NodeRef> = removable.iter().skip(1).rev().copied().collect();
        self.remove_bottom_up(removed.iter().copied())?;
        // children that are shared with nodes outside of the subtree survive, but not as
        // successors of the root
        let survivors: Vec<NodeRef> = self.arg.children(root).to_vec();
        for child in survivors {
            self.arg.unlink(root, child);
        }
        self.arg.set_uncovered(root);
        let updated = old.replace_matching(new_precisions, selector);
        self.update_precision(root, updated)?;
        self.push_waiting(root);
        Ok(removed)
    }

    /// Removes `node` together with everything that is only reachable through it.
    pub fn prune(&mut self, node: NodeRef) -> Result<Vec<NodeRef>, ArgError> {
        if !self.contains(node) {
            return Err(ArgError::UnknownNode(node));
        }
        if self.arg.is_root(node) {
            return Err(ArgError::RootDetach(node));
        }
        let removed: Vec<NodeRef> = self.arg.removable_subtree(node).into_iter().rev().collect();
        self.remove_bottom_up(removed.iter().copied())?;
        Ok(removed)
    }

    /// Replaces `existing` by a new node carrying `joined`. The new node inherits the parents
    /// of `existing` and additionally gets `frontier` as parent, unless `frontier` itself was
    /// part of the discarded subtree.
    pub fn replace_with_join(
        &mut self,
        existing: NodeRef,
        frontier: NodeRef,
        joined: S,
        precision: CompositePrecision,
    ) -> Result<NodeRef, ArgError> {
        let mut parents: Vec<NodeRef> = self.arg.parents(existing).to_vec();
        self.prune(existing)?;
        if self.contains(frontier) && !parents.contains(&frontier) {
            parents.push(frontier);
        }
        parents.retain(|p| self.contains(*p));
        let node = self.arg.add_joined(&parents, joined)?;
        self.add(node, precision)?;
        Ok(node)
    }

    /// Removes entries that can no longer be reached from the root. Returns how many there were.
    pub fn sweep(&mut self) -> Result<usize, ArgError> {
        let reachable = match self.arg.root() {
            Some(root) => self.arg.subtree(root),
            None => IndexSet::default(),
        };
        let unreachable: Vec<NodeRef> = self
            .arg
            .iter()
            .map(|(n, _)| n)
            .filter(|n| !reachable.contains(n))
            .collect();
        let count = unreachable.len();
        self.remove_bottom_up(unreachable.into_iter())?;
        Ok(count)
    }

    /// Checks the graph invariants and that exactly the nodes reachable from the root are
    /// registered.
    pub fn check_consistency(&self) -> Result<(), ArgError> {
        self.arg.check_well_formed()?;
        let reachable = match self.arg.root() {
            Some(root) => self.arg.subtree(root),
            None => IndexSet::default(),
        };
        for node in reachable.iter() {
            if !self.contains(*node) {
                return Err(ArgError::Malformed(format!(
                    "{node} is reachable but not registered"
                )));
            }
        }
        for node in self.entries.keys() {
            if !reachable.contains(node) {
                return Err(ArgError::Malformed(format!(
                    "{node} is registered but unreachable"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precision::{PrecisionIncrement, Variable, VariablePrecision};

    #[derive(Debug, Clone, PartialEq)]
    struct St(u32, bool);

    impl AbstractState for St {
        fn location(&self) -> Location {
            Location(self.0)
        }
        fn is_target(&self) -> bool {
            self.1
        }
    }

    fn prec() -> CompositePrecision {
        CompositePrecision::new([PrecisionComponent::Variable(VariablePrecision::default())])
    }

    #[test]
    fn waitlist_is_fifo_and_skips_covered() {
        let mut reached = ReachedSet::new(St(0, false), prec()).unwrap();
        let root = reached.pop_from_waitlist().unwrap();
        let a = reached.add_successor(root, St(1, false), prec()).unwrap();
        let b = reached.add_successor(root, St(1, false), prec()).unwrap();
        let c = reached.add_successor(root, St(2, false), prec()).unwrap();
        reached.arg_mut().set_covered(b, a).unwrap();
        assert_eq!(reached.nodes_at(Location(1)).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(reached.pop_from_waitlist(), Some(a));
        assert_eq!(reached.pop_from_waitlist(), Some(c));
        assert_eq!(reached.pop_from_waitlist(), None);
        assert_eq!(reached.last_state(), None);
    }

    #[test]
    fn precisions_are_interned() {
        let mut reached = ReachedSet::new(St(0, false), prec()).unwrap();
        let root = reached.first_state().unwrap();
        let a = reached.add_successor(root, St(1, false), prec()).unwrap();
        assert_eq!(reached.precision_ref(root), reached.precision_ref(a));

        let mut inc = PrecisionIncrement::default();
        inc.add(Location(1), Variable::new("x"));
        let stronger = CompositePrecision::new([PrecisionComponent::Variable(
            VariablePrecision::default().with_increment(&inc),
        )]);
        reached.update_precision(a, stronger.clone()).unwrap();
        assert_ne!(reached.precision_ref(root), reached.precision_ref(a));
        assert_eq!(reached.precision(a), Some(&stronger));
    }

    #[test]
    fn prune_rejects_the_root() {
        let mut reached = ReachedSet::new(St(0, false), prec()).unwrap();
        let root = reached.first_state().unwrap();
        assert_eq!(reached.prune(root), Err(ArgError::RootDetach(root)));
    }

    #[test]
    fn sweep_drops_unreachable_entries() {
        let mut reached = ReachedSet::new(St(0, false), prec()).unwrap();
        let root = reached.first_state().unwrap();
        let a = reached.add_successor(root, St(1, false), prec()).unwrap();
        let b = reached.add_successor(a, St(2, false), prec()).unwrap();
        reached.arg_mut().unlink(root, a);
        assert!(reached.check_consistency().is_err());
        assert_eq!(reached.sweep().unwrap(), 2);
        assert!(!reached.contains(b));
        reached.check_consistency().unwrap();
    }
}
