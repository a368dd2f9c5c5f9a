// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::arg::{AbstractState, Arg, ArgPath, Location, NodeRef};
use crate::cegar::oracle::Interpolant;
use crate::cegar::refiner::{InterpolationStrategy, RestartStrategy};
use crate::error::ArgError;
use crate::precision::PrecisionIncrement;
use indexmap::{IndexMap, IndexSet};
use std::collections::VecDeque;
use std::fmt::Display;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    /// Interpolate from `start` through `child` down to the next branching point.
    Segment { start: NodeRef, child: NodeRef },
    /// Interpolate the whole path from the root to the target.
    Target(NodeRef),
}

/// The union of the error paths of all targets. Paths share their common prefix, so the
/// interpolant stored for a node has to hold for every error path running through it.
#[derive(Debug, Clone)]
pub struct InterpolationTree<I> {
    root: NodeRef,
    targets: Vec<NodeRef>,
    strategy: InterpolationStrategy,
    predecessors: IndexMap<NodeRef, NodeRef>,
    successors: IndexMap<NodeRef, Vec<NodeRef>>,
    locations: IndexMap<NodeRef, Location>,
    interpolants: IndexMap<NodeRef, I>,
    todo: VecDeque<Pending>,
}

impl<I: Interpolant> InterpolationTree<I> {
    pub fn new<S: AbstractState>(
        arg: &Arg<S>,
        targets: &[NodeRef],
        strategy: InterpolationStrategy,
    ) -> Result<Self, ArgError> {
        let root = arg.root().ok_or_else(|| {
            ArgError::Malformed("cannot build an interpolation tree without root".to_string())
        })?;
        let mut tree = Self {
            root,
            targets: targets.to_vec(),
            strategy,
            predecessors: IndexMap::default(),
            successors: IndexMap::default(),
            locations: IndexMap::default(),
            interpolants: IndexMap::default(),
            todo: VecDeque::default(),
        };
        for target in targets.iter() {
            let path = arg.one_path_to(*target)?;
            for step in path.steps() {
                tree.locations.insert(step.node, step.location);
            }
            let nodes: Vec<NodeRef> = path.nodes().collect();
            for pair in nodes.windows(2) {
                let (parent, child) = (pair[0], pair[1]);
                if tree.predecessors.insert(child, parent).is_none() {
                    tree.successors.entry(parent).or_default().push(child);
                }
            }
        }
        tree.interpolants.insert(root, I::initial());
        match strategy {
            InterpolationStrategy::TopDown => tree.push_segments_below(root),
            InterpolationStrategy::BottomUp => {
                tree.todo.extend(targets.iter().map(|t| Pending::Target(*t)))
            }
        }
        Ok(tree)
    }

    pub fn root(&self) -> NodeRef {
        self.root
    }

    pub fn targets(&self) -> &[NodeRef] {
        &self.targets
    }

    pub fn interpolant(&self, node: NodeRef) -> Option<&I> {
        self.interpolants.get(&node)
    }

    pub fn predecessor(&self, node: NodeRef) -> Option<NodeRef> {
        self.predecessors.get(&node).copied()
    }

    pub fn successors(&self, node: NodeRef) -> &[NodeRef] {
        self.successors
            .get(&node)
            .map(|s| s.as_slice())
            .unwrap_or(&[])
    }

    pub fn location(&self, node: NodeRef) -> Option<Location> {
        self.locations.get(&node).copied()
    }

    fn is_false(&self, node: NodeRef) -> bool {
        self.interpolants
            .get(&node)
            .map(|i| i.is_false())
            .unwrap_or(false)
    }

    fn is_non_trivial(&self, node: NodeRef) -> bool {
        self.interpolants
            .get(&node)
            .map(|i| !i.is_trivial())
            .unwrap_or(false)
    }

    fn push_segments_below(&mut self, start: NodeRef) {
        if self.is_false(start) {
            return;
        }
        for child in self.successors(start).to_vec() {
            self.todo.push_back(Pending::Segment { start, child });
        }
    }

    pub fn has_next_path(&self) -> bool {
        !self.todo.is_empty()
    }

    /// The next path that needs interpolants, or `None` once every error path is either
    /// annotated or known to be blocked by a `false` interpolant.
    pub fn next_path<S: AbstractState>(
        &mut self,
        arg: &Arg<S>,
    ) -> Result<Option<ArgPath>, ArgError> {
        while let Some(pending) = self.todo.pop_front() {
            match pending {
                Pending::Segment { start, child } => {
                    if self.is_false(start) {
                        tracing::trace!("skipping interpolation below {start}, its interpolant is false");
                        continue;
                    }
                    let mut nodes = vec![start, child];
                    let mut current = child;
                    while let [only] = self.successors(current) {
                        current = *only;
                        nodes.push(current);
                    }
                    return ArgPath::from_nodes(arg, &nodes).map(Some);
                }
                Pending::Target(target) => {
                    let nodes = self.tree_path_to(target);
                    if nodes.iter().any(|n| self.is_false(*n)) {
                        tracing::trace!(
                            "skipping interpolation of {target}, false interpolant on its path"
                        );
                        continue;
                    }
                    return ArgPath::from_nodes(arg, &nodes).map(Some);
                }
            }
        }
        Ok(None)
    }

    /// The interpolant to start the interpolation of `path` with.
    pub fn initial_interpolant_for(&self, path: &ArgPath) -> I {
        path.first()
            .and_then(|n| self.interpolants.get(&n))
            .cloned()
            .unwrap_or_else(I::initial)
    }

    /// Stores the interpolants computed for `path`. There needs to be exactly one interpolant
    /// for every step after the first one. A node that already has an interpolant gets the join
    /// of both.
    pub fn add_interpolants(&mut self, path: &ArgPath, interpolants: Vec<I>) {
        assert_eq!(
            interpolants.len() + 1,
            path.len(),
            "expected one interpolant per path step after the first"
        );
        for (step, itp) in path.steps().iter().skip(1).zip(interpolants) {
            let joined = match self.interpolants.get(&step.node) {
                Some(existing) => existing.join(&itp),
                None => itp,
            };
            self.interpolants.insert(step.node, joined);
        }
        if self.strategy == InterpolationStrategy::TopDown {
            if let Some(last) = path.last() {
                self.push_segments_below(last);
            }
        }
    }

    /// Nodes from the tree root down to `node`.
    fn tree_path_to(&self, node: NodeRef) -> Vec<NodeRef> {
        let mut nodes = vec![node];
        let mut current = node;
        while let Some(pred) = self.predecessor(current) {
            nodes.push(pred);
            current = pred;
        }
        nodes.reverse();
        nodes
    }

    /// The nodes at which exploration restarts after the refinement.
    pub fn refinement_roots(&self, strategy: RestartStrategy) -> Vec<NodeRef> {
        match strategy {
            RestartStrategy::Root => vec![self.root],
            RestartStrategy::Pivot => self.pivot_roots().into_iter().collect(),
            RestartStrategy::Common => {
                let pivots = self.pivot_roots();
                if pivots.is_empty() {
                    return vec![];
                }
                let paths: Vec<Vec<NodeRef>> =
                    pivots.iter().map(|p| self.tree_path_to(*p)).collect();
                let mut common = self.root;
                for (ii, node) in paths[0].iter().enumerate() {
                    if paths.iter().all(|p| p.get(ii) == Some(node)) {
                        common = *node;
                    } else {
                        break;
                    }
                }
                vec![common]
            }
        }
    }

    /// For every target, the last node before the first non-trivial interpolant on its path.
    fn pivot_roots(&self) -> IndexSet<NodeRef> {
        let mut roots = IndexSet::new();
        for target in self.targets.iter() {
            let path = self.tree_path_to(*target);
            match path.iter().position(|n| self.is_non_trivial(*n)) {
                Some(0) => {
                    roots.insert(self.root);
                }
                Some(pivot) => {
                    roots.insert(path[pivot - 1]);
                }
                None => {
                    tracing::warn!("no interpolant blocks the error path to {target}");
                }
            }
        }
        roots
    }

    /// Collects the variables of all non-trivial interpolants at or below `root`. Nodes below a
    /// `false` interpolant do not contribute.
    pub fn precision_increment(&self, root: NodeRef) -> PrecisionIncrement {
        let mut increment = PrecisionIncrement::default();
        let mut todo = vec![root];
        while let Some(node) = todo.pop() {
            if let Some(itp) = self.interpolants.get(&node) {
                if !itp.is_trivial() {
                    if let Some(location) = self.location(node) {
                        for var in itp.variables() {
                            increment.add(location, var);
                        }
                    }
                }
                if itp.is_false() {
                    continue;
                }
            }
            todo.extend(self.successors(node).iter().copied());
        }
        increment
    }
}

impl<I: Interpolant + Display> InterpolationTree<I> {
    pub fn write_dot<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writeln!(writer, "digraph \"interpolation tree\" {{")?;
        let mut nodes: Vec<NodeRef> = self.locations.keys().copied().collect();
        nodes.sort();
        for node in nodes.iter() {
            let location = self.locations[node];
            let itp = match self.interpolants.get(node) {
                Some(itp) => itp.to_string(),
                None => "-".to_string(),
            };
            let shape = if self.targets.contains(node) {
                ", shape=box"
            } else {
                ""
            };
            writeln!(
                writer,
                "  \"{node}\" [label=\"{node} @ {location}\\n{}\"{shape}];",
                itp.replace('"', "\\\"")
            )?;
        }
        for node in nodes.iter() {
            for child in self.successors(*node) {
                writeln!(writer, "  \"{node}\" -> \"{child}\";")?;
            }
        }
        writeln!(writer, "}}")
    }

    pub fn to_dot_string(&self) -> String {
        let mut buf = Vec::new();
        self.write_dot(&mut buf)
            .expect("Failed to write to string!");
        String::from_utf8(buf).expect("Failed to read string we wrote!")
    }
}
