// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::arg::{fingerprint_paths, AbstractState, Arg, ArgPath, NodeRef};
use crate::cegar::oracle::{Counterexample, FeasibilityChecker, Interpolant, PathInterpolator};
use crate::cegar::tree::InterpolationTree;
use crate::error::{ArgError, CegarError, OracleError};
use crate::precision::{
    CompositePrecision, PrecisionComponent, PrecisionKind, PredicatePrecision, VariablePrecision,
};
use crate::reached::ReachedSet;
use crate::shutdown::ShutdownNotifier;
use indexmap::{IndexMap, IndexSet};
use std::collections::{HashSet, VecDeque};
use std::fmt::Display;
use std::io::BufWriter;
use std::marker::PhantomData;
use std::str::FromStr;

/// Where exploration restarts after a refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartStrategy {
    /// At the root of the graph.
    Root,
    /// Right above the first non-trivial interpolant of every error path.
    #[default]
    Pivot,
    /// At the lowest node common to all pivot roots.
    Common,
}

impl FromStr for RestartStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "root" => Ok(RestartStrategy::Root),
            "pivot" => Ok(RestartStrategy::Pivot),
            "common" => Ok(RestartStrategy::Common),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpolationStrategy {
    #[default]
    TopDown,
    BottomUp,
}

impl FromStr for InterpolationStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "topdown" => Ok(InterpolationStrategy::TopDown),
            "bottomup" => Ok(InterpolationStrategy::BottomUp),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeExportMode {
    #[default]
    Never,
    /// Once per refinement, after all interpolants were computed.
    Final,
    /// After every interpolation step.
    Always,
}

impl FromStr for TreeExportMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "never" => Ok(TreeExportMode::Never),
            "final" => Ok(TreeExportMode::Final),
            "always" => Ok(TreeExportMode::Always),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefinerOptions {
    pub restart: RestartStrategy,
    pub interpolation: InterpolationStrategy,
    /// Move the refinement root up when the same precision increment shows up again.
    pub avoid_similar_repeated_refinement: bool,
    pub export_interpolation_tree: TreeExportMode,
    /// File name template. The first `{}` is replaced by the refinement number, the second one
    /// by the number of the export within that refinement.
    pub interpolation_tree_path: Option<String>,
}

impl Default for RefinerOptions {
    fn default() -> Self {
        Self {
            restart: RestartStrategy::default(),
            interpolation: InterpolationStrategy::default(),
            avoid_similar_repeated_refinement: false,
            export_interpolation_tree: TreeExportMode::default(),
            interpolation_tree_path: Some("interpolation-tree.{}-{}.dot".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefinementResult {
    /// A target is reachable. The graph below all other targets was discarded.
    Feasible(Counterexample),
    /// All error paths were spurious. Exploration continues from the given roots.
    Refined { roots: Vec<NodeRef> },
    /// The refiner has no way left to increase the precision.
    Exhausted,
}

pub trait Refiner<S> {
    fn perform_refinement(
        &mut self,
        reached: &mut ReachedSet<S>,
        shutdown: &ShutdownNotifier,
    ) -> Result<RefinementResult, CegarError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefinerStats {
    pub refinements: usize,
    pub targets: usize,
    pub root_relocations: usize,
    pub repeated_refinements: usize,
    pub tree_exports: usize,
}

/// Refines the value-analysis precision with the variables of interpolants computed along all
/// error paths.
pub struct InterpolationRefiner<C, P, I> {
    checker: C,
    interpolator: P,
    options: RefinerOptions,
    feasible_targets: IndexSet<NodeRef>,
    previous_error_paths: Option<u64>,
    previous_refinements: HashSet<u64>,
    stats: RefinerStats,
    _interpolant: PhantomData<I>,
}

impl<C, P, I> InterpolationRefiner<C, P, I> {
    pub fn new(checker: C, interpolator: P, options: RefinerOptions) -> Self {
        Self {
            checker,
            interpolator,
            options,
            feasible_targets: IndexSet::default(),
            previous_error_paths: None,
            previous_refinements: HashSet::default(),
            stats: RefinerStats::default(),
            _interpolant: PhantomData,
        }
    }

    pub fn options(&self) -> &RefinerOptions {
        &self.options
    }

    pub fn stats(&self) -> &RefinerStats {
        &self.stats
    }

    pub fn checker(&self) -> &C {
        &self.checker
    }

    pub fn interpolator(&self) -> &P {
        &self.interpolator
    }
}

impl<S, C, P, I> Refiner<S> for InterpolationRefiner<C, P, I>
where
    S: AbstractState,
    C: FeasibilityChecker<S, I>,
    P: PathInterpolator<S, I>,
    I: Interpolant + Display,
{
    fn perform_refinement(
        &mut self,
        reached: &mut ReachedSet<S>,
        shutdown: &ShutdownNotifier,
    ) -> Result<RefinementResult, CegarError> {
        shutdown.check()?;
        let memory = self.memory();
        match self.refine_once(reached, shutdown) {
            Err(CegarError::Cancelled(reason)) => {
                tracing::debug!("refinement #{} cancelled, rolling back", self.stats.refinements);
                self.restore(memory);
                Err(CegarError::Cancelled(reason))
            }
            other => other,
        }
    }
}

/// Everything the refiner remembers across iterations.
struct RefinerMemory {
    feasible_targets: IndexSet<NodeRef>,
    previous_error_paths: Option<u64>,
    previous_refinements: HashSet<u64>,
    stats: RefinerStats,
}

impl<C, P, I> InterpolationRefiner<C, P, I>
where
    I: Interpolant + Display,
{
    fn memory(&self) -> RefinerMemory {
        RefinerMemory {
            feasible_targets: self.feasible_targets.clone(),
            previous_error_paths: self.previous_error_paths,
            previous_refinements: self.previous_refinements.clone(),
            stats: self.stats.clone(),
        }
    }

    fn restore(&mut self, memory: RefinerMemory) {
        self.feasible_targets = memory.feasible_targets;
        self.previous_error_paths = memory.previous_error_paths;
        self.previous_refinements = memory.previous_refinements;
        self.stats = memory.stats;
    }

    /// One refinement iteration. The graph is only modified once no cancellation point is left,
    /// so a `Cancelled` result leaves it untouched.
    fn refine_once<S: AbstractState>(
        &mut self,
        reached: &mut ReachedSet<S>,
        shutdown: &ShutdownNotifier,
    ) -> Result<RefinementResult, CegarError>
    where
        C: FeasibilityChecker<S, I>,
        P: PathInterpolator<S, I>,
    {
        self.stats.refinements += 1;
        tracing::debug!("refinement #{}", self.stats.refinements);

        let targets = self.target_states(reached)?;
        let paths = targets
            .iter()
            .map(|t| reached.arg().one_path_to(*t))
            .collect::<Result<Vec<_>, _>>()?;

        let fingerprint = fingerprint_paths(paths.iter());
        if self.previous_error_paths == Some(fingerprint) {
            return Err(CegarError::RepeatedCounterexample {
                path: paths[0].clone(),
            });
        }
        self.previous_error_paths = Some(fingerprint);

        if let Some(cex) = self.find_feasible_path(reached, &paths, shutdown)? {
            return Ok(RefinementResult::Feasible(cex));
        }

        let tree = self.interpolate(reached.arg(), &targets, shutdown)?;
        let roots = tree.refinement_roots(self.options.restart);
        if roots.is_empty() {
            return Err(CegarError::InterpolationFailed {
                path: paths[0].clone(),
                source: OracleError::new("interpolation", "no interpolant blocks any error path"),
            });
        }
        let committed = self.refine_with(reached, &tree, &roots, shutdown)?;
        Ok(RefinementResult::Refined { roots: committed })
    }

    /// Uncovered targets that were not confirmed feasible before.
    fn target_states<S: AbstractState>(
        &mut self,
        reached: &ReachedSet<S>,
    ) -> Result<Vec<NodeRef>, CegarError> {
        let all = reached.target_states();
        let targets: Vec<NodeRef> = all
            .iter()
            .copied()
            .filter(|t| !self.feasible_targets.contains(t))
            .collect();
        if targets.is_empty() {
            return match self.feasible_targets.last() {
                Some(last) if !all.is_empty() => Err(CegarError::RepeatedCounterexample {
                    path: reached.arg().one_path_to(*last)?,
                }),
                _ => Err(CegarError::NoTargets),
            };
        }
        tracing::debug!("number of targets found: {}", targets.len());
        self.stats.targets += targets.len();
        Ok(targets)
    }

    /// Checks every error path. If any is feasible, the first one becomes the counterexample
    /// and the other targets are removed.
    fn find_feasible_path<S: AbstractState>(
        &mut self,
        reached: &mut ReachedSet<S>,
        paths: &[ArgPath],
        shutdown: &ShutdownNotifier,
    ) -> Result<Option<Counterexample>, CegarError>
    where
        C: FeasibilityChecker<S, I>,
    {
        let mut feasible: Option<usize> = None;
        for (ii, path) in paths.iter().enumerate() {
            shutdown.check()?;
            let is_feasible = self
                .checker
                .is_feasible(reached.arg(), path)
                .map_err(CegarError::FeasibilityFailed)?;
            if is_feasible {
                if feasible.is_none() {
                    feasible = Some(ii);
                }
                if let Some(target) = path.last() {
                    self.feasible_targets.insert(target);
                }
            }
        }
        let Some(index) = feasible else {
            return Ok(None);
        };
        let path = paths[index].clone();
        self.previous_error_paths = Some(fingerprint_paths([&path]));
        for (ii, other) in paths.iter().enumerate() {
            if ii == index {
                continue;
            }
            if let Some(target) = other.last() {
                if reached.contains(target) {
                    reached.prune(target)?;
                }
            }
        }
        let model = self
            .checker
            .model(reached.arg(), &path)
            .map_err(CegarError::FeasibilityFailed)?;
        tracing::info!("found a feasible counterexample: {path}");
        Ok(Some(Counterexample { path, model }))
    }

    fn interpolate<S: AbstractState>(
        &mut self,
        arg: &Arg<S>,
        targets: &[NodeRef],
        shutdown: &ShutdownNotifier,
    ) -> Result<InterpolationTree<I>, CegarError>
    where
        C: FeasibilityChecker<S, I>,
        P: PathInterpolator<S, I>,
    {
        let mut tree = InterpolationTree::new(arg, targets, self.options.interpolation)?;
        let mut exports = 0;
        while let Some(mut path) = tree.next_path(arg)? {
            shutdown.check()?;
            let mut initial = tree.initial_interpolant_for(&path);
            if path.first() != Some(tree.root()) {
                let too_weak = self
                    .checker
                    .is_feasible_from(arg, &path, &initial)
                    .map_err(CegarError::FeasibilityFailed)?;
                if too_weak {
                    let last = path.last().ok_or_else(|| {
                        ArgError::Malformed("empty interpolation path".to_string())
                    })?;
                    tracing::trace!("initial interpolant {initial} is too weak, restarting at root");
                    path = arg.one_path_to(last)?;
                    initial = I::initial();
                }
            }
            tracing::trace!(
                "performing interpolation, starting at {:?} using interpolant {initial}",
                path.first()
            );
            let interpolants = match self.interpolator.interpolate(arg, &path, &initial) {
                Ok(i) => i,
                Err(source) => return Err(CegarError::InterpolationFailed { path, source }),
            };
            if interpolants.len() + 1 != path.len() {
                let source = OracleError::new(
                    "interpolation",
                    format!(
                        "expected {} interpolants, got {}",
                        path.len().saturating_sub(1),
                        interpolants.len()
                    ),
                );
                return Err(CegarError::InterpolationFailed { path, source });
            }
            tree.add_interpolants(&path, interpolants);
            if self.options.export_interpolation_tree == TreeExportMode::Always {
                exports += 1;
                self.export_tree(&tree, exports)?;
            }
        }
        if self.options.export_interpolation_tree == TreeExportMode::Final {
            self.export_tree(&tree, 1)?;
        }
        Ok(tree)
    }

    fn export_tree(&mut self, tree: &InterpolationTree<I>, export: usize) -> Result<(), CegarError> {
        let Some(template) = self.options.interpolation_tree_path.as_ref() else {
            return Ok(());
        };
        let filename = template
            .replacen("{}", &self.stats.refinements.to_string(), 1)
            .replacen("{}", &export.to_string(), 1);
        let mut out = BufWriter::new(std::fs::File::create(&filename)?);
        tree.write_dot(&mut out)?;
        self.stats.tree_exports += 1;
        Ok(())
    }

    /// Relocates the roots, merges the precisions of their subtrees and only then prunes.
    fn refine_with<S: AbstractState>(
        &mut self,
        reached: &mut ReachedSet<S>,
        tree: &InterpolationTree<I>,
        roots: &[NodeRef],
        shutdown: &ShutdownNotifier,
    ) -> Result<Vec<NodeRef>, CegarError> {
        let first = reached
            .first_state()
            .and_then(|n| reached.precision(n))
            .ok_or(ArgError::Malformed("reached set is empty".to_string()))?;
        if first.variable().is_none() {
            return Err(CegarError::MissingPrecision("variable"));
        }
        let has_predicate = first.predicate().is_some();

        let mut plan: IndexMap<NodeRef, Vec<PrecisionComponent>> = IndexMap::new();
        for root in roots.iter().copied() {
            let increment = tree.precision_increment(root);
            let mut relocated = self.relocate_refinement_root(reached.arg(), root, has_predicate);
            if roots.len() == 1
                && self.options.avoid_similar_repeated_refinement
                && !self.previous_refinements.insert(increment.fingerprint())
            {
                relocated = self.relocate_repeated_refinement_root(reached.arg(), relocated)?;
            }

            let subtree: Vec<NodeRef> = reached
                .arg()
                .subtree(relocated)
                .into_iter()
                .filter(|n| reached.contains(*n) && !reached.arg().is_covered(*n))
                .collect();
            let mut variable = VariablePrecision::empty(
                first
                    .variable()
                    .map(|v| v.scope())
                    .unwrap_or_default(),
            );
            let mut predicate = PredicatePrecision::empty();
            for node in subtree.iter() {
                if let Some(prec) = reached.precision(*node) {
                    if let Some(v) = prec.variable() {
                        variable = variable.join(v);
                    }
                    if let Some(p) = prec.predicate() {
                        predicate = predicate.join(p);
                    }
                }
            }
            let mut components = vec![PrecisionComponent::Variable(
                variable.with_increment(&increment),
            )];
            if has_predicate {
                components.push(PrecisionComponent::Predicate(predicate));
            }
            match plan.get_mut(&relocated) {
                Some(existing) => {
                    for (e, c) in existing.iter_mut().zip(components.iter()) {
                        if let Some(joined) = e.join(c) {
                            *e = joined;
                        }
                    }
                }
                None => {
                    plan.insert(relocated, components);
                }
            }
        }

        // nothing was modified so far, a cancellation leaves the graph untouched
        shutdown.check()?;
        let mut selector = vec![PrecisionKind::Variable];
        if has_predicate {
            selector.push(PrecisionKind::Predicate);
        }
        let mut committed = vec![];
        for (root, components) in plan {
            if !reached.contains(root) {
                tracing::trace!("refinement root {root} was removed by an earlier root");
                continue;
            }
            let removed = reached.remove_subtree(root, &components, &selector)?;
            tracing::debug!("refined at {root}, removed {} nodes", removed.len());
            committed.push(root);
        }
        Ok(committed)
    }

    /// When the subtree of the root is not closed under coverage, the root moves up the
    /// coverage tree to the first node with several children, but never below the original
    /// root. Only done when a predicate analysis cooperates.
    fn relocate_refinement_root<S>(
        &mut self,
        arg: &Arg<S>,
        root: NodeRef,
        has_predicate: bool,
    ) -> NodeRef {
        if !has_predicate || self.options.restart == RestartStrategy::Root {
            return root;
        }
        let descendants = arg.subtree(root);
        let mut covered: IndexSet<NodeRef> = descendants
            .iter()
            .flat_map(|d| arg.covered_by_this(*d))
            .collect();
        covered.insert(root);
        if covered.iter().all(|c| descendants.contains(c)) {
            return root;
        }

        let mut successors: IndexMap<NodeRef, IndexSet<NodeRef>> = IndexMap::new();
        let mut visited: IndexSet<NodeRef> = covered.clone();
        let mut todo: VecDeque<NodeRef> = covered.into_iter().collect();
        let mut tree_root = None;
        while let Some(current) = todo.pop_front() {
            match arg.first_parent(current) {
                Some(parent) => {
                    successors.entry(parent).or_default().insert(current);
                    if visited.insert(parent) {
                        todo.push_back(parent);
                    }
                }
                None => {
                    if tree_root.is_none() {
                        tree_root = Some(current);
                    }
                }
            }
        }

        let mut new_root = tree_root.unwrap_or(root);
        while new_root != root {
            match successors.get(&new_root) {
                Some(children) if children.len() == 1 => new_root = children[0],
                _ => break,
            }
        }
        self.stats.root_relocations += 1;
        tracing::debug!("relocated refinement root {root} to {new_root}");
        new_root
    }

    /// Moves the root up to the closest ancestor at the same program location, or to the
    /// first node below the graph root.
    fn relocate_repeated_refinement_root<S: AbstractState>(
        &mut self,
        arg: &Arg<S>,
        current: NodeRef,
    ) -> Result<NodeRef, ArgError> {
        self.stats.repeated_refinements += 1;
        let path = arg.one_path_to(current)?;
        let location = arg
            .state(current)
            .ok_or(ArgError::UnknownNode(current))?
            .location();
        let ancestor = path.steps().iter().rev().skip(1).find(|s| s.location == location);
        let new_root = match ancestor {
            Some(step) => step.node,
            None => path.nodes().nth(1).unwrap_or(current),
        };
        tracing::debug!("similar repeated refinement, moving root {current} to {new_root}");
        Ok(new_root)
    }
}

/// Supplies a stronger precision without looking at error paths.
pub trait PrecisionAdjuster {
    /// Returns `None` when the precision cannot be increased any further.
    fn adjust(&mut self, precision: &CompositePrecision) -> Option<CompositePrecision>;
}

impl<F> PrecisionAdjuster for F
where
    F: FnMut(&CompositePrecision) -> Option<CompositePrecision>,
{
    fn adjust(&mut self, precision: &CompositePrecision) -> Option<CompositePrecision> {
        self(precision)
    }
}

/// Increases the precision on every call and restarts the exploration from scratch.
pub struct UnguidedRefiner<F> {
    adjuster: F,
    refinements: usize,
}

impl<F: PrecisionAdjuster> UnguidedRefiner<F> {
    pub fn new(adjuster: F) -> Self {
        Self {
            adjuster,
            refinements: 0,
        }
    }

    pub fn refinements(&self) -> usize {
        self.refinements
    }
}

impl<S: AbstractState, F: PrecisionAdjuster> Refiner<S> for UnguidedRefiner<F> {
    fn perform_refinement(
        &mut self,
        reached: &mut ReachedSet<S>,
        shutdown: &ShutdownNotifier,
    ) -> Result<RefinementResult, CegarError> {
        shutdown.check()?;
        let root = reached
            .arg()
            .root()
            .ok_or(ArgError::Malformed("graph without root".to_string()))?;
        let current = reached
            .precision(root)
            .ok_or(ArgError::UnknownNode(root))?
            .clone();
        let Some(adjusted) = self.adjuster.adjust(&current) else {
            tracing::info!("no more refinement possible");
            return Ok(RefinementResult::Exhausted);
        };
        let selector: Vec<PrecisionKind> = adjusted.components().iter().map(|c| c.kind()).collect();
        reached.remove_subtree(root, adjusted.components(), &selector)?;
        self.refinements += 1;
        tracing::info!("additional refinement requested, restarting at {root}");
        Ok(RefinementResult::Refined { roots: vec![root] })
    }
}
