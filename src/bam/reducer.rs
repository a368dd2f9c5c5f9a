// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::arg::Location;
use crate::bam::block::{Block, BlockId, RelevanceOracle};
use crate::bam::ssa::{InstantiatedPredicate, SsaMap};
use crate::precision::{Predicate, PredicatePrecision, Variable};
use indexmap::IndexSet;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::num::NonZeroU32;

/// State of a predicate analysis as far as block summarization is concerned.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct BlockState {
    /// Predicates that hold in this state.
    pub abstraction: BTreeSet<Predicate>,
    /// Indices of the path formula since the last abstraction.
    pub ssa: SsaMap,
    /// Facts of the block formula that led to the abstraction.
    pub block_formula: Vec<InstantiatedPredicate>,
    pub block_ssa: SsaMap,
    pub is_abstraction: bool,
    /// Where the next abstraction has to be computed, set for states that were rebuilt after
    /// a call.
    pub abstraction_location: Option<Location>,
}

impl BlockState {
    pub fn abstraction(predicates: impl IntoIterator<Item = Predicate>, ssa: SsaMap) -> Self {
        Self {
            abstraction: predicates.into_iter().collect(),
            ssa,
            is_abstraction: true,
            ..Default::default()
        }
    }

    pub fn with_block_formula(
        mut self,
        facts: impl IntoIterator<Item = Predicate>,
        block_ssa: SsaMap,
    ) -> Self {
        self.block_formula = facts
            .into_iter()
            .map(|p| InstantiatedPredicate::new(p, &block_ssa))
            .collect();
        self.block_ssa = block_ssa;
        self
    }
}

/// Identity of a top-level predicate precision known to the reducer.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct PrecisionId(NonZeroU32);

impl PrecisionId {
    fn from_index(index: usize) -> Self {
        PrecisionId(NonZeroU32::new((index + 1) as u32).unwrap())
    }

    fn index(&self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// A view of a top-level predicate precision restricted to one block.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ReducedPrecision {
    root: PrecisionId,
    block: BlockId,
    function: String,
    global: BTreeSet<Predicate>,
    local: BTreeMap<Location, BTreeSet<Predicate>>,
    function_predicates: BTreeSet<Predicate>,
}

impl ReducedPrecision {
    /// The top-level precision this view was derived from.
    pub fn root(&self) -> PrecisionId {
        self.root
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn global(&self) -> &BTreeSet<Predicate> {
        &self.global
    }

    pub fn local(&self) -> &BTreeMap<Location, BTreeSet<Predicate>> {
        &self.local
    }

    /// Location-specific predicates if there are any, the global ones otherwise. The
    /// predicates of the block's function are always included.
    pub fn predicates_at(&self, location: Location) -> BTreeSet<&Predicate> {
        let mut out: BTreeSet<&Predicate> = match self.local.get(&location) {
            Some(preds) if !preds.is_empty() => preds.iter().collect(),
            _ => self.global.iter().collect(),
        };
        out.extend(self.function_predicates.iter());
        out
    }
}

/// Key under which block summaries are cached.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub struct StateKey {
    pub abstraction: BTreeSet<Predicate>,
    pub precision: PrecisionId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReducerStats {
    pub reductions: usize,
    pub expansions: usize,
    pub precision_cache_hits: usize,
    pub precision_cache_misses: usize,
}

/// Projects predicate states and precisions onto blocks and back.
pub struct Reducer<R> {
    relevance: R,
    precisions: IndexSet<PredicatePrecision>,
    global: Option<PrecisionId>,
    cache: HashMap<(PrecisionId, BlockId), ReducedPrecision>,
    stats: ReducerStats,
}

impl<R: RelevanceOracle> Reducer<R> {
    pub fn new(relevance: R) -> Self {
        Self {
            relevance,
            precisions: IndexSet::default(),
            global: None,
            cache: HashMap::default(),
            stats: ReducerStats::default(),
        }
    }

    pub fn stats(&self) -> &ReducerStats {
        &self.stats
    }

    pub fn relevance(&self) -> &R {
        &self.relevance
    }

    /// Drops all predicates of the abstraction that do not matter inside `block`. States that
    /// are not abstraction states are returned unchanged.
    pub fn reduce(&mut self, state: &BlockState, block: &Block) -> BlockState {
        if !state.is_abstraction {
            return state.clone();
        }
        self.stats.reductions += 1;
        let irrelevant = self.relevance.irrelevant(block, state.abstraction.iter());
        tracing::trace!("reducing to {}: dropping {} predicates", block.id, irrelevant.len());
        BlockState {
            abstraction: state
                .abstraction
                .iter()
                .filter(|p| !irrelevant.contains(*p))
                .cloned()
                .collect(),
            ssa: state.ssa.clone(),
            block_formula: state.block_formula.clone(),
            block_ssa: state.block_ssa.clone(),
            is_abstraction: true,
            abstraction_location: None,
        }
    }

    /// Adds back the facts of `root` that the reduction to `block` dropped. Variables that the
    /// reduced state has no index for take their index from `root`.
    pub fn expand(&mut self, root: &BlockState, block: &Block, reduced: &BlockState) -> BlockState {
        if !reduced.is_abstraction {
            return reduced.clone();
        }
        self.stats.expansions += 1;
        let relevant_root = self.relevance.relevant(block, root.abstraction.iter());
        let mut abstraction = reduced.abstraction.clone();
        abstraction.extend(
            root.abstraction
                .iter()
                .filter(|p| !relevant_root.contains(*p))
                .cloned(),
        );
        let mut ssa = reduced.ssa.clone();
        for var in root.ssa.variables() {
            if ssa.index(var).is_none() {
                if let Some(index) = root.ssa.index(var) {
                    ssa.set_index(var, index);
                }
            }
        }
        BlockState {
            abstraction,
            ssa,
            block_formula: reduced.block_formula.clone(),
            block_ssa: reduced.block_ssa.clone(),
            is_abstraction: true,
            abstraction_location: reduced.abstraction_location,
        }
    }

    /// Combines the call edge formula of `entry` with the summary in `expanded`. Parameters
    /// keep the index of the call, return variables and all other variables touched by the
    /// callee get indices that are fresh with respect to the call site. The result needs a new
    /// abstraction at `return_location`.
    pub fn rebuild_after_call(
        &mut self,
        root: &BlockState,
        entry: &BlockState,
        expanded: &BlockState,
        return_location: Location,
    ) -> BlockState {
        if !expanded.is_abstraction {
            return expanded.clone();
        }
        let mut entry_with_ret = entry.block_ssa.clone();
        let mut summary_ssa = entry.block_ssa.clone();
        let expanded_ssa = &expanded.block_ssa;
        for var in expanded_ssa.variables() {
            let Some(expanded_index) = expanded_ssa.index(var) else {
                continue;
            };
            match entry_with_ret.index(var) {
                None => {
                    entry_with_ret.set_index(var, expanded_index);
                    summary_ssa.set_index(var, expanded_index);
                }
                Some(entry_index) if var.is_param() => {
                    entry_with_ret.set_index(var, entry_index);
                    summary_ssa.set_index(var, entry_index);
                }
                Some(_) if var.is_return() => {
                    let index = expanded_index.max(entry_with_ret.fresh_index(var));
                    entry_with_ret.set_index(var, index);
                    summary_ssa.set_index(var, index);
                }
                Some(_) => {
                    let index = expanded_index.max(entry_with_ret.fresh_index(var));
                    entry_with_ret.set_latest_used(var, index);
                    summary_ssa.set_index(var, index);
                }
            }
        }
        tracing::trace!("rebuilt call: entry {entry_with_ret}, summary {summary_ssa}");

        let mut block_formula = entry.block_formula.clone();
        block_formula.extend(
            expanded
                .abstraction
                .iter()
                .map(|p| InstantiatedPredicate::new(p.clone(), &summary_ssa)),
        );
        BlockState {
            abstraction: root.abstraction.clone(),
            ssa: entry_with_ret.clone(),
            block_formula,
            block_ssa: entry_with_ret,
            is_abstraction: false,
            abstraction_location: Some(return_location),
        }
    }

    /// Reconciles the indices before a call (`root`) with the ones at the return (`expanded`).
    /// Scoped locals that the caller never saw take the maximum index, known locals only mark
    /// it as used. Globals and return variables take the maximum since the caller's index is
    /// outdated.
    pub fn update_indices(&self, root: &SsaMap, expanded: &SsaMap) -> SsaMap {
        let mut out = root.clone();
        for var in expanded.all_variables() {
            let Some(expanded_index) = expanded.latest_used(var) else {
                continue;
            };
            let root_index = root.index(var);
            let max = expanded_index.max(root_index.unwrap_or(0));
            if is_scoped_local(var) {
                match root_index {
                    None => out.set_index(var, max),
                    Some(_) => out.set_latest_used(var, max),
                }
            } else {
                out.set_index(var, max);
            }
        }
        out
    }

    /// Registers a top-level precision. Equal precisions share an identity.
    pub fn intern(&mut self, precision: PredicatePrecision) -> PrecisionId {
        let (index, _) = self.precisions.insert_full(precision);
        PrecisionId::from_index(index)
    }

    pub fn resolve(&self, id: PrecisionId) -> &PredicatePrecision {
        &self.precisions[id.index()]
    }

    pub fn global_precision(&self) -> Option<PrecisionId> {
        self.global
    }

    /// Installs a new top-level precision. Reduced precisions derived from the old one are
    /// dropped.
    pub fn replace_global_precision(&mut self, precision: PredicatePrecision) -> PrecisionId {
        let id = self.intern(precision);
        self.global = Some(id);
        self.clear_caches();
        id
    }

    pub fn clear_caches(&mut self) {
        self.cache.clear();
    }

    pub fn reduce_precision(&mut self, precision: PrecisionId, block: &Block) -> ReducedPrecision {
        let key = (precision, block.id);
        if let Some(cached) = self.cache.get(&key) {
            self.stats.precision_cache_hits += 1;
            return cached.clone();
        }
        self.stats.precision_cache_misses += 1;
        let root = &self.precisions[precision.index()];
        let global = self.relevance.relevant(block, root.global().iter());
        let local = root
            .local()
            .iter()
            .filter(|(loc, _)| block.contains(**loc))
            .map(|(loc, preds)| (*loc, self.relevance.relevant(block, preds.iter())))
            .collect();
        let function_predicates = root
            .function_predicates(&block.function)
            .cloned()
            .unwrap_or_default();
        let reduced = ReducedPrecision {
            root: precision,
            block: block.id,
            function: block.function.clone(),
            global,
            local,
            function_predicates,
        };
        self.cache.insert(key, reduced.clone());
        reduced
    }

    /// Joins the top-level precision of `root` with the one that was refined inside the block
    /// and reduces the result to `root_block`.
    pub fn expand_precision(
        &mut self,
        root: &ReducedPrecision,
        root_block: &Block,
        reduced: &ReducedPrecision,
    ) -> ReducedPrecision {
        if root.root == reduced.root {
            return root.clone();
        }
        let merged = self
            .resolve(root.root)
            .join(self.resolve(reduced.root));
        let id = self.intern(merged);
        self.reduce_precision(id, root_block)
    }

    pub fn state_key(&self, state: &BlockState, precision: PrecisionId) -> StateKey {
        StateKey {
            abstraction: state.abstraction.clone(),
            precision,
        }
    }
}

fn is_scoped_local(var: &Variable) -> bool {
    !var.is_global() && !var.is_return()
}
