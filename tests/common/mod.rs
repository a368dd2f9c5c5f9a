// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

#![allow(dead_code)]

use argus::arg::{AbstractState, Arg, ArgPath, Edge, Location, NodeRef};
use argus::cegar::{CounterexampleModel, FeasibilityChecker, Interpolant, PathInterpolator};
use argus::error::OracleError;
use argus::explore::{Analysis, MergeDecision};
use argus::precision::{
    CompositePrecision, PrecisionComponent, PrecisionScope, PredicatePrecision, Variable,
    VariablePrecision,
};
use argus::reached::ReachedSet;
use argus::shutdown::ShutdownNotifier;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::{Display, Formatter};

/// A tiny control-flow graph. An edge with a guard is infeasible in every concrete execution,
/// the abstraction only notices that once it tracks the guard variable.
#[derive(Debug, Clone, Default)]
pub struct ToyCfa {
    edges: Vec<(Location, Location, Option<Variable>)>,
    targets: BTreeSet<Location>,
}

impl ToyCfa {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edge(mut self, from: u32, to: u32) -> Self {
        self.edges.push((Location(from), Location(to), None));
        self
    }

    pub fn guarded(mut self, from: u32, to: u32, var: &str) -> Self {
        self.edges
            .push((Location(from), Location(to), Some(Variable::new(var))));
        self
    }

    pub fn target(mut self, loc: u32) -> Self {
        self.targets.insert(Location(loc));
        self
    }

    pub fn guard(&self, edge: Edge) -> Option<&Variable> {
        self.edges
            .iter()
            .find(|(from, to, _)| *from == edge.from && *to == edge.to)
            .and_then(|(_, _, g)| g.as_ref())
    }

    pub fn initial(&self) -> ToyState {
        ToyState::at(0, self.targets.contains(&Location(0)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ToyState {
    pub location: Location,
    pub target: bool,
}

impl ToyState {
    pub fn at(loc: u32, target: bool) -> Self {
        Self {
            location: Location(loc),
            target,
        }
    }
}

impl AbstractState for ToyState {
    fn location(&self) -> Location {
        self.location
    }

    fn is_target(&self) -> bool {
        self.target
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    #[default]
    Separate,
    Absorb,
    Join,
}

#[derive(Debug, Clone, Default)]
pub struct ToyAnalysis {
    pub cfa: ToyCfa,
    pub coverage: bool,
    pub merge: MergeMode,
    pub fail_at: Option<Location>,
    pub expanded: Vec<Location>,
}

impl ToyAnalysis {
    pub fn new(cfa: ToyCfa) -> Self {
        Self {
            cfa,
            ..Default::default()
        }
    }

    pub fn with_coverage(mut self) -> Self {
        self.coverage = true;
        self
    }

    pub fn with_merge(mut self, merge: MergeMode) -> Self {
        self.merge = merge;
        self
    }
}

impl Analysis for ToyAnalysis {
    type State = ToyState;

    fn successors(
        &mut self,
        state: &ToyState,
        precision: &CompositePrecision,
    ) -> Result<Vec<ToyState>, OracleError> {
        if self.fail_at == Some(state.location) {
            return Err(OracleError::new("successors", "transfer relation failed"));
        }
        self.expanded.push(state.location);
        let tracked = precision.variable();
        let out = self
            .cfa
            .edges
            .iter()
            .filter(|(from, _, _)| *from == state.location)
            .filter(|(_, to, guard)| match (guard, tracked) {
                (Some(var), Some(prec)) => !prec.is_tracking(*to, var),
                _ => true,
            })
            .map(|(_, to, _)| ToyState {
                location: *to,
                target: self.cfa.targets.contains(to),
            })
            .collect();
        Ok(out)
    }

    fn merge(
        &mut self,
        new: &ToyState,
        existing: &ToyState,
        _precision: &CompositePrecision,
    ) -> MergeDecision<ToyState> {
        if new.location != existing.location {
            return MergeDecision::Separate;
        }
        match self.merge {
            MergeMode::Separate => MergeDecision::Separate,
            MergeMode::Absorb => MergeDecision::Absorbed,
            MergeMode::Join => MergeDecision::Joined(new.clone()),
        }
    }

    fn is_covered_by(&mut self, state: &ToyState, other: &ToyState) -> bool {
        self.coverage && state == other
    }
}

/// Interpolants over a set of variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Itp {
    True,
    Facts(BTreeSet<Variable>),
    False(BTreeSet<Variable>),
}

impl Itp {
    pub fn facts(vars: &[&str]) -> Self {
        Itp::Facts(vars.iter().map(|v| Variable::new(*v)).collect())
    }

    pub fn fals(vars: &[&str]) -> Self {
        Itp::False(vars.iter().map(|v| Variable::new(*v)).collect())
    }
}

impl Interpolant for Itp {
    fn initial() -> Self {
        Itp::True
    }

    fn is_trivial(&self) -> bool {
        matches!(self, Itp::True)
    }

    fn is_false(&self) -> bool {
        matches!(self, Itp::False(_))
    }

    fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (Itp::True, _) | (_, Itp::True) => Itp::True,
            (Itp::False(a), Itp::False(b)) => Itp::False(a.union(b).cloned().collect()),
            (a, b) => Itp::Facts(
                a.variables()
                    .into_iter()
                    .chain(b.variables())
                    .collect(),
            ),
        }
    }

    fn variables(&self) -> Vec<Variable> {
        match self {
            Itp::True => vec![],
            Itp::Facts(vars) | Itp::False(vars) => vars.iter().cloned().collect(),
        }
    }
}

impl Display for Itp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let (name, vars) = match self {
            Itp::True => return write!(f, "true"),
            Itp::Facts(vars) => ("facts", vars),
            Itp::False(vars) => ("false", vars),
        };
        write!(f, "{name}")?;
        if !vars.is_empty() {
            let names: Vec<&str> = vars.iter().map(|v| v.name()).collect();
            write!(f, "({})", names.join(", "))?;
        }
        Ok(())
    }
}

/// A path is feasible iff it does not take a guarded edge.
#[derive(Debug, Clone, Default)]
pub struct GuardChecker {
    pub cfa: ToyCfa,
    /// Pretend that every interpolant used as a start state is too weak.
    pub weak_starts: bool,
    pub with_model: bool,
    pub fail: bool,
    /// Requested to shut down from inside the next feasibility check.
    pub cancel_on_check: Option<ShutdownNotifier>,
    pub checks: usize,
}

impl GuardChecker {
    pub fn new(cfa: ToyCfa) -> Self {
        Self {
            cfa,
            ..Default::default()
        }
    }
}

impl FeasibilityChecker<ToyState, Itp> for GuardChecker {
    fn is_feasible(&mut self, _arg: &Arg<ToyState>, path: &ArgPath) -> Result<bool, OracleError> {
        if self.fail {
            return Err(OracleError::new("feasibility", "solver timeout"));
        }
        if let Some(shutdown) = self.cancel_on_check.take() {
            shutdown.request_shutdown("timeout");
        }
        self.checks += 1;
        Ok(!path.edges().any(|e| self.cfa.guard(e).is_some()))
    }

    fn is_feasible_from(
        &mut self,
        arg: &Arg<ToyState>,
        path: &ArgPath,
        start: &Itp,
    ) -> Result<bool, OracleError> {
        if self.weak_starts {
            return Ok(true);
        }
        if start.is_false() {
            return Ok(false);
        }
        self.is_feasible(arg, path)
    }

    fn model(
        &mut self,
        _arg: &Arg<ToyState>,
        path: &ArgPath,
    ) -> Result<Option<CounterexampleModel>, OracleError> {
        if !self.with_model {
            return Ok(None);
        }
        let steps = path
            .nodes()
            .enumerate()
            .map(|(ii, n)| (n, BTreeMap::from([(Variable::new("step"), ii as i64)])))
            .collect();
        Ok(Some(CounterexampleModel { steps }))
    }
}

/// `true` up to the first guarded edge, `false` (mentioning the guards) afterwards.
#[derive(Debug, Clone, Default)]
pub struct GuardInterpolator {
    pub cfa: ToyCfa,
    /// Return `false` interpolants without variables, which never refines anything.
    pub forget_variables: bool,
    pub fail: bool,
    pub calls: Vec<ArgPath>,
}

impl GuardInterpolator {
    pub fn new(cfa: ToyCfa) -> Self {
        Self {
            cfa,
            ..Default::default()
        }
    }
}

impl PathInterpolator<ToyState, Itp> for GuardInterpolator {
    fn interpolate(
        &mut self,
        _arg: &Arg<ToyState>,
        path: &ArgPath,
        start: &Itp,
    ) -> Result<Vec<Itp>, OracleError> {
        self.calls.push(path.clone());
        if self.fail {
            return Err(OracleError::new("interpolation", "solver crashed"));
        }
        let mut blocked: Option<BTreeSet<Variable>> = match start {
            Itp::False(vars) => Some(vars.clone()),
            _ => None,
        };
        let mut out = vec![];
        for step in path.steps().iter().skip(1) {
            if let Some(guard) = step.incoming.and_then(|e| self.cfa.guard(e)) {
                blocked.get_or_insert_with(BTreeSet::new).insert(guard.clone());
            }
            out.push(match &blocked {
                None => Itp::True,
                Some(_) if self.forget_variables => Itp::False(BTreeSet::new()),
                Some(vars) => Itp::False(vars.clone()),
            });
        }
        Ok(out)
    }
}

/// Hands out prepared answers in order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedInterpolator {
    pub responses: VecDeque<Vec<Itp>>,
    pub calls: Vec<ArgPath>,
}

impl ScriptedInterpolator {
    pub fn new(responses: impl IntoIterator<Item = Vec<Itp>>) -> Self {
        Self {
            responses: responses.into_iter().collect(),
            calls: vec![],
        }
    }
}

impl PathInterpolator<ToyState, Itp> for ScriptedInterpolator {
    fn interpolate(
        &mut self,
        _arg: &Arg<ToyState>,
        path: &ArgPath,
        _start: &Itp,
    ) -> Result<Vec<Itp>, OracleError> {
        self.calls.push(path.clone());
        self.responses
            .pop_front()
            .ok_or_else(|| OracleError::new("interpolation", "no scripted answer left"))
    }
}

pub fn variable_precision(scope: PrecisionScope) -> CompositePrecision {
    CompositePrecision::new([PrecisionComponent::Variable(VariablePrecision::empty(
        scope,
    ))])
}

pub fn value_and_predicate_precision() -> CompositePrecision {
    CompositePrecision::new([
        PrecisionComponent::Variable(VariablePrecision::empty(PrecisionScope::Location)),
        PrecisionComponent::Predicate(PredicatePrecision::empty()),
    ])
}

/// The first node registered at `loc`.
pub fn node_at(reached: &ReachedSet<ToyState>, loc: u32) -> NodeRef {
    reached
        .nodes_at(Location(loc))
        .next()
        .unwrap_or_else(|| panic!("no node at N{loc}"))
}

pub fn locations(reached: &ReachedSet<ToyState>) -> Vec<u32> {
    let mut locs: Vec<u32> = reached.iter().map(|(_, s, _)| s.location.0).collect();
    locs.sort();
    locs
}

/// Routes `tracing` output through the test harness. Filtered with `RUST_LOG`.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
