// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::arg::{Arg, ArgPath, NodeRef};
use crate::error::OracleError;
use crate::precision::Variable;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// An abstraction of the states reachable after a path prefix, computed by an external solver.
pub trait Interpolant: Clone + Debug {
    /// The interpolant that holds before the first step of every path (`true`).
    fn initial() -> Self;
    /// Whether this is the initial interpolant, i.e., it carries no information.
    fn is_trivial(&self) -> bool;
    /// Whether this interpolant is `false`, i.e., no error path continues from here.
    fn is_false(&self) -> bool;
    /// An interpolant that holds whenever either of the two holds.
    fn join(&self, other: &Self) -> Self;
    /// The variables the interpolant talks about.
    fn variables(&self) -> Vec<Variable>;
}

/// Decides whether an error path corresponds to a concrete execution.
pub trait FeasibilityChecker<S, I: Interpolant> {
    fn is_feasible(&mut self, arg: &Arg<S>, path: &ArgPath) -> Result<bool, OracleError>;

    /// Like [`FeasibilityChecker::is_feasible`], but starts the path from the states described
    /// by `start` instead of the initial states.
    fn is_feasible_from(
        &mut self,
        arg: &Arg<S>,
        path: &ArgPath,
        start: &I,
    ) -> Result<bool, OracleError>;

    /// Concrete variable assignments along a feasible path.
    fn model(
        &mut self,
        _arg: &Arg<S>,
        _path: &ArgPath,
    ) -> Result<Option<CounterexampleModel>, OracleError> {
        Ok(None)
    }
}

/// Computes a sequence of interpolants for an infeasible path.
pub trait PathInterpolator<S, I: Interpolant> {
    /// Returns one interpolant for every step after the first, so exactly `path.len() - 1`
    /// interpolants. `start` holds at the first step.
    fn interpolate(
        &mut self,
        arg: &Arg<S>,
        path: &ArgPath,
        start: &I,
    ) -> Result<Vec<I>, OracleError>;
}

/// Assignments to variables along a counterexample, one entry per path step that has any.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CounterexampleModel {
    pub steps: Vec<(NodeRef, BTreeMap<Variable, i64>)>,
}

impl CounterexampleModel {
    pub fn at(&self, node: NodeRef) -> Option<&BTreeMap<Variable, i64>> {
        self.steps.iter().find(|(n, _)| *n == node).map(|(_, a)| a)
    }
}

/// A feasible error path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counterexample {
    pub path: ArgPath,
    pub model: Option<CounterexampleModel>,
}

impl Counterexample {
    pub fn target(&self) -> Option<NodeRef> {
        self.path.last()
    }
}
