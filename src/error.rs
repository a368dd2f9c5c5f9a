// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::arg::{ArgPath, NodeRef};

/// Violations of the graph invariants. These indicate a bug in the caller or in the core and
/// are never turned into a verification verdict.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgError {
    #[error("{0} is not part of the graph")]
    UnknownNode(NodeRef),
    #[error("the graph already has a root ({0})")]
    DuplicateRoot(NodeRef),
    #[error("refusing to detach the graph root {0}")]
    RootDetach(NodeRef),
    #[error("{0} has no parents but is not the root")]
    Orphan(NodeRef),
    #[error("adding {parent} as parent of {node} would introduce a cycle")]
    Cycle { node: NodeRef, parent: NodeRef },
    #[error("{node} cannot be covered by {by}")]
    InvalidCoverage { node: NodeRef, by: NodeRef },
    #[error("{node} is covered by {by}, which is no longer in the graph")]
    DanglingCoverage { node: NodeRef, by: NodeRef },
    #[error("malformed graph: {0}")]
    Malformed(String),
}

/// Failure reported by one of the external oracles (successor computation, feasibility check,
/// interpolation).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{oracle} failed: {message}")]
pub struct OracleError {
    pub oracle: &'static str,
    pub message: String,
}

impl OracleError {
    pub fn new(oracle: &'static str, message: impl Into<String>) -> Self {
        Self {
            oracle,
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CegarError {
    /// The same error paths showed up again without the precision growing, or every target
    /// was already confirmed feasible.
    #[error("repeated counterexample: {path}")]
    RepeatedCounterexample { path: ArgPath },
    #[error("interpolation failed on {path}: {source}")]
    InterpolationFailed { path: ArgPath, source: OracleError },
    #[error("feasibility check failed: {0}")]
    FeasibilityFailed(#[source] OracleError),
    #[error("successor computation failed: {0}")]
    SuccessorsFailed(#[source] OracleError),
    #[error("refinement requested, but the reached set contains no target state")]
    NoTargets,
    #[error("the reached set carries no {0} precision to refine")]
    MissingPrecision(&'static str),
    #[error("analysis cancelled: {0}")]
    Cancelled(String),
    #[error("internal error: {0}")]
    Internal(#[from] ArgError),
    #[error("failed to export interpolation tree: {0}")]
    Export(#[from] std::io::Error),
}

impl CegarError {
    /// Conditions that end the run with an inconclusive verdict instead of an internal error.
    pub fn is_refinement_fatal(&self) -> bool {
        matches!(
            self,
            CegarError::RepeatedCounterexample { .. }
                | CegarError::InterpolationFailed { .. }
                | CegarError::FeasibilityFailed(_)
        )
    }

    /// Conditions caused by a bug in the core or in how it is driven.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            CegarError::Internal(_) | CegarError::NoTargets | CegarError::MissingPrecision(_)
        )
    }

    /// The path that triggered the error, kept for diagnostics.
    pub fn path(&self) -> Option<&ArgPath> {
        match self {
            CegarError::RepeatedCounterexample { path } => Some(path),
            CegarError::InterpolationFailed { path, .. } => Some(path),
            _ => None,
        }
    }
}
