// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Work-list exploration that grows the reachability graph until a target is found or nothing
//! is left to explore.

use crate::arg::{AbstractState, NodeRef};
use crate::error::{ArgError, CegarError, OracleError};
use crate::precision::CompositePrecision;
use crate::reached::ReachedSet;
use crate::shutdown::ShutdownNotifier;

/// Result of asking the analysis to merge a new successor into an existing node.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeDecision<S> {
    /// Keep both states.
    Separate,
    /// The existing state already stands for the new one. The frontier becomes an additional
    /// parent of the existing node.
    Absorbed,
    /// The existing node is replaced by a node carrying the joined state.
    Joined(S),
}

/// Transfer, merge and stop operators of an abstract domain.
pub trait Analysis {
    type State: AbstractState + Clone;

    fn successors(
        &mut self,
        state: &Self::State,
        precision: &CompositePrecision,
    ) -> Result<Vec<Self::State>, OracleError>;

    fn merge(
        &mut self,
        _new: &Self::State,
        _existing: &Self::State,
        _precision: &CompositePrecision,
    ) -> MergeDecision<Self::State> {
        MergeDecision::Separate
    }

    /// Whether `other` subsumes `state`.
    fn is_covered_by(&mut self, state: &Self::State, other: &Self::State) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplorationStatus {
    /// The waitlist ran empty.
    Complete,
    TargetReached(NodeRef),
}

pub fn explore_from<A: Analysis>(
    analysis: &mut A,
    root_state: A::State,
    precision: CompositePrecision,
    shutdown: &ShutdownNotifier,
) -> Result<(ReachedSet<A::State>, ExplorationStatus), CegarError> {
    let mut reached = ReachedSet::new(root_state, precision)?;
    let status = explore(analysis, &mut reached, shutdown)?;
    Ok((reached, status))
}

/// Resumes exploration on an existing reached set. A target node is reported when it is
/// popped from the waitlist or as soon as it is registered; its successors are never computed.
pub fn explore<A: Analysis>(
    analysis: &mut A,
    reached: &mut ReachedSet<A::State>,
    shutdown: &ShutdownNotifier,
) -> Result<ExplorationStatus, CegarError> {
    loop {
        shutdown.check()?;
        let Some(frontier) = reached.pop_from_waitlist() else {
            tracing::debug!("exploration complete with {} nodes", reached.len());
            return Ok(ExplorationStatus::Complete);
        };
        let state = reached
            .arg()
            .state(frontier)
            .ok_or(ArgError::UnknownNode(frontier))?
            .clone();
        if state.is_target() {
            tracing::debug!("target {frontier} at {}", state.location());
            return Ok(ExplorationStatus::TargetReached(frontier));
        }
        let precision = reached
            .precision(frontier)
            .ok_or(ArgError::UnknownNode(frontier))?
            .clone();
        let successors = match analysis.successors(&state, &precision) {
            Ok(s) => s,
            Err(e) => {
                reached.re_add_to_waitlist(frontier)?;
                return Err(CegarError::SuccessorsFailed(e));
            }
        };
        tracing::trace!("{frontier} has {} successors", successors.len());

        let mut first_target = None;
        for successor in successors {
            if !reached.contains(frontier) {
                tracing::trace!("{frontier} was replaced by a join");
                break;
            }
            let node = add_successor(analysis, reached, frontier, successor, &precision)?;
            if first_target.is_none()
                && !reached.arg().is_covered(node)
                && reached.arg().state(node).map(|s| s.is_target()) == Some(true)
            {
                first_target = Some(node);
            }
        }
        if let Some(target) = first_target {
            tracing::debug!("reached target {target}");
            return Ok(ExplorationStatus::TargetReached(target));
        }
    }
}

/// Merges the successor into an existing node or adds it as a new node, possibly covered.
/// Returns the node that now carries the successor state.
fn add_successor<A: Analysis>(
    analysis: &mut A,
    reached: &mut ReachedSet<A::State>,
    frontier: NodeRef,
    successor: A::State,
    precision: &CompositePrecision,
) -> Result<NodeRef, CegarError> {
    let location = successor.location();
    let candidates: Vec<NodeRef> = reached
        .nodes_at(location)
        .filter(|n| !reached.arg().is_root(*n) && !reached.arg().is_covered(*n))
        .collect();

    for candidate in candidates.iter().copied() {
        if !reached.contains(candidate) {
            continue;
        }
        let Some(existing) = reached.arg().state(candidate) else {
            continue;
        };
        match analysis.merge(&successor, existing, precision) {
            MergeDecision::Separate => {}
            MergeDecision::Absorbed => match reached.arg_mut().add_parent(candidate, frontier) {
                Ok(_) => return Ok(candidate),
                // the frontier descends from the candidate, fall back to coverage
                Err(ArgError::Cycle { .. }) => break,
                Err(e) => return Err(e.into()),
            },
            MergeDecision::Joined(joined) => {
                tracing::trace!("joining new successor of {frontier} into {candidate}");
                let node =
                    reached.replace_with_join(candidate, frontier, joined, precision.clone())?;
                return Ok(node);
            }
        }
    }

    let node = reached.arg_mut().add_child(frontier, successor)?;
    let coverer = {
        let state = reached.arg().state(node).ok_or(ArgError::UnknownNode(node))?;
        let mut coverer = None;
        for candidate in candidates.iter().copied() {
            if !reached.contains(candidate) || reached.arg().is_covered(candidate) {
                continue;
            }
            let Some(other) = reached.arg().state(candidate) else {
                continue;
            };
            if analysis.is_covered_by(state, other) {
                coverer = Some(candidate);
                break;
            }
        }
        coverer
    };
    if let Some(by) = coverer {
        tracing::trace!("{node} is covered by {by}");
        reached.arg_mut().set_covered(node, by)?;
    }
    reached.add(node, precision.clone())?;
    Ok(node)
}
