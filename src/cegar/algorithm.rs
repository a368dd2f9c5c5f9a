// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::arg::{AbstractState, ArgPath, NodeRef};
use crate::cegar::oracle::Counterexample;
use crate::cegar::refiner::{RefinementResult, Refiner};
use crate::error::CegarError;
use crate::explore::{explore, Analysis, ExplorationStatus};
use crate::precision::CompositePrecision;
use crate::reached::ReachedSet;
use crate::shutdown::ShutdownNotifier;

#[derive(Debug, Clone, Copy, Default)]
pub struct CegarOptions {
    /// Give up with an inconclusive result after this many refinements.
    pub max_refinements: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownReason {
    RepeatedCounterexample,
    InterpolationFailed,
    FeasibilityFailed,
    RefinementExhausted,
    RefinementLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// No target state is reachable.
    Safe,
    Unsafe(Counterexample),
    /// The error path that could not be handled is kept for diagnostics.
    Unknown {
        reason: UnknownReason,
        path: Option<ArgPath>,
    },
}

#[derive(Debug)]
pub struct VerificationReport<S> {
    pub outcome: VerificationOutcome,
    pub reached: ReachedSet<S>,
    pub refinements: usize,
}

/// Alternates between exploration and refinement until the property is proven or violated.
pub struct Cegar<A, R> {
    analysis: A,
    refiner: R,
    options: CegarOptions,
}

impl<A, R> Cegar<A, R>
where
    A: Analysis,
    R: Refiner<A::State>,
{
    pub fn new(analysis: A, refiner: R, options: CegarOptions) -> Self {
        Self {
            analysis,
            refiner,
            options,
        }
    }

    pub fn analysis(&self) -> &A {
        &self.analysis
    }

    pub fn refiner(&self) -> &R {
        &self.refiner
    }

    pub fn run(
        &mut self,
        root_state: A::State,
        precision: CompositePrecision,
        shutdown: &ShutdownNotifier,
    ) -> Result<VerificationReport<A::State>, CegarError> {
        let reached = ReachedSet::new(root_state, precision)?;
        self.run_on(reached, shutdown)
    }

    /// Continues on a reached set that may already contain explored nodes. Cancellation and
    /// internal errors are returned as `Err`, everything else ends up in the report.
    pub fn run_on(
        &mut self,
        mut reached: ReachedSet<A::State>,
        shutdown: &ShutdownNotifier,
    ) -> Result<VerificationReport<A::State>, CegarError> {
        let mut refinements = 0;
        let outcome = loop {
            let target = match explore(&mut self.analysis, &mut reached, shutdown)? {
                ExplorationStatus::TargetReached(target) => Some(target),
                ExplorationStatus::Complete => reached.target_states().first().copied(),
            };
            let Some(target) = target else {
                tracing::info!("no target reachable after {refinements} refinements");
                break VerificationOutcome::Safe;
            };

            if let Some(limit) = self.options.max_refinements {
                if refinements >= limit {
                    tracing::info!("giving up after {refinements} refinements");
                    break unknown(&reached, UnknownReason::RefinementLimit, Some(target));
                }
            }

            match self.refiner.perform_refinement(&mut reached, shutdown) {
                Ok(RefinementResult::Feasible(cex)) => break VerificationOutcome::Unsafe(cex),
                Ok(RefinementResult::Refined { roots }) => {
                    refinements += 1;
                    tracing::debug!("refinement {refinements} restarts at {roots:?}");
                }
                Ok(RefinementResult::Exhausted) => {
                    break unknown(&reached, UnknownReason::RefinementExhausted, Some(target));
                }
                Err(e) if e.is_refinement_fatal() => {
                    tracing::warn!("refinement failed: {e}");
                    let path = e.path().cloned();
                    let reason = match &e {
                        CegarError::RepeatedCounterexample { .. } => {
                            UnknownReason::RepeatedCounterexample
                        }
                        CegarError::InterpolationFailed { .. } => UnknownReason::InterpolationFailed,
                        _ => UnknownReason::FeasibilityFailed,
                    };
                    break VerificationOutcome::Unknown { reason, path };
                }
                Err(e) => return Err(e),
            }
        };
        Ok(VerificationReport {
            outcome,
            reached,
            refinements,
        })
    }
}

fn unknown<S: AbstractState>(
    reached: &ReachedSet<S>,
    reason: UnknownReason,
    target: Option<NodeRef>,
) -> VerificationOutcome {
    let path = target.and_then(|t| reached.arg().one_path_to(t).ok());
    VerificationOutcome::Unknown { reason, path }
}
