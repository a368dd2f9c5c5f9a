// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

mod algorithm;
mod oracle;
mod refiner;
mod tree;

pub use algorithm::{Cegar, CegarOptions, UnknownReason, VerificationOutcome, VerificationReport};
pub use oracle::{
    Counterexample, CounterexampleModel, FeasibilityChecker, Interpolant, PathInterpolator,
};
pub use refiner::{
    InterpolationRefiner, InterpolationStrategy, PrecisionAdjuster, RefinementResult, Refiner,
    RefinerOptions, RefinerStats, RestartStrategy, TreeExportMode, UnguidedRefiner,
};
pub use tree::InterpolationTree;
