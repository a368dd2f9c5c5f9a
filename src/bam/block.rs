// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::arg::Location;
use crate::precision::{Predicate, Variable};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct BlockId(pub u32);

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// A program region, usually a function body, whose summaries are reused across call sites.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Block {
    pub id: BlockId,
    pub function: String,
    pub call_location: Location,
    pub return_locations: BTreeSet<Location>,
    pub locations: BTreeSet<Location>,
    /// Variables read or written inside the block.
    pub variables: BTreeSet<Variable>,
}

impl Block {
    pub fn new(id: BlockId, function: impl Into<String>, call_location: Location) -> Self {
        Self {
            id,
            function: function.into(),
            call_location,
            return_locations: BTreeSet::new(),
            locations: BTreeSet::from([call_location]),
            variables: BTreeSet::new(),
        }
    }

    pub fn with_locations(mut self, locations: impl IntoIterator<Item = Location>) -> Self {
        self.locations.extend(locations);
        self
    }

    pub fn with_return_location(mut self, location: Location) -> Self {
        self.return_locations.insert(location);
        self.locations.insert(location);
        self
    }

    pub fn with_variables(mut self, variables: impl IntoIterator<Item = Variable>) -> Self {
        self.variables.extend(variables);
        self
    }

    pub fn contains(&self, location: Location) -> bool {
        self.locations.contains(&location)
    }

    pub fn uses(&self, var: &Variable) -> bool {
        self.variables.contains(var)
    }
}

/// Decides which predicates matter inside a block.
pub trait RelevanceOracle {
    fn is_relevant(&self, block: &Block, predicate: &Predicate) -> bool;

    /// Splits `predicates` into the relevant and the irrelevant ones.
    fn partition<'a>(
        &self,
        block: &Block,
        predicates: impl IntoIterator<Item = &'a Predicate>,
    ) -> (BTreeSet<Predicate>, BTreeSet<Predicate>) {
        let mut relevant = BTreeSet::new();
        let mut irrelevant = BTreeSet::new();
        for p in predicates {
            if self.is_relevant(block, p) {
                relevant.insert(p.clone());
            } else {
                irrelevant.insert(p.clone());
            }
        }
        (relevant, irrelevant)
    }

    fn relevant<'a>(
        &self,
        block: &Block,
        predicates: impl IntoIterator<Item = &'a Predicate>,
    ) -> BTreeSet<Predicate> {
        self.partition(block, predicates).0
    }

    fn irrelevant<'a>(
        &self,
        block: &Block,
        predicates: impl IntoIterator<Item = &'a Predicate>,
    ) -> BTreeSet<Predicate> {
        self.partition(block, predicates).1
    }
}

/// A predicate is relevant iff it mentions a variable that the block uses.
#[derive(Debug, Clone, Copy, Default)]
pub struct VariableRelevance;

impl RelevanceOracle for VariableRelevance {
    fn is_relevant(&self, block: &Block, predicate: &Predicate) -> bool {
        predicate.variables().iter().any(|v| block.uses(v))
    }
}
