// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

//! Precisions decide how much detail an analysis tracks at each location. All joins are set
//! unions, so they are associative, commutative and idempotent.

use crate::arg::Location;
use smallvec::SmallVec;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

pub const SCOPE_SEPARATOR: &str = "::";
pub const PARAM_SUFFIX: &str = "__param";
pub const RETURN_SUFFIX: &str = "__retval";

/// A program variable. Locals are qualified as `function::name`, globals are bare.
#[derive(Debug, PartialEq, Eq, Clone, Hash, PartialOrd, Ord)]
pub struct Variable(String);

impl Variable {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// The function a local variable belongs to.
    pub fn function(&self) -> Option<&str> {
        self.0.split_once(SCOPE_SEPARATOR).map(|(f, _)| f)
    }

    pub fn is_global(&self) -> bool {
        !self.0.contains(SCOPE_SEPARATOR)
    }

    pub fn is_param(&self) -> bool {
        self.0.ends_with(PARAM_SUFFIX)
    }

    pub fn is_return(&self) -> bool {
        self.0.ends_with(RETURN_SUFFIX)
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Variable {
    fn from(value: &str) -> Self {
        Variable::new(value)
    }
}

/// An atomic fact tracked by predicate abstraction. The formula itself lives with the
/// external solver, we only keep its name and the variables it mentions.
#[derive(Debug, PartialEq, Eq, Clone, Hash, PartialOrd, Ord)]
pub struct Predicate {
    name: String,
    variables: BTreeSet<Variable>,
}

impl Predicate {
    pub fn new(name: impl Into<String>, variables: impl IntoIterator<Item = Variable>) -> Self {
        Self {
            name: name.into(),
            variables: variables.into_iter().collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variables(&self) -> &BTreeSet<Variable> {
        &self.variables
    }

    pub fn mentions(&self, var: &Variable) -> bool {
        self.variables.contains(var)
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Variables that a refinement found necessary to track, per location.
#[derive(Debug, PartialEq, Eq, Clone, Hash, Default)]
pub struct PrecisionIncrement {
    entries: BTreeMap<Location, BTreeSet<Variable>>,
}

impl PrecisionIncrement {
    pub fn add(&mut self, location: Location, var: Variable) {
        self.entries.entry(location).or_default().insert(var);
    }

    pub fn extend(&mut self, other: &PrecisionIncrement) {
        for (loc, vars) in other.entries.iter() {
            self.entries
                .entry(*loc)
                .or_default()
                .extend(vars.iter().cloned());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Location, &Variable)> + '_ {
        self.entries
            .iter()
            .flat_map(|(loc, vars)| vars.iter().map(move |v| (*loc, v)))
    }

    /// All variables of the increment, independent of location.
    pub fn variables(&self) -> BTreeSet<&Variable> {
        self.entries.values().flatten().collect()
    }

    /// Hash of the sorted variable set. Two refinements that ask for the same variables at
    /// different locations share the fingerprint.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.variables().hash(&mut hasher);
        hasher.finish()
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Default)]
pub enum PrecisionScope {
    /// A variable that is tracked somewhere is tracked everywhere.
    #[default]
    Global,
    /// Variables are tracked only at the locations where they were found necessary.
    Location,
}

/// Precision of an explicit-value analysis: the set of variables it tracks.
#[derive(Debug, PartialEq, Eq, Clone, Hash, Default)]
pub struct VariablePrecision {
    scope: PrecisionScope,
    global: BTreeSet<Variable>,
    local: BTreeMap<Location, BTreeSet<Variable>>,
}

impl VariablePrecision {
    pub fn empty(scope: PrecisionScope) -> Self {
        Self {
            scope,
            ..Default::default()
        }
    }

    pub fn scope(&self) -> PrecisionScope {
        self.scope
    }

    pub fn is_tracking(&self, location: Location, var: &Variable) -> bool {
        self.global.contains(var)
            || self
                .local
                .get(&location)
                .map(|vars| vars.contains(var))
                .unwrap_or(false)
    }

    pub fn tracked_at(&self, location: Location) -> BTreeSet<&Variable> {
        let mut out: BTreeSet<&Variable> = self.global.iter().collect();
        if let Some(vars) = self.local.get(&location) {
            out.extend(vars.iter());
        }
        out
    }

    /// Number of (location, variable) entries plus globally tracked variables.
    pub fn size(&self) -> usize {
        self.global.len() + self.local.values().map(|v| v.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn join(&self, other: &Self) -> Self {
        debug_assert_eq!(self.scope, other.scope, "joining precisions of different scope");
        let mut out = self.clone();
        out.global.extend(other.global.iter().cloned());
        for (loc, vars) in other.local.iter() {
            out.local
                .entry(*loc)
                .or_default()
                .extend(vars.iter().cloned());
        }
        out
    }

    pub fn with_increment(&self, increment: &PrecisionIncrement) -> Self {
        let mut out = self.clone();
        for (loc, var) in increment.iter() {
            match self.scope {
                PrecisionScope::Global => {
                    out.global.insert(var.clone());
                }
                PrecisionScope::Location => {
                    out.local.entry(loc).or_default().insert(var.clone());
                }
            }
        }
        out
    }

    /// `true` iff everything tracked by `other` is also tracked by `self`.
    pub fn subsumes(&self, other: &Self) -> bool {
        other.global.is_subset(&self.global)
            && other.local.iter().all(|(loc, vars)| {
                vars.iter().all(|v| self.is_tracking(*loc, v))
            })
    }
}

/// Precision of a predicate analysis.
#[derive(Debug, PartialEq, Eq, Clone, Hash, Default)]
pub struct PredicatePrecision {
    global: BTreeSet<Predicate>,
    local: BTreeMap<Location, BTreeSet<Predicate>>,
    function: BTreeMap<String, BTreeSet<Predicate>>,
}

impl PredicatePrecision {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_global(mut self, predicates: impl IntoIterator<Item = Predicate>) -> Self {
        self.global.extend(predicates);
        self
    }

    pub fn with_local(
        mut self,
        location: Location,
        predicates: impl IntoIterator<Item = Predicate>,
    ) -> Self {
        self.local.entry(location).or_default().extend(predicates);
        self
    }

    pub fn with_function(
        mut self,
        function: impl Into<String>,
        predicates: impl IntoIterator<Item = Predicate>,
    ) -> Self {
        self.function
            .entry(function.into())
            .or_default()
            .extend(predicates);
        self
    }

    pub fn global(&self) -> &BTreeSet<Predicate> {
        &self.global
    }

    pub fn local(&self) -> &BTreeMap<Location, BTreeSet<Predicate>> {
        &self.local
    }

    pub fn function_predicates(&self, function: &str) -> Option<&BTreeSet<Predicate>> {
        self.function.get(function)
    }

    /// Predicates to use at `location` inside `function`: the local ones if there are any,
    /// the global ones otherwise, plus the function-wide ones.
    pub fn predicates_at(&self, location: Location, function: &str) -> BTreeSet<&Predicate> {
        let mut out: BTreeSet<&Predicate> = match self.local.get(&location) {
            Some(local) if !local.is_empty() => local.iter().collect(),
            _ => self.global.iter().collect(),
        };
        if let Some(preds) = self.function.get(function) {
            out.extend(preds.iter());
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.local.is_empty() && self.function.is_empty()
    }

    pub fn join(&self, other: &Self) -> Self {
        let mut out = self.clone();
        out.global.extend(other.global.iter().cloned());
        for (loc, preds) in other.local.iter() {
            out.local
                .entry(*loc)
                .or_default()
                .extend(preds.iter().cloned());
        }
        for (f, preds) in other.function.iter() {
            out.function
                .entry(f.clone())
                .or_default()
                .extend(preds.iter().cloned());
        }
        out
    }
}

/// Selects precision components by the analysis they belong to.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum PrecisionKind {
    Variable,
    Predicate,
}

#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum PrecisionComponent {
    Variable(VariablePrecision),
    Predicate(PredicatePrecision),
}

impl PrecisionComponent {
    pub fn kind(&self) -> PrecisionKind {
        match self {
            PrecisionComponent::Variable(_) => PrecisionKind::Variable,
            PrecisionComponent::Predicate(_) => PrecisionKind::Predicate,
        }
    }

    /// Components of different kinds have no join.
    pub fn join(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (PrecisionComponent::Variable(a), PrecisionComponent::Variable(b)) => {
                Some(PrecisionComponent::Variable(a.join(b)))
            }
            (PrecisionComponent::Predicate(a), PrecisionComponent::Predicate(b)) => {
                Some(PrecisionComponent::Predicate(a.join(b)))
            }
            _ => None,
        }
    }
}

/// One precision component per cooperating analysis.
#[derive(Debug, PartialEq, Eq, Clone, Hash, Default)]
pub struct CompositePrecision {
    components: SmallVec<[PrecisionComponent; 2]>,
}

impl CompositePrecision {
    pub fn new(components: impl IntoIterator<Item = PrecisionComponent>) -> Self {
        let mut out = Self::default();
        for c in components {
            assert!(
                out.component(c.kind()).is_none(),
                "duplicate {:?} precision",
                c.kind()
            );
            out.components.push(c);
        }
        out
    }

    pub fn components(&self) -> &[PrecisionComponent] {
        &self.components
    }

    pub fn component(&self, kind: PrecisionKind) -> Option<&PrecisionComponent> {
        self.components.iter().find(|c| c.kind() == kind)
    }

    pub fn variable(&self) -> Option<&VariablePrecision> {
        self.components.iter().find_map(|c| match c {
            PrecisionComponent::Variable(p) => Some(p),
            _ => None,
        })
    }

    pub fn predicate(&self) -> Option<&PredicatePrecision> {
        self.components.iter().find_map(|c| match c {
            PrecisionComponent::Predicate(p) => Some(p),
            _ => None,
        })
    }

    pub fn cooperating_analyses(&self) -> usize {
        self.components.len()
    }

    /// Replaces every component whose kind is in `selector` by the replacement of the same
    /// kind. Other components pass through unchanged.
    pub fn replace_matching(
        &self,
        replacements: &[PrecisionComponent],
        selector: &[PrecisionKind],
    ) -> Self {
        let components = self
            .components
            .iter()
            .map(|c| {
                let kind = c.kind();
                if selector.contains(&kind) {
                    if let Some(r) = replacements.iter().find(|r| r.kind() == kind) {
                        return r.clone();
                    }
                }
                c.clone()
            })
            .collect();
        Self { components }
    }

    pub fn join(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for c in other.components.iter() {
            match out.components.iter_mut().find(|o| o.kind() == c.kind()) {
                Some(o) => {
                    if let Some(joined) = o.join(c) {
                        *o = joined;
                    }
                }
                None => out.components.push(c.clone()),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Variable {
        Variable::new(name)
    }

    #[test]
    fn variable_scopes() {
        assert!(var("g").is_global());
        assert_eq!(var("main::x").function(), Some("main"));
        assert!(var("f::a__param").is_param());
        assert!(var("f::__retval").is_return());
    }

    #[test]
    fn increment_respects_scope() {
        let mut inc = PrecisionIncrement::default();
        inc.add(Location(3), var("main::x"));

        let global = VariablePrecision::empty(PrecisionScope::Global).with_increment(&inc);
        assert!(global.is_tracking(Location(7), &var("main::x")));

        let local = VariablePrecision::empty(PrecisionScope::Location).with_increment(&inc);
        assert!(local.is_tracking(Location(3), &var("main::x")));
        assert!(!local.is_tracking(Location(7), &var("main::x")));
    }

    #[test]
    fn join_is_a_union() {
        let mut inc_a = PrecisionIncrement::default();
        inc_a.add(Location(1), var("a"));
        let mut inc_b = PrecisionIncrement::default();
        inc_b.add(Location(2), var("b"));
        let empty = VariablePrecision::empty(PrecisionScope::Location);
        let a = empty.with_increment(&inc_a);
        let b = empty.with_increment(&inc_b);
        let ab = a.join(&b);
        assert_eq!(ab, b.join(&a));
        assert_eq!(ab.join(&ab), ab);
        assert!(ab.subsumes(&a) && ab.subsumes(&b));
        assert!(!a.subsumes(&ab));
    }

    #[test]
    fn components_of_different_kinds_do_not_join() {
        let variable =
            PrecisionComponent::Variable(VariablePrecision::empty(PrecisionScope::Global));
        let predicate = PrecisionComponent::Predicate(PredicatePrecision::empty());
        assert_eq!(variable.join(&predicate), None);
        assert_eq!(predicate.join(&variable), None);
        assert_eq!(variable.join(&variable), Some(variable.clone()));

        let composite = CompositePrecision::new([variable.clone()]);
        let both = composite.join(&CompositePrecision::new([predicate.clone()]));
        assert_eq!(both.components().len(), 2);
        assert_eq!(both.join(&both), both);
    }

    #[test]
    fn increment_fingerprint_ignores_locations() {
        let mut a = PrecisionIncrement::default();
        a.add(Location(1), var("x"));
        let mut b = PrecisionIncrement::default();
        b.add(Location(9), var("x"));
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.add(Location(9), var("y"));
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn replace_only_selected_components() {
        let p = Predicate::new("x > 0", [var("x")]);
        let composite = CompositePrecision::new([
            PrecisionComponent::Variable(VariablePrecision::default()),
            PrecisionComponent::Predicate(PredicatePrecision::empty()),
        ]);
        let mut inc = PrecisionIncrement::default();
        inc.add(Location(0), var("x"));
        let new_var = VariablePrecision::default().with_increment(&inc);
        let new_pred = PredicatePrecision::empty().with_global([p]);
        let replaced = composite.replace_matching(
            &[
                PrecisionComponent::Variable(new_var.clone()),
                PrecisionComponent::Predicate(new_pred),
            ],
            &[PrecisionKind::Variable],
        );
        assert_eq!(replaced.variable(), Some(&new_var));
        assert!(replaced.predicate().unwrap().is_empty());
        assert_eq!(replaced.cooperating_analyses(), 2);
    }

    #[test]
    fn local_predicates_shadow_global_ones() {
        let g = Predicate::new("g == 0", [var("g")]);
        let l = Predicate::new("main::x < 3", [var("main::x")]);
        let f = Predicate::new("main::y > 1", [var("main::y")]);
        let prec = PredicatePrecision::empty()
            .with_global([g.clone()])
            .with_local(Location(4), [l.clone()])
            .with_function("main", [f.clone()]);
        assert_eq!(prec.predicates_at(Location(4), "main"), [&l, &f].into());
        assert_eq!(prec.predicates_at(Location(5), "main"), [&g, &f].into());
        assert_eq!(prec.predicates_at(Location(5), "other"), [&g].into());
    }
}
