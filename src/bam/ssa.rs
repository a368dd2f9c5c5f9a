// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::precision::{Predicate, Variable};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Default)]
struct SsaEntry {
    /// `None` if only the latest used index is known.
    index: Option<u32>,
    latest_used: u32,
}

/// Maps every variable to its current static single assignment index. Additionally remembers
/// the highest index that was ever handed out, so that fresh indices never collide.
#[derive(Debug, PartialEq, Eq, Clone, Hash, Default)]
pub struct SsaMap {
    entries: BTreeMap<Variable, SsaEntry>,
}

impl SsaMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self, var: &Variable) -> Option<u32> {
        self.entries.get(var).and_then(|e| e.index)
    }

    pub fn latest_used(&self, var: &Variable) -> Option<u32> {
        self.entries.get(var).map(|e| e.latest_used)
    }

    /// An index that was not used for `var` before.
    pub fn fresh_index(&self, var: &Variable) -> u32 {
        self.latest_used(var).map(|i| i + 1).unwrap_or(1)
    }

    pub fn set_index(&mut self, var: &Variable, index: u32) {
        let entry = self.entries.entry(var.clone()).or_default();
        entry.index = Some(index);
        entry.latest_used = entry.latest_used.max(index);
    }

    /// Marks `index` as used without changing the current index.
    pub fn set_latest_used(&mut self, var: &Variable, index: u32) {
        let entry = self.entries.entry(var.clone()).or_default();
        entry.latest_used = entry.latest_used.max(index);
    }

    pub fn with_index(mut self, var: impl Into<Variable>, index: u32) -> Self {
        self.set_index(&var.into(), index);
        self
    }

    /// Variables that have a current index.
    pub fn variables(&self) -> impl Iterator<Item = &Variable> + '_ {
        self.entries
            .iter()
            .filter(|(_, e)| e.index.is_some())
            .map(|(v, _)| v)
    }

    /// All variables, including the ones for which only a latest used index is known.
    pub fn all_variables(&self) -> impl Iterator<Item = &Variable> + '_ {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.variables().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Takes the maximum of both maps for every variable.
    pub fn merged_with(&self, other: &SsaMap) -> SsaMap {
        let mut out = self.clone();
        for (var, entry) in other.entries.iter() {
            let e = out.entries.entry(var.clone()).or_default();
            e.index = match (e.index, entry.index) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
            e.latest_used = e.latest_used.max(entry.latest_used);
        }
        out
    }
}

impl Display for SsaMap {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (ii, var) in self.variables().enumerate() {
            if ii > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{var}@{}", self.index(var).unwrap_or_default())?;
        }
        write!(f, "}}")
    }
}

/// A predicate whose variables were renamed to a specific SSA index.
#[derive(Debug, PartialEq, Eq, Clone, Hash, PartialOrd, Ord)]
pub struct InstantiatedPredicate {
    pub predicate: Predicate,
    pub indices: BTreeMap<Variable, u32>,
}

impl InstantiatedPredicate {
    /// Variables without an index in `ssa` are left uninstantiated.
    pub fn new(predicate: Predicate, ssa: &SsaMap) -> Self {
        let indices = predicate
            .variables()
            .iter()
            .filter_map(|v| ssa.index(v).map(|i| (v.clone(), i)))
            .collect();
        Self { predicate, indices }
    }
}

impl Display for InstantiatedPredicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.predicate)?;
        if !self.indices.is_empty() {
            write!(f, " [")?;
            for (ii, (var, index)) in self.indices.iter().enumerate() {
                if ii > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{var}@{index}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}
