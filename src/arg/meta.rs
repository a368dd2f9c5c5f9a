// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use crate::arg::NodeRef;

/// A dense map to store per-traversal data for each node. Replaces mark fields on the nodes:
/// every traversal builds its own instance.
#[derive(Debug, Default, Clone)]
pub struct NodeMetaData<T: Default + Clone> {
    inner: Vec<T>,
    default: T,
}

impl<T: Default + Clone> NodeMetaData<T> {
    pub fn get(&self, n: NodeRef) -> &T {
        self.inner.get(n.index()).unwrap_or(&self.default)
    }

    pub fn get_mut(&mut self, n: NodeRef) -> &mut T {
        if self.inner.len() <= n.index() {
            self.inner.resize(n.index() + 1, T::default());
        }
        &mut self.inner[n.index()]
    }

    pub fn into_vec(self) -> Vec<T> {
        self.inner
    }
}
