// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

mod common;

use argus::arg::*;
use argus::error::ArgError;
use argus::precision::{CompositePrecision, PrecisionScope};
use argus::reached::ReachedSet;
use common::*;
use proptest::prelude::*;

fn prec() -> CompositePrecision {
    variable_precision(PrecisionScope::Global)
}

fn st(loc: u32) -> ToyState {
    ToyState::at(loc, false)
}

#[test]
fn shared_children_survive_subtree_removal() {
    let mut reached = ReachedSet::new(st(0), prec()).unwrap();
    let root = reached.first_state().unwrap();
    let r = reached.add_successor(root, st(1), prec()).unwrap();
    let s = reached.add_successor(root, st(2), prec()).unwrap();
    let c1 = reached.add_successor(r, st(3), prec()).unwrap();
    let c2 = reached.add_successor(r, st(4), prec()).unwrap();
    assert!(reached.arg_mut().add_parent(c2, s).unwrap());

    let removed = reached.remove_subtree(r, &[], &[]).unwrap();
    assert_eq!(removed, vec![c1]);
    assert!(reached.contains(r));
    assert!(reached.contains(c2));
    assert!(!reached.contains(c1));
    assert!(reached.arg().children(r).is_empty());
    assert_eq!(reached.arg().parents(c2), &[s]);
    assert!(reached.waitlist().any(|n| n == r));
    reached.check_consistency().unwrap();
}

#[test]
fn pruning_removes_the_node_and_what_only_it_reaches() {
    let mut reached = ReachedSet::new(st(0), prec()).unwrap();
    let root = reached.first_state().unwrap();
    let r = reached.add_successor(root, st(1), prec()).unwrap();
    let s = reached.add_successor(root, st(2), prec()).unwrap();
    let c1 = reached.add_successor(r, st(3), prec()).unwrap();
    let c2 = reached.add_successor(r, st(4), prec()).unwrap();
    reached.arg_mut().add_parent(c2, s).unwrap();

    // children first
    assert_eq!(reached.prune(r).unwrap(), vec![c1, r]);
    assert_eq!(locations(&reached), vec![0, 2, 4]);
    assert_eq!(reached.arg().parents(c2), &[s]);
    reached.check_consistency().unwrap();

    assert_eq!(reached.prune(r), Err(ArgError::UnknownNode(r)));
}

#[test]
fn removing_a_covering_node_uncovers() {
    let mut reached = ReachedSet::new(st(0), prec()).unwrap();
    let root = reached.first_state().unwrap();
    let a = reached.add_successor(root, st(1), prec()).unwrap();
    let other = reached.add_successor(root, st(2), prec()).unwrap();
    let b = reached.add_successor(other, st(1), prec()).unwrap();
    while reached.pop_from_waitlist().is_some() {}

    reached.arg_mut().set_covered(b, a).unwrap();
    assert_eq!(reached.arg().covered_by(b), Some(a));
    assert_eq!(reached.arg().covered_by_this(a).collect::<Vec<_>>(), vec![b]);

    reached.prune(a).unwrap();
    assert!(!reached.arg().is_covered(b));
    assert_eq!(reached.waitlist().collect::<Vec<_>>(), vec![b]);
    reached.check_consistency().unwrap();
}

#[test]
fn covered_nodes_cannot_cover() {
    let mut arg = Arg::default();
    let root = arg.add_root(st(0)).unwrap();
    let a = arg.add_child(root, st(1)).unwrap();
    let b = arg.add_child(root, st(1)).unwrap();
    let c = arg.add_child(root, st(1)).unwrap();
    arg.set_covered(b, a).unwrap();
    assert_eq!(
        arg.set_covered(c, b),
        Err(ArgError::InvalidCoverage { node: c, by: b })
    );
    assert_eq!(
        arg.set_covered(a, a),
        Err(ArgError::InvalidCoverage { node: a, by: a })
    );
    assert!(arg.set_uncovered(b));
    assert!(!arg.set_uncovered(b));
}

#[test]
fn structural_errors() {
    let mut arg = Arg::default();
    let root = arg.add_root(st(0)).unwrap();
    assert_eq!(arg.add_root(st(0)), Err(ArgError::DuplicateRoot(root)));
    let a = arg.add_child(root, st(1)).unwrap();
    let b = arg.add_child(a, st(2)).unwrap();
    assert_eq!(
        arg.add_parent(a, b),
        Err(ArgError::Cycle { node: a, parent: b })
    );
    assert_eq!(arg.add_parent(b, a), Ok(false));
    assert_eq!(arg.detach(root), Err(ArgError::RootDetach(root)));

    arg.detach(a).unwrap();
    assert_eq!(arg.one_path_to(b), Err(ArgError::Orphan(b)));
    arg.check_well_formed().unwrap();
}

#[test]
fn paths_follow_the_lowest_parent() {
    let mut arg = Arg::default();
    let root = arg.add_root(st(0)).unwrap();
    let a = arg.add_child(root, st(1)).unwrap();
    let b = arg.add_child(root, st(2)).unwrap();
    let c = arg.add_child(b, st(3)).unwrap();
    arg.add_parent(c, a).unwrap();
    assert_eq!(arg.parents(c), &[a, b]);
    assert_eq!(arg.first_parent(c), Some(a));

    let path = arg.one_path_to(c).unwrap();
    assert_eq!(path.nodes().collect::<Vec<_>>(), vec![root, a, c]);
    assert_eq!(
        path.edges().collect::<Vec<_>>(),
        vec![
            Edge {
                from: Location(0),
                to: Location(1)
            },
            Edge {
                from: Location(1),
                to: Location(3)
            },
        ]
    );
    insta::assert_snapshot!(path.to_string(), @"#1@N0 -> #2@N1 -> #4@N3");

    assert!(ArgPath::from_nodes(&arg, &[root, c]).is_err());
}

#[test]
fn fingerprints_ignore_node_identity() {
    let mut arg = Arg::default();
    let root = arg.add_root(st(0)).unwrap();
    let a1 = arg.add_child(root, st(1)).unwrap();
    let t1 = arg.add_child(a1, ToyState::at(2, true)).unwrap();
    let a2 = arg.add_child(root, st(1)).unwrap();
    let t2 = arg.add_child(a2, ToyState::at(2, true)).unwrap();
    let b = arg.add_child(root, st(5)).unwrap();

    let p1 = arg.one_path_to(t1).unwrap();
    let p2 = arg.one_path_to(t2).unwrap();
    let p3 = arg.one_path_to(b).unwrap();
    assert_ne!(p1, p2);
    assert_eq!(p1.fingerprint(), p2.fingerprint());
    assert_ne!(p1.fingerprint(), p3.fingerprint());
    assert_eq!(fingerprint_paths([&p1, &p2]), fingerprint_paths([&p2]));
    assert_eq!(fingerprint_paths([&p1, &p3]), fingerprint_paths([&p3, &p1]));
    assert_ne!(fingerprint_paths([&p1, &p3]), fingerprint_paths([&p1]));
}

#[test]
fn removable_subtree_is_topologically_ordered() {
    // diamond: root -> a, root -> b, a -> d, b -> d, d -> e
    let mut arg = Arg::default();
    let root = arg.add_root(st(0)).unwrap();
    let a = arg.add_child(root, st(1)).unwrap();
    let b = arg.add_child(root, st(2)).unwrap();
    let d = arg.add_child(a, st(3)).unwrap();
    arg.add_parent(d, b).unwrap();
    let e = arg.add_child(d, st(4)).unwrap();

    assert_eq!(arg.removable_subtree(a), vec![a]);
    let all = arg.removable_subtree(root);
    assert_eq!(all.len(), 5);
    let pos = |n: NodeRef| all.iter().position(|x| *x == n).unwrap();
    assert!(pos(a) < pos(d));
    assert!(pos(b) < pos(d));
    assert!(pos(d) < pos(e));
    assert_eq!(arg.subtree(a).into_iter().collect::<Vec<_>>(), vec![a, d, e]);
}

#[derive(Debug, Clone)]
enum Op {
    Child(usize, u32),
    Parent(usize, usize),
    Cover(usize, usize),
    Prune(usize),
    Refine(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (any::<usize>(), 0u32..6).prop_map(|(n, l)| Op::Child(n, l)),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::Parent(a, b)),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::Cover(a, b)),
        1 => any::<usize>().prop_map(Op::Prune),
        1 => any::<usize>().prop_map(Op::Refine),
    ]
}

proptest! {
    #[test]
    fn random_edits_keep_the_graph_consistent(ops in prop::collection::vec(op(), 1..60)) {
        let mut reached = ReachedSet::new(st(0), prec()).unwrap();
        for op in ops {
            let nodes: Vec<NodeRef> = reached.iter().map(|(n, _, _)| n).collect();
            let pick = |i: usize| nodes[i % nodes.len()];
            match op {
                Op::Child(n, loc) => {
                    reached.add_successor(pick(n), st(loc), prec()).unwrap();
                }
                Op::Parent(a, b) => match reached.arg_mut().add_parent(pick(a), pick(b)) {
                    Ok(_) | Err(ArgError::Cycle { .. }) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                },
                Op::Cover(a, b) => {
                    let _ = reached.arg_mut().set_covered(pick(a), pick(b));
                }
                Op::Prune(n) => {
                    let node = pick(n);
                    if !reached.arg().is_root(node) {
                        let removed = reached.prune(node).unwrap();
                        prop_assert!(removed.iter().all(|r| !reached.contains(*r)));
                    }
                }
                Op::Refine(n) => {
                    let node = pick(n);
                    reached.remove_subtree(node, &[], &[]).unwrap();
                    prop_assert!(reached.contains(node));
                    prop_assert!(reached.remove_subtree(node, &[], &[]).unwrap().is_empty());
                }
            }
            prop_assert_eq!(reached.check_consistency(), Ok(()));
            for (node, _, _) in reached.iter() {
                if let Some(by) = reached.arg().covered_by(node) {
                    prop_assert!(reached.contains(by));
                }
            }
        }
    }
}
