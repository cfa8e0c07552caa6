#![cfg(test)]

//! Randomized checks: the arena-backed [`Tree`] against a naive recursive
//! model, and vote toggling against its bookkeeping invariants.

use std::collections::HashSet;

use chrono::Utc;
use proptest::prelude::*;

use crate::{
    api::{NodeId, UserId, Uuid, Vote},
    Node, Tree,
};

fn nid(n: u8) -> NodeId {
    NodeId(Uuid::from_u128(n as u128 + 1))
}

fn record(n: u8) -> Node {
    Node {
        id: nid(n),
        parent: None,
        title: format!("node {n}"),
        content: String::new(),
        images: Vec::new(),
        owner: UserId::stub(),
        owner_username: "someone".to_string(),
        upvotes: 0,
        downvotes: 0,
        voters: Vec::new(),
        children: Vec::new(),
        child_count: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Plain recursive tree, the obviously-correct mirror of what the arena is
/// supposed to behave like: depth-first locate, remove-anywhere, ordered
/// children.
#[derive(Clone, Debug, Default)]
struct Naive {
    roots: Vec<NaiveNode>,
}

#[derive(Clone, Debug)]
struct NaiveNode {
    id: NodeId,
    upvotes: u32,
    children: Vec<NaiveNode>,
}

impl NaiveNode {
    fn new(id: NodeId) -> NaiveNode {
        NaiveNode {
            id,
            upvotes: 0,
            children: Vec::new(),
        }
    }
}

impl Naive {
    fn find_mut<'a>(list: &'a mut [NaiveNode], id: &NodeId) -> Option<&'a mut NaiveNode> {
        for node in list {
            if node.id == *id {
                return Some(node);
            }
            if let Some(found) = Self::find_mut(&mut node.children, id) {
                return Some(found);
            }
        }
        None
    }

    fn contains(&mut self, id: &NodeId) -> bool {
        Self::find_mut(&mut self.roots, id).is_some()
    }

    fn insert_root(&mut self, id: NodeId) {
        self.roots.insert(0, NaiveNode::new(id));
    }

    fn attach(&mut self, parent: &NodeId, id: NodeId) {
        Self::find_mut(&mut self.roots, parent)
            .expect("attaching under a missing parent")
            .children
            .push(NaiveNode::new(id));
    }

    fn remove(&mut self, id: &NodeId) -> bool {
        Self::remove_in(&mut self.roots, id)
    }

    fn remove_in(list: &mut Vec<NaiveNode>, id: &NodeId) -> bool {
        if let Some(at) = list.iter().position(|n| n.id == *id) {
            list.remove(at);
            return true;
        }
        list.iter_mut()
            .any(|n| Self::remove_in(&mut n.children, id))
    }

    fn bump(&mut self, id: &NodeId) -> bool {
        match Self::find_mut(&mut self.roots, id) {
            Some(node) => {
                node.upvotes += 1;
                true
            }
            None => false,
        }
    }

    fn root_ids(&self) -> Vec<NodeId> {
        self.roots.iter().map(|n| n.id).collect()
    }
}

#[derive(Clone, Copy, Debug)]
enum Op {
    InsertRoot(u8),
    AttachChild { parent: u8, child: u8 },
    Remove(u8),
    Bump(u8),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..16).prop_map(Op::InsertRoot),
        (0u8..16, 0u8..16).prop_map(|(parent, child)| Op::AttachChild { parent, child }),
        (0u8..16).prop_map(Op::Remove),
        (0u8..16).prop_map(Op::Bump),
    ]
}

/// Walk the model and check the arena agrees on ordering, parent links,
/// payloads and the total record count.
fn check_equiv(tree: &Tree, model: &Naive) -> Result<(), TestCaseError> {
    prop_assert_eq!(
        tree.root_ids().copied().collect::<Vec<_>>(),
        model.root_ids()
    );
    let mut walked = HashSet::new();
    let mut stack: Vec<(&NaiveNode, Option<NodeId>)> =
        model.roots.iter().map(|n| (n, None)).collect();
    while let Some((expected, parent)) = stack.pop() {
        walked.insert(expected.id);
        let rec = tree.get(&expected.id);
        prop_assert!(rec.is_some(), "missing record for {:?}", expected.id);
        let rec = rec.unwrap();
        prop_assert_eq!(rec.parent, parent);
        prop_assert_eq!(rec.upvotes, expected.upvotes);
        prop_assert_eq!(
            rec.children.clone(),
            expected.children.iter().map(|c| c.id).collect::<Vec<_>>()
        );
        stack.extend(expected.children.iter().map(|c| (c, Some(expected.id))));
    }
    prop_assert_eq!(tree.node_count(), walked.len());
    for rec in tree.nodes() {
        prop_assert!(walked.contains(&rec.id), "stray record {:?}", rec.id);
    }
    Ok(())
}

proptest! {
    #[test]
    fn arena_matches_the_recursive_model(ops in prop::collection::vec(arb_op(), 0..64)) {
        let mut tree = Tree::new();
        let mut model = Naive::default();
        for op in ops {
            match op {
                Op::InsertRoot(n) => {
                    // ids are globally unique; skip colliding inserts
                    if !model.contains(&nid(n)) {
                        tree.insert_root(record(n));
                        model.insert_root(nid(n));
                    }
                }
                Op::AttachChild { parent, child } => {
                    let (p, c) = (nid(parent), nid(child));
                    if model.contains(&p) && !model.contains(&c) {
                        prop_assert!(tree.attach_child(&p, record(child)));
                        model.attach(&p, c);
                    } else if !model.contains(&p) {
                        prop_assert!(!tree.attach_child(&p, record(child)));
                    }
                }
                Op::Remove(n) => {
                    prop_assert_eq!(tree.remove(&nid(n)), model.remove(&nid(n)));
                }
                Op::Bump(n) => {
                    prop_assert_eq!(
                        tree.update(&nid(n), |x| x.upvotes += 1),
                        model.bump(&nid(n))
                    );
                }
            }
            check_equiv(&tree, &model)?;
        }
    }

    #[test]
    fn vote_toggling_keeps_tallies_and_voters_consistent(
        ops in prop::collection::vec((0u8..5, any::<bool>()), 0..64)
    ) {
        let mut node = record(0);
        for (user, up) in ops {
            let direction = match up {
                true => Vote::Upvote,
                false => Vote::Downvote,
            };
            node.toggle_vote(UserId(Uuid::from_u128(user as u128)), direction);

            // tallies always equal the voter list breakdown
            let ups = node.voters.iter().filter(|v| v.vote == Vote::Upvote).count();
            let downs = node.voters.len() - ups;
            prop_assert_eq!(node.upvotes as usize, ups);
            prop_assert_eq!(node.downvotes as usize, downs);

            // and no user ever holds two entries
            let mut seen = HashSet::new();
            prop_assert!(node.voters.iter().all(|v| seen.insert(v.voter_id)));
        }
    }
}
