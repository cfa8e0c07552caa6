use std::{collections::HashSet, sync::Arc};

use crate::{api::NodeId, Node};

/// Arena-backed tree of cached nodes with copy-on-write snapshots.
///
/// Records live in a persistent map keyed by id; ordering lives in id lists
/// (`roots` here, [`Node::children`] per parent). Cloning a `Tree` is cheap
/// and yields an independent snapshot sharing every untouched record's
/// allocation with the original, which is what makes whole-tree rollback
/// points affordable.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Tree {
    nodes: im::HashMap<NodeId, Arc<Node>>,
    roots: im::Vector<NodeId>,
}

impl Tree {
    pub fn new() -> Tree {
        Tree::default()
    }

    pub fn get(&self, id: &NodeId) -> Option<&Arc<Node>> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.nodes.values()
    }

    /// Ordered top-level ids.
    pub fn root_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.roots.iter()
    }

    /// Ordered top-level records.
    pub fn roots(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.roots.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Resolve a parent's ordered children against the arena.
    pub fn children_of<'a>(&'a self, parent: &'a Node) -> impl Iterator<Item = &'a Arc<Node>> + 'a {
        parent.children.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Top-level ancestor of `id`, or `id` itself when already top-level.
    /// `None` when the id is not cached at all.
    pub fn root_of(&self, id: &NodeId) -> Option<NodeId> {
        let mut current = self.nodes.get(id)?.id;
        loop {
            match self.nodes.get(&current)?.parent {
                // a dangling parent link means we cannot climb further
                Some(parent) if self.nodes.contains_key(&parent) => current = parent,
                _ => return Some(current),
            }
        }
    }

    /// Ids of the whole subtree under `id`, itself included.
    pub fn subtree_ids(&self, id: &NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![*id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get(&next) {
                out.push(next);
                stack.extend(node.children.iter().copied());
            }
        }
        out
    }

    /// Apply `f` to one record copy-on-write. Returns false, touching
    /// nothing, when the id is not cached.
    pub fn update(&mut self, id: &NodeId, f: impl FnOnce(&mut Node)) -> bool {
        // get_mut would copy-on-write the map's root before the lookup,
        // changing the map's identity even on a miss
        if !self.nodes.contains_key(id) {
            return false;
        }
        match self.nodes.get_mut(id) {
            Some(node) => {
                f(Arc::make_mut(node));
                true
            }
            None => false,
        }
    }

    /// Insert or replace a record without touching any ordering list. The
    /// caller keeps the id reachable from a parent's child list or the root
    /// order.
    pub(crate) fn insert_record(&mut self, node: Node) {
        self.nodes.insert(node.id, Arc::new(node));
    }

    /// Insert `node` as the newest top-level entry.
    pub fn insert_root(&mut self, node: Node) {
        let id = node.id;
        if !self.roots.contains(&id) {
            self.roots.push_front(id);
        }
        self.nodes.insert(id, Arc::new(node));
    }

    /// Insert `node` as the last child of `parent`, fixing up the parent
    /// link and reply count. Returns false, registering nothing, when the
    /// parent is not cached.
    pub fn attach_child(&mut self, parent: &NodeId, mut node: Node) -> bool {
        if !self.nodes.contains_key(parent) {
            return false;
        }
        let id = node.id;
        node.parent = Some(*parent);
        self.nodes.insert(id, Arc::new(node));
        self.update(parent, |p| {
            if !p.children.contains(&id) {
                p.children.push(id);
                p.child_count += 1;
            }
        })
    }

    /// Drop `id` and everything under it, unlinking it from its parent's
    /// child list (or the root order) and adjusting the parent's reply
    /// count. Returns false when the id is unknown.
    pub fn remove(&mut self, id: &NodeId) -> bool {
        let parent = match self.nodes.get(id) {
            Some(node) => node.parent,
            None => return false,
        };
        match parent {
            Some(parent) => {
                self.update(&parent, |p| {
                    p.children.retain(|c| c != id);
                    p.child_count = p.child_count.saturating_sub(1);
                });
            }
            None => self.roots.retain(|r| r != id),
        }
        for gone in self.subtree_ids(id) {
            self.nodes.remove(&gone);
        }
        true
    }

    /// Replace the top-level order wholesale, then drop every record no
    /// longer reachable from it.
    pub fn set_roots(&mut self, order: Vec<NodeId>) {
        self.roots = order.into_iter().collect();
        self.prune_unreachable();
    }

    /// Drop records not reachable from the root order.
    pub(crate) fn prune_unreachable(&mut self) {
        let mut live: HashSet<NodeId> = HashSet::new();
        for root in self.roots.iter() {
            live.extend(self.subtree_ids(root));
        }
        self.nodes.retain(|id, _| live.contains(id));
    }

    /// Whether both values are the very same snapshot. Record storage is
    /// compared by identity; the root order structurally, since small
    /// `im::Vector`s are inlined and never share a pointer, not even with
    /// their own clones.
    pub fn ptr_eq(&self, other: &Tree) -> bool {
        self.nodes.ptr_eq(&other.nodes) && self.roots == other.roots
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::api::{UserId, Uuid};

    use super::*;

    fn id(n: u128) -> NodeId {
        NodeId(Uuid::from_u128(n))
    }

    fn node(n: u128) -> Node {
        Node {
            id: id(n),
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

    /// 1 -> (2 -> 4, 3)
    fn sample() -> Tree {
        let mut tree = Tree::new();
        tree.insert_root(node(1));
        assert!(tree.attach_child(&id(1), node(2)));
        assert!(tree.attach_child(&id(1), node(3)));
        assert!(tree.attach_child(&id(2), node(4)));
        tree
    }

    #[test]
    fn updating_one_record_shares_every_other_allocation() {
        let before = sample();
        let mut after = before.clone();
        assert!(after.update(&id(4), |n| n.upvotes = 7));

        assert!(Arc::ptr_eq(
            before.get(&id(2)).unwrap(),
            after.get(&id(2)).unwrap()
        ));
        assert!(Arc::ptr_eq(
            before.get(&id(3)).unwrap(),
            after.get(&id(3)).unwrap()
        ));
        assert!(!Arc::ptr_eq(
            before.get(&id(4)).unwrap(),
            after.get(&id(4)).unwrap()
        ));
        assert_eq!(before.get(&id(4)).unwrap().upvotes, 0);
        assert_eq!(after.get(&id(4)).unwrap().upvotes, 7);
    }

    #[test]
    fn a_clone_is_the_same_snapshot() {
        let tree = sample();
        assert!(tree.ptr_eq(&tree.clone()));
        assert!(Tree::new().ptr_eq(&Tree::new().clone()));
    }

    #[test]
    fn updating_a_missing_id_touches_nothing() {
        let mut tree = sample();
        let before = tree.clone();
        assert!(!tree.update(&id(9), |n| n.upvotes = 7));
        assert!(tree.ptr_eq(&before));
    }

    #[test]
    fn attaching_to_a_missing_parent_is_refused() {
        let mut tree = sample();
        let before = tree.clone();
        assert!(!tree.attach_child(&id(9), node(5)));
        assert!(tree.ptr_eq(&before));
    }

    #[test]
    fn attach_links_both_directions_and_counts() {
        let tree = sample();
        let parent = tree.get(&id(1)).unwrap();
        assert_eq!(parent.children, vec![id(2), id(3)]);
        assert_eq!(parent.child_count, 2);
        assert_eq!(tree.get(&id(2)).unwrap().parent, Some(id(1)));
        assert_eq!(tree.node_count(), 4);
    }

    #[test]
    fn remove_cascades_and_unlinks() {
        let mut tree = sample();
        assert!(tree.remove(&id(2)));
        assert!(!tree.contains(&id(2)));
        assert!(!tree.contains(&id(4)));
        let parent = tree.get(&id(1)).unwrap();
        assert_eq!(parent.children, vec![id(3)]);
        assert_eq!(parent.child_count, 1);
        assert!(!tree.remove(&id(2)));
    }

    #[test]
    fn removing_a_root_drops_the_whole_thread() {
        let mut tree = sample();
        tree.insert_root(node(5));
        assert!(tree.remove(&id(1)));
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.root_ids().copied().collect::<Vec<_>>(), vec![id(5)]);
    }

    #[test]
    fn root_of_climbs_to_the_top() {
        let tree = sample();
        assert_eq!(tree.root_of(&id(4)), Some(id(1)));
        assert_eq!(tree.root_of(&id(1)), Some(id(1)));
        assert_eq!(tree.root_of(&id(9)), None);
    }

    #[test]
    fn set_roots_drops_unreachable_records() {
        let mut tree = sample();
        tree.insert_root(node(5));
        tree.set_roots(vec![id(5)]);
        assert_eq!(tree.node_count(), 1);
        assert!(tree.contains(&id(5)));
        assert!(!tree.contains(&id(1)));
        assert!(!tree.contains(&id(4)));
    }

    #[test]
    fn insert_root_prepends() {
        let mut tree = sample();
        tree.insert_root(node(5));
        assert_eq!(
            tree.root_ids().copied().collect::<Vec<_>>(),
            vec![id(5), id(1)]
        );
        // replacing an existing root keeps its position
        tree.insert_root(node(1));
        assert_eq!(
            tree.root_ids().copied().collect::<Vec<_>>(),
            vec![id(5), id(1)]
        );
    }
}
