use std::sync::Arc;

use crate::{api::NodeId, Node, Tree};

/// An immutable, generation-stamped view of the cache.
///
/// This is what consumers hold while rendering: cloning is cheap, two
/// snapshots with the same generation carry the same data, and concurrent
/// store mutations can never show through an already-taken snapshot.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    generation: u64,
    tree: Tree,
    fresh: im::HashSet<NodeId>,
}

impl Snapshot {
    pub(crate) fn new(generation: u64, tree: Tree, fresh: im::HashSet<NodeId>) -> Snapshot {
        Snapshot {
            generation,
            tree,
            fresh,
        }
    }

    /// Bumped on every published change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn get(&self, id: &NodeId) -> Option<&Arc<Node>> {
        self.tree.get(id)
    }

    /// Ordered top-level records.
    pub fn roots(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.tree.roots()
    }

    pub fn children_of<'a>(&'a self, parent: &'a Node) -> impl Iterator<Item = &'a Arc<Node>> + 'a {
        self.tree.children_of(parent)
    }

    /// Whether `id` was created through this store during this session.
    /// Thread views pin such nodes above their cached ordering.
    pub fn is_fresh(&self, id: &NodeId) -> bool {
        self.fresh.contains(id)
    }
}
