use std::{cmp::Reverse, collections::HashMap, sync::Arc};

use crate::{api::NodeId, Node, Snapshot};

/// How replies under one parent are ordered.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SortMode {
    /// Score descending, newest first among equal scores.
    #[default]
    Top,
    /// Creation time descending.
    Newest,
}

/// Replies shown for the focused node before any "load more".
const FOCUS_VISIBLE: usize = 10;
/// Replies shown per nested parent before any "load more".
const NESTED_VISIBLE: usize = 2;
/// How many more replies each "load more" reveals.
const LOAD_MORE_STEP: usize = 10;

/// Stable, paginated view over one node's reply thread.
///
/// The ordering under a parent is computed the first time that parent is
/// paged and after an explicit [`set_sort`](Self::set_sort), then cached as
/// an id list. Every page re-resolves those ids against the live snapshot,
/// so tallies update in place while positions hold still until the caller
/// asks for a re-sort. Replies created through this session render pinned
/// above the cached order until a re-sort folds them in. Dropping the view
/// forgets all of it.
pub struct ThreadView {
    focus: NodeId,
    sort: SortMode,
    order: HashMap<NodeId, Vec<NodeId>>,
    visible: HashMap<NodeId, usize>,
}

/// One parent's currently visible slice.
#[derive(Clone, Debug)]
pub struct Page {
    /// Visible replies, pinned ones first.
    pub items: Vec<Arc<Node>>,
    /// How many replies exist under this parent right now.
    pub total: usize,
    /// How many are hidden behind the cursor.
    pub remaining: usize,
}

impl Page {
    pub fn has_more(&self) -> bool {
        self.remaining > 0
    }

    fn empty() -> Page {
        Page {
            items: Vec::new(),
            total: 0,
            remaining: 0,
        }
    }
}

impl ThreadView {
    pub fn new(focus: NodeId) -> ThreadView {
        ThreadView {
            focus,
            sort: SortMode::default(),
            order: HashMap::new(),
            visible: HashMap::new(),
        }
    }

    pub fn focus(&self) -> NodeId {
        self.focus
    }

    pub fn sort_mode(&self) -> SortMode {
        self.sort
    }

    /// Recompute every cached ordering under `mode`, folding pinned replies
    /// into their sorted positions. Cursors keep their widths.
    pub fn set_sort(&mut self, mode: SortMode, snap: &Snapshot) {
        self.sort = mode;
        let parents: Vec<NodeId> = self.order.keys().copied().collect();
        self.order.clear();
        for parent in parents {
            let ids = self.sorted_ids(snap, &parent);
            self.order.insert(parent, ids);
        }
    }

    /// The visible slice of `parent`'s replies against `snap`.
    pub fn page(&mut self, snap: &Snapshot, parent: &NodeId) -> Page {
        if !self.order.contains_key(parent) {
            let ids = self.sorted_ids(snap, parent);
            self.order.insert(*parent, ids);
        }
        let Some(node) = snap.get(parent) else {
            return Page::empty();
        };
        let cached = &self.order[parent];

        // replies created this session and not yet folded in sort first,
        // newest on top
        let mut pinned: Vec<&Arc<Node>> = node
            .children
            .iter()
            .filter(|id| snap.is_fresh(id) && !cached.contains(id))
            .filter_map(|id| snap.get(id))
            .collect();
        pinned.sort_by_key(|n| Reverse(n.created_at));

        let all: Vec<Arc<Node>> = pinned
            .into_iter()
            .cloned()
            .chain(cached.iter().filter_map(|id| snap.get(id)).cloned())
            .collect();
        let total = all.len();
        let mut items = all;
        items.truncate(self.visible_count(parent));
        Page {
            remaining: total - items.len(),
            total,
            items,
        }
    }

    /// Current cursor width for `parent`; the default depends on whether it
    /// is the focused node or a nested reply.
    pub fn visible_count(&self, parent: &NodeId) -> usize {
        match self.visible.get(parent) {
            Some(count) => *count,
            None if *parent == self.focus => FOCUS_VISIBLE,
            None => NESTED_VISIBLE,
        }
    }

    /// Widen `parent`'s cursor by one step. Other cursors are untouched.
    pub fn load_more(&mut self, parent: &NodeId) {
        let next = self.visible_count(parent) + LOAD_MORE_STEP;
        self.visible.insert(*parent, next);
    }

    fn sorted_ids(&self, snap: &Snapshot, parent: &NodeId) -> Vec<NodeId> {
        let Some(node) = snap.get(parent) else {
            return Vec::new();
        };
        let mut replies: Vec<&Arc<Node>> = snap.children_of(node).collect();
        match self.sort {
            SortMode::Top => replies.sort_by_key(|n| (Reverse(n.score()), Reverse(n.created_at))),
            SortMode::Newest => replies.sort_by_key(|n| Reverse(n.created_at)),
        }
        replies.into_iter().map(|n| n.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::{
        api::{Time, UserId, Uuid},
        Tree,
    };

    use super::*;

    fn id(n: u128) -> NodeId {
        NodeId(Uuid::from_u128(n))
    }

    fn minute(n: i64) -> Time {
        Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap() + Duration::minutes(n)
    }

    fn reply(n: u128, upvotes: u32, created_minute: i64) -> Node {
        Node {
            id: id(n),
            parent: None,
            title: format!("reply {n}"),
            content: String::new(),
            images: Vec::new(),
            owner: UserId::stub(),
            owner_username: "someone".to_string(),
            upvotes,
            downvotes: 0,
            voters: Vec::new(),
            children: Vec::new(),
            child_count: 0,
            created_at: minute(created_minute),
            updated_at: minute(created_minute),
        }
    }

    fn snap(tree: &Tree, fresh: &[NodeId]) -> Snapshot {
        Snapshot::new(1, tree.clone(), fresh.iter().copied().collect())
    }

    fn page_ids(view: &mut ThreadView, snap: &Snapshot, parent: &NodeId) -> Vec<NodeId> {
        view.page(snap, parent).items.iter().map(|n| n.id).collect()
    }

    /// Root 1 with replies 2 (score 1, old), 3 (score 5, older), 4 (score
    /// 5, newer), 5 (score 0, newest).
    fn sample() -> Tree {
        let mut tree = Tree::new();
        tree.insert_root(reply(1, 0, 0));
        tree.attach_child(&id(1), reply(2, 1, 10));
        tree.attach_child(&id(1), reply(3, 5, 5));
        tree.attach_child(&id(1), reply(4, 5, 20));
        tree.attach_child(&id(1), reply(5, 0, 30));
        tree
    }

    #[test]
    fn top_orders_by_score_then_recency() {
        let tree = sample();
        let mut view = ThreadView::new(id(1));
        assert_eq!(
            page_ids(&mut view, &snap(&tree, &[]), &id(1)),
            vec![id(4), id(3), id(2), id(5)]
        );
    }

    #[test]
    fn newest_orders_by_time_alone() {
        let tree = sample();
        let mut view = ThreadView::new(id(1));
        assert_eq!(view.sort_mode(), SortMode::Top);
        view.set_sort(SortMode::Newest, &snap(&tree, &[]));
        assert_eq!(view.sort_mode(), SortMode::Newest);
        assert_eq!(
            page_ids(&mut view, &snap(&tree, &[]), &id(1)),
            vec![id(5), id(4), id(2), id(3)]
        );
    }

    #[test]
    fn cached_order_survives_live_tally_changes() {
        let mut tree = sample();
        let mut view = ThreadView::new(id(1));
        let first = page_ids(&mut view, &snap(&tree, &[]), &id(1));
        assert_eq!(first, vec![id(4), id(3), id(2), id(5)]);

        // reply 5 rockets past everything
        tree.update(&id(5), |n| n.upvotes = 100);
        let after = snap(&tree, &[]);
        let page = view.page(&after, &id(1));
        assert_eq!(
            page.items.iter().map(|n| n.id).collect::<Vec<_>>(),
            first,
            "positions must hold without an explicit re-sort"
        );
        // but the fresh tally shows through
        assert_eq!(page.items[3].upvotes, 100);

        view.set_sort(SortMode::Top, &after);
        assert_eq!(
            page_ids(&mut view, &after, &id(1)),
            vec![id(5), id(4), id(3), id(2)]
        );
    }

    #[test]
    fn cursors_are_independent_per_parent() {
        let mut tree = Tree::new();
        tree.insert_root(reply(1, 0, 0));
        for n in 0..12 {
            tree.attach_child(&id(1), reply(100 + n as u128, 0, n));
        }
        // one nested parent with three replies of its own
        for n in 0..3 {
            tree.attach_child(&id(100), reply(200 + n as u128, 0, n));
        }

        let snap = snap(&tree, &[]);
        let mut view = ThreadView::new(id(1));

        let focus = view.page(&snap, &id(1));
        assert_eq!(focus.items.len(), 10);
        assert_eq!(focus.total, 12);
        assert_eq!(focus.remaining, 2);
        assert!(focus.has_more());

        let nested = view.page(&snap, &id(100));
        assert_eq!(nested.items.len(), 2);
        assert_eq!(nested.remaining, 1);

        view.load_more(&id(100));
        assert_eq!(view.page(&snap, &id(100)).items.len(), 3);
        assert!(!view.page(&snap, &id(100)).has_more());
        // widening the nested cursor left the focus cursor alone
        assert_eq!(view.page(&snap, &id(1)).items.len(), 10);

        view.load_more(&id(1));
        assert_eq!(view.page(&snap, &id(1)).items.len(), 12);
        assert!(!view.page(&snap, &id(1)).has_more());
    }

    #[test]
    fn fresh_replies_pin_above_the_cached_order() {
        let mut tree = sample();
        let mut view = ThreadView::new(id(1));
        let cached = page_ids(&mut view, &snap(&tree, &[]), &id(1));

        // a brand-new low-score reply would sort last; pinned it shows first
        tree.attach_child(&id(1), reply(6, 0, 40));
        let after = snap(&tree, &[id(6)]);
        let mut expected = vec![id(6)];
        expected.extend(cached);
        assert_eq!(page_ids(&mut view, &after, &id(1)), expected);

        // an explicit re-sort folds it into its real position
        view.set_sort(SortMode::Top, &after);
        assert_eq!(
            page_ids(&mut view, &after, &id(1)),
            vec![id(4), id(3), id(2), id(6), id(5)]
        );
    }

    #[test]
    fn deleted_replies_are_skipped_not_resorted() {
        let mut tree = sample();
        let mut view = ThreadView::new(id(1));
        page_ids(&mut view, &snap(&tree, &[]), &id(1));

        tree.remove(&id(3));
        let page = view.page(&snap(&tree, &[]), &id(1));
        assert_eq!(
            page.items.iter().map(|n| n.id).collect::<Vec<_>>(),
            vec![id(4), id(2), id(5)]
        );
        assert_eq!(page.total, 3);
    }

    #[test]
    fn unknown_parents_page_empty() {
        let tree = Tree::new();
        let mut view = ThreadView::new(id(1));
        let page = view.page(&snap(&tree, &[]), &id(9));
        assert!(page.items.is_empty());
        assert_eq!(page.total, 0);
        assert!(!page.has_more());
    }
}
