use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::{
    api::{
        self, CreateNode, Error, Gateway, ImageRef, ImageUpload, NodeId, UpdateNode, UserId, Vote,
        Voter,
    },
    Node, Snapshot, Storage, Tree, VoteOverlay,
};

/// Depth requested when a full subtree is needed (detail views and the
/// refetch after an image upload).
pub const DETAIL_DEPTH: u32 = 5;

/// The locally known authenticated user. Clearing the session turns every
/// mutation into a no-op.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Session {
    pub user: UserId,
    pub username: String,
}

impl Session {
    pub fn new(user: UserId, username: &str) -> Session {
        Session {
            user,
            username: username.to_string(),
        }
    }
}

struct State {
    tree: Tree,
    /// Ids created through this store during this session; thread views pin
    /// them above their cached ordering.
    fresh: im::HashSet<NodeId>,
    generation: u64,
    session: Option<Session>,
    /// Usernames seen in any payload so far. List payloads may omit the
    /// author relation; this cache keeps names from going blank.
    usernames: HashMap<UserId, String>,
}

struct Inner {
    gateway: Arc<dyn Gateway>,
    overlay: VoteOverlay,
    state: Mutex<State>,
    watch: watch::Sender<Snapshot>,
}

/// The canonical local cache of the article/comment tree.
///
/// Reads go through [`Snapshot`]s published on a watch channel; every
/// mutation happens synchronously under one lock and publishes a new
/// snapshot atomically, so consumers never observe a half-applied change.
///
/// Votes and deletes apply optimistically and roll the whole tree back on a
/// failed confirmation; creation waits for the server echo before inserting.
/// There is no per-request sequencing: responses reconcile in completion
/// order, a slow confirmation can overwrite newer local state, a response
/// for a meanwhile-deleted node falls on the floor, and nothing in flight is
/// cancelled by a local rollback or removal. Whatever resolves last wins.
#[derive(Clone)]
pub struct ContentStore {
    inner: Arc<Inner>,
}

impl ContentStore {
    pub fn new(gateway: Arc<dyn Gateway>, storage: Arc<dyn Storage>) -> ContentStore {
        let (tx, _) = watch::channel(Snapshot::default());
        ContentStore {
            inner: Arc::new(Inner {
                gateway,
                overlay: VoteOverlay::new(storage),
                state: Mutex::new(State {
                    tree: Tree::new(),
                    fresh: im::HashSet::new(),
                    generation: 0,
                    session: None,
                    usernames: HashMap::new(),
                }),
                watch: tx,
            }),
        }
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.state.lock().session.clone()
    }

    pub fn set_session(&self, session: Option<Session>) {
        let mut state = self.inner.state.lock();
        if let Some(session) = &session {
            state
                .usernames
                .insert(session.user, session.username.clone());
        }
        state.session = session;
    }

    /// The latest published snapshot. Its generation advances only when the
    /// tree actually changed.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.watch.borrow().clone()
    }

    /// A receiver that yields every published snapshot from now on.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.inner.watch.subscribe()
    }

    pub fn get(&self, id: &NodeId) -> Option<Arc<Node>> {
        self.inner.watch.borrow().get(id).cloned()
    }

    /// The session user's active vote on `id`, if any.
    pub fn my_vote(&self, id: &NodeId) -> Option<Vote> {
        let session = self.session()?;
        self.get(id)?.vote_of(&session.user)
    }

    pub fn can_edit(&self, node: &Node) -> bool {
        self.session().map_or(false, |s| s.user == node.owner)
    }

    pub fn can_delete(&self, node: &Node) -> bool {
        self.can_edit(node)
    }

    /// Top-level nodes whose title, content or author matches `query`
    /// case-insensitively. An empty query matches everything.
    pub fn roots_matching(&self, query: &str) -> Vec<Arc<Node>> {
        let needle = query.trim().to_lowercase();
        self.snapshot()
            .roots()
            .filter(|n| {
                needle.is_empty()
                    || n.title.to_lowercase().contains(&needle)
                    || n.content.to_lowercase().contains(&needle)
                    || n.owner_username.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }

    /// Refresh the shallow top-level listing.
    ///
    /// Previously known deeper data (children, images, reply counts) wins
    /// over an emptier fresh payload, so a background refresh cannot blank
    /// out a detail view someone is looking at. The listing carries no vote
    /// relations at all, so tallies and voter entries are kept as-is and an
    /// authoritative per-node count refresh is spawned fire-and-forget.
    pub async fn load(&self) -> Result<(), Error> {
        let listed = self.inner.gateway.list_roots().await?;
        let base = self.inner.gateway.image_base();
        let ids = self.mutate(|state| {
            let overlay = state
                .session
                .as_ref()
                .map(|s| (s.user, self.inner.overlay.map_for(&s.user)));
            let mut order = Vec::with_capacity(listed.len());
            for wire in listed {
                let wire_count = wire.child_count;
                let mut records = Vec::new();
                let id = normalize(&mut state.usernames, base.as_deref(), wire, None, &mut records);
                if let Some(existing) = state.tree.get(&id).cloned() {
                    let rec = &mut records[0];
                    if rec.children.is_empty() {
                        rec.children = existing.children.clone();
                    }
                    if wire_count.is_none() {
                        rec.child_count = existing.child_count;
                    }
                    if rec.images.is_empty() {
                        rec.images = existing.images.clone();
                    }
                    rec.voters = existing.voters.clone();
                    rec.upvotes = existing.upvotes;
                    rec.downvotes = existing.downvotes;
                }
                if let Some((user, map)) = &overlay {
                    for rec in &mut records {
                        map.apply_to(rec, user);
                    }
                }
                for rec in records {
                    state.tree.insert_record(rec);
                }
                order.push(id);
            }
            state.tree.set_roots(order.clone());
            order
        });
        self.spawn_count_refresh(ids);
        Ok(())
    }

    /// Fetch one node with children resolved `depth` levels down and merge
    /// it in. The server is authoritative for the subtree and images; the
    /// node's own tallies are kept until the count refresh lands so they do
    /// not flash from stale to zero to correct. An id we never saw becomes
    /// the first root, which makes deep links work before any listing.
    pub async fn load_detail(&self, id: NodeId, depth: u32) -> Result<(), Error> {
        let wire = self.inner.gateway.get_detail(id, depth).await?;
        let base = self.inner.gateway.image_base();
        self.mutate(|state| {
            let overlay = state
                .session
                .as_ref()
                .map(|s| (s.user, self.inner.overlay.map_for(&s.user)));
            let parent = state.tree.get(&id).and_then(|n| n.parent);
            let mut records = Vec::new();
            let id = normalize(
                &mut state.usernames,
                base.as_deref(),
                wire,
                parent,
                &mut records,
            );
            if let Some((user, map)) = &overlay {
                for rec in &mut records {
                    map.apply_to(rec, user);
                }
            }
            match state.tree.get(&id).cloned() {
                Some(existing) => {
                    let rec = &mut records[0];
                    rec.voters = existing.voters.clone();
                    rec.upvotes = existing.upvotes;
                    rec.downvotes = existing.downvotes;
                    for rec in records {
                        state.tree.insert_record(rec);
                    }
                    state.tree.prune_unreachable();
                }
                None => {
                    let root = records.remove(0);
                    for rec in records {
                        state.tree.insert_record(rec);
                    }
                    state.tree.insert_root(root);
                }
            }
        });
        self.spawn_count_refresh(vec![id]);
        Ok(())
    }

    /// Patch in authoritative tallies for each id. Failures are logged and
    /// swallowed: for a background refresh, stale counts beat an error
    /// state. Public so callers and tests can drive it deterministically.
    pub async fn refresh_vote_counts(&self, ids: Vec<NodeId>) {
        let mut seen = HashSet::new();
        let fetches = ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .map(|id| {
                let gateway = self.inner.gateway.clone();
                async move { (id, gateway.vote_counts(id).await) }
            })
            .collect::<Vec<_>>();
        for (id, result) in join_all(fetches).await {
            match result {
                Ok(counts) => {
                    self.mutate(|state| {
                        let unchanged = state.tree.get(&id).map_or(true, |n| {
                            n.upvotes == counts.upvote_count && n.downvotes == counts.downvote_count
                        });
                        if !unchanged {
                            state.tree.update(&id, |n| {
                                n.upvotes = counts.upvote_count;
                                n.downvotes = counts.downvote_count;
                            });
                        }
                    });
                }
                Err(err) => {
                    tracing::debug!(node = %id.0, %err, "skipping vote count refresh")
                }
            }
        }
    }

    /// Toggle the session user's vote on `id`: repeating the active
    /// direction un-votes, the other direction moves the vote over.
    ///
    /// The local effect is visible immediately; the server response then
    /// overwrites both tallies and the voter flag, and the outcome is
    /// persisted to the overlay. A failed confirmation restores the whole
    /// pre-vote tree. Without a session, or for an uncached id, this is
    /// `Ok(false)` and nothing is sent.
    pub async fn vote(&self, id: NodeId, direction: Vote) -> Result<bool, Error> {
        let Some(session) = self.session() else {
            tracing::debug!(node = %id.0, "ignoring vote without a session");
            return Ok(false);
        };
        let user = session.user;
        let Some(rollback) = self.mutate(|state| {
            if !state.tree.contains(&id) {
                tracing::warn!(node = %id.0, "refusing to vote on an uncached node");
                return None;
            }
            let rollback = (state.tree.clone(), state.fresh.clone());
            state.tree.update(&id, |n| n.toggle_vote(user, direction));
            Some(rollback)
        }) else {
            return Ok(false);
        };
        match self.inner.gateway.vote(id, direction).await {
            Ok(resp) => {
                let outcome = resp.voted.then_some(direction);
                self.mutate(|state| {
                    state.tree.update(&id, |n| {
                        n.upvotes = resp.upvote_count;
                        n.downvotes = resp.downvote_count;
                        n.set_vote(user, outcome);
                    });
                });
                self.inner.overlay.set(&user, id, outcome);
                Ok(true)
            }
            Err(err) => {
                tracing::warn!(node = %id.0, %err, "vote failed, rolling back");
                self.restore(rollback);
                Err(err)
            }
        }
    }

    /// Create a top-level article. Not optimistic: the node is inserted only
    /// once the server echoes it back, seeded with the session identity in
    /// case the echo left the author relation out, and tagged for pinning.
    /// Images upload afterwards; a failed upload keeps the text node.
    pub async fn create(
        &self,
        title: &str,
        content: &str,
        images: Vec<ImageUpload>,
    ) -> Result<Option<NodeId>, Error> {
        let Some(session) = self.session() else {
            tracing::debug!("ignoring create without a session");
            return Ok(None);
        };
        let req = CreateNode::root(title, content);
        if !self.acceptable(&req, &images) {
            return Ok(None);
        }
        let echo = self.inner.gateway.create(&req).await?;
        let base = self.inner.gateway.image_base();
        let id = self.mutate(|state| {
            let mut records = Vec::new();
            let id = normalize(&mut state.usernames, base.as_deref(), echo, None, &mut records);
            let mut root = records.remove(0);
            root.owner = session.user;
            root.owner_username = session.username.clone();
            for rec in records {
                state.tree.insert_record(rec);
            }
            state.tree.insert_root(root);
            state.fresh.insert(id);
            id
        });
        if !images.is_empty() {
            self.upload_and_refetch(id, images).await?;
        }
        Ok(Some(id))
    }

    /// Reply to `parent`. Same confirm-then-insert protocol as [`create`]
    /// (the reply's title derives from its content). A reply whose parent
    /// vanished locally while the request was in flight is dropped with a
    /// warning; the next refetch brings it back from the server.
    ///
    /// [`create`]: Self::create
    pub async fn reply(
        &self,
        parent: NodeId,
        content: &str,
        images: Vec<ImageUpload>,
    ) -> Result<Option<NodeId>, Error> {
        let Some(session) = self.session() else {
            tracing::debug!(parent = %parent.0, "ignoring reply without a session");
            return Ok(None);
        };
        let req = CreateNode::reply(parent, content);
        if !self.acceptable(&req, &images) {
            return Ok(None);
        }
        let echo = self.inner.gateway.create(&req).await?;
        let base = self.inner.gateway.image_base();
        let id = self.mutate(|state| {
            let mut records = Vec::new();
            let id = normalize(
                &mut state.usernames,
                base.as_deref(),
                echo,
                Some(parent),
                &mut records,
            );
            let mut reply = records.remove(0);
            reply.owner = session.user;
            reply.owner_username = session.username.clone();
            if !state.tree.contains(&parent) {
                tracing::warn!(reply = %id.0, parent = %parent.0, "parent of confirmed reply is gone locally, dropping it");
                return id;
            }
            for rec in records {
                state.tree.insert_record(rec);
            }
            state.tree.attach_child(&parent, reply);
            let now = Utc::now();
            state.tree.update(&parent, |p| p.updated_at = now);
            state.fresh.insert(id);
            id
        });
        if !images.is_empty() {
            self.upload_and_refetch(id, images).await?;
        }
        Ok(Some(id))
    }

    /// Server-confirmed edit of the session user's own node. Not
    /// optimistic: the echo's title, content and timestamp replace the
    /// record's. Fails closed with `Ok(false)` for foreign or unknown nodes
    /// and for empty content.
    pub async fn update_node(
        &self,
        id: NodeId,
        title: Option<String>,
        content: Option<String>,
    ) -> Result<bool, Error> {
        let Some(session) = self.session() else {
            tracing::debug!(node = %id.0, "ignoring edit without a session");
            return Ok(false);
        };
        match self.get(&id) {
            None => {
                tracing::warn!(node = %id.0, "refusing to edit an uncached node");
                return Ok(false);
            }
            Some(node) if node.owner != session.user => {
                tracing::warn!(node = %id.0, "refusing to edit a foreign node");
                return Ok(false);
            }
            Some(_) => (),
        }
        let req = UpdateNode { title, content };
        if let Err(err) = req.validate() {
            tracing::debug!(node = %id.0, %err, "rejecting edit before dispatch");
            return Ok(false);
        }
        let echo = self.inner.gateway.update(id, &req).await?;
        let base = self.inner.gateway.image_base();
        self.mutate(|state| {
            let mut records = Vec::new();
            normalize(&mut state.usernames, base.as_deref(), echo, None, &mut records);
            let fresh = records.swap_remove(0);
            state.tree.update(&id, |n| {
                n.title = fresh.title;
                n.content = fresh.content;
                n.updated_at = fresh.updated_at;
            });
        });
        Ok(true)
    }

    /// Remove the session user's own node and everything under it,
    /// immediately, then confirm with the server. A failed confirmation
    /// restores the whole subtree. Fails closed with `Ok(false)` for
    /// foreign or unknown nodes.
    pub async fn delete(&self, id: NodeId) -> Result<bool, Error> {
        let Some(session) = self.session() else {
            tracing::debug!(node = %id.0, "ignoring delete without a session");
            return Ok(false);
        };
        let Some(rollback) = self.mutate(|state| {
            match state.tree.get(&id) {
                None => {
                    tracing::warn!(node = %id.0, "refusing to delete an uncached node");
                    return None;
                }
                Some(node) if node.owner != session.user => {
                    tracing::warn!(node = %id.0, "refusing to delete a foreign node");
                    return None;
                }
                Some(_) => (),
            }
            let rollback = (state.tree.clone(), state.fresh.clone());
            state.tree.remove(&id);
            Some(rollback)
        }) else {
            return Ok(false);
        };
        match self.inner.gateway.delete(id).await {
            // the local removal already matches the server state
            Ok(()) => Ok(true),
            Err(err) => {
                tracing::warn!(node = %id.0, %err, "delete failed, rolling back");
                self.restore(rollback);
                Err(err)
            }
        }
    }

    /// Content and image validation, before anything touches the network.
    fn acceptable(&self, req: &CreateNode, images: &[ImageUpload]) -> bool {
        if let Err(err) = req.validate() {
            tracing::debug!(%err, "rejecting payload before dispatch");
            return false;
        }
        for image in images {
            if let Err(err) = image.validate() {
                tracing::debug!(%err, "rejecting image before dispatch");
                return false;
            }
        }
        true
    }

    async fn upload_and_refetch(&self, id: NodeId, images: Vec<ImageUpload>) -> Result<(), Error> {
        if let Err(err) = self.inner.gateway.upload_images(id, images).await {
            tracing::warn!(node = %id.0, %err, "image upload failed, keeping the text node");
            return Err(err);
        }
        // refetch the whole owning thread so resolved URLs land everywhere
        let root = self
            .inner
            .watch
            .borrow()
            .tree()
            .root_of(&id)
            .unwrap_or(id);
        if let Err(err) = self.load_detail(root, DETAIL_DEPTH).await {
            tracing::warn!(node = %root.0, %err, "could not refetch after image upload");
        }
        Ok(())
    }

    /// Run `f` under the state lock and publish a new snapshot if the tree
    /// or the session-created set actually changed.
    fn mutate<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.inner.state.lock();
        let tree_before = state.tree.clone();
        let fresh_before = state.fresh.clone();
        let out = f(&mut state);
        if !state.tree.ptr_eq(&tree_before) || !state.fresh.ptr_eq(&fresh_before) {
            state.generation += 1;
            let snap = Snapshot::new(state.generation, state.tree.clone(), state.fresh.clone());
            self.inner.watch.send_replace(snap);
        }
        out
    }

    fn restore(&self, (tree, fresh): (Tree, im::HashSet<NodeId>)) {
        self.mutate(|state| {
            state.tree = tree;
            state.fresh = fresh;
        });
    }

    fn spawn_count_refresh(&self, ids: Vec<NodeId>) {
        let store = self.clone();
        tokio::spawn(async move { store.refresh_vote_counts(ids).await });
    }
}

/// Turn one wire subtree into arena records, parent before children, the
/// requested node first. Returns its id.
fn normalize(
    usernames: &mut HashMap<UserId, String>,
    base: Option<&str>,
    wire: api::Node,
    parent: Option<NodeId>,
    out: &mut Vec<Node>,
) -> NodeId {
    let id = wire.id;
    let owner = wire.author_id.or_else(|| wire.author.as_ref().map(|a| a.id));
    if let (Some(owner), Some(name)) = (
        owner,
        wire.author.as_ref().and_then(|a| a.username.as_deref()),
    ) {
        usernames.insert(owner, name.to_string());
    }
    let owner = owner.unwrap_or_else(UserId::stub);
    let owner_username = usernames
        .get(&owner)
        .cloned()
        .unwrap_or_else(|| owner.0.to_string());

    let mut voters = Vec::with_capacity(wire.upvoters.len() + wire.downvoters.len());
    for (users, vote) in [
        (&wire.upvoters, Vote::Upvote),
        (&wire.downvoters, Vote::Downvote),
    ] {
        for user in users {
            if let Some(name) = &user.username {
                usernames.insert(user.id, name.clone());
            }
            // a malformed payload could list someone on both sides
            if !voters.iter().any(|v: &Voter| v.voter_id == user.id) {
                voters.push(Voter {
                    voter_id: user.id,
                    vote,
                });
            }
        }
    }
    let upvotes = wire.upvoters.len() as u32;
    let downvotes = wire.downvoters.len() as u32;

    let images: Vec<String> = wire
        .images
        .iter()
        .map(|img| resolve_image(img, base))
        .filter(|url| !url.is_empty())
        .collect();

    let mut nested = Vec::new();
    let children: Vec<NodeId> = wire
        .children
        .into_iter()
        .map(|child| normalize(usernames, base, child, Some(id), &mut nested))
        .collect();
    let child_count = wire.child_count.unwrap_or(children.len() as u32);

    let now = Utc::now();
    out.push(Node {
        id,
        parent,
        title: wire.title,
        content: wire.content,
        images,
        owner,
        owner_username,
        upvotes,
        downvotes,
        voters,
        children,
        child_count,
        created_at: wire.created_at.unwrap_or(now),
        updated_at: wire.updated_at.unwrap_or(now),
    });
    out.append(&mut nested);
    id
}

/// Resolve a wire image reference into a displayable URL.
///
/// The backend stores files under dated `uploads/images/YYYY/MM/DD/`
/// directories but older rows carry a path without the date segments; those
/// are reconstructed from the upload date and filename.
fn resolve_image(img: &ImageRef, base: Option<&str>) -> String {
    let path = match img {
        ImageRef::Url(url) => url.trim().to_string(),
        ImageRef::Record {
            path,
            filename,
            created_at,
        } => {
            let raw = path.as_deref().unwrap_or("").trim().replace('\\', "/");
            let filename = filename
                .as_deref()
                .or_else(|| raw.rsplit('/').next())
                .unwrap_or("")
                .trim();
            let dated = match created_at {
                Some(at) if !filename.is_empty() => {
                    Some(format!("uploads/images/{}/{filename}", at.format("%Y/%m/%d")))
                }
                _ => None,
            };
            if has_dated_segments(&raw) {
                raw
            } else if let Some(dated) = dated {
                dated
            } else if !raw.is_empty() {
                raw
            } else {
                filename.to_string()
            }
        }
    };
    normalize_image_url(&path, base)
}

fn has_dated_segments(path: &str) -> bool {
    const MARKER: &str = "uploads/images/";
    let Some(at) = path.find(MARKER) else {
        return false;
    };
    let rest = path[at + MARKER.len()..].as_bytes();
    rest.len() >= 11
        && rest[..4].iter().all(|c| c.is_ascii_digit())
        && rest[4] == b'/'
        && rest[5..7].iter().all(|c| c.is_ascii_digit())
        && rest[7] == b'/'
        && rest[8..10].iter().all(|c| c.is_ascii_digit())
        && rest[10] == b'/'
}

fn normalize_image_url(url: &str, base: Option<&str>) -> String {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with("http://")
        || trimmed.starts_with("https://")
        || trimmed.starts_with("data:")
    {
        return trimmed.to_string();
    }
    // some rows hold raw base64 without the data: prefix; sniff the format
    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() > 100
        && compact
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=')
    {
        if compact.starts_with("/9j/") {
            return format!("data:image/jpeg;base64,{compact}");
        }
        return format!("data:image/png;base64,{compact}");
    }
    match base {
        Some(base) => {
            let base = base.trim_end_matches('/');
            match trimmed.starts_with('/') {
                true => format!("{base}{trimmed}"),
                false => format!("{base}/{trimmed}"),
            }
        }
        None => trimmed.to_string(),
    }
}
