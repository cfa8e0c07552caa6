use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use drafts_api::{
    CreateNode, Error, Gateway, ImageRef, ImageUpload, Node, NodeId, Time, UpdateNode, User,
    Vote, VoteCounts, VoteResponse,
};

/// Which gateway call an injected failure should hit.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Call {
    ListRoots,
    GetDetail,
    Create,
    Update,
    UploadImages,
    Vote,
    Delete,
    VoteCounts,
}

/// In-memory stand-in for the backend, acting as one authenticated user.
///
/// It reproduces the payload quirks the data layer has to cope with: the
/// top-level listing is shallow and carries no voter relations, a detail
/// root does not include its own relations while its nested children do,
/// and creation echoes leave the author record unresolved.
pub struct MockServer {
    user: User,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<NodeId, MockNode>,
    roots: Vec<NodeId>,
    fail_next: HashSet<Call>,
}

#[derive(Clone, Debug)]
struct MockNode {
    id: NodeId,
    parent: Option<NodeId>,
    title: String,
    content: String,
    author: User,
    images: Vec<ImageRef>,
    upvoters: Vec<User>,
    downvoters: Vec<User>,
    children: Vec<NodeId>,
    created_at: Time,
    updated_at: Time,
}

impl MockNode {
    fn voters(&self, direction: Vote) -> &Vec<User> {
        match direction {
            Vote::Upvote => &self.upvoters,
            Vote::Downvote => &self.downvoters,
        }
    }

    fn voters_mut(&mut self, direction: Vote) -> &mut Vec<User> {
        match direction {
            Vote::Upvote => &mut self.upvoters,
            Vote::Downvote => &mut self.downvoters,
        }
    }
}

impl Inner {
    fn check(&mut self, call: Call) -> Result<(), Error> {
        if self.fail_next.remove(&call) {
            return Err(Error::Network(format!("injected failure on {call:?}")));
        }
        Ok(())
    }

    fn wire(&self, id: NodeId, depth: u32, relations: bool) -> Option<Node> {
        let node = self.nodes.get(&id)?;
        let children = if depth == 0 {
            Vec::new()
        } else {
            node.children
                .iter()
                .filter_map(|c| self.wire(*c, depth - 1, true))
                .collect()
        };
        Some(Node {
            id: node.id,
            parent_id: node.parent,
            title: node.title.clone(),
            content: node.content.clone(),
            author_id: Some(node.author.id),
            author: Some(node.author.clone()),
            images: node.images.clone(),
            upvoters: if relations {
                node.upvoters.clone()
            } else {
                Vec::new()
            },
            downvoters: if relations {
                node.downvoters.clone()
            } else {
                Vec::new()
            },
            children,
            child_count: Some(node.children.len() as u32),
            created_at: Some(node.created_at),
            updated_at: Some(node.updated_at),
        })
    }
}

impl MockServer {
    pub fn new(user: User) -> MockServer {
        MockServer {
            user,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// The user all authenticated calls act as.
    pub fn current_user(&self) -> &User {
        &self.user
    }

    /// Make the next occurrence of `call` fail with a network error.
    pub fn test_fail_next(&self, call: Call) {
        self.inner.lock().fail_next.insert(call);
    }

    /// Insert a node directly, bypassing the creation endpoint. Seeded roots
    /// keep insertion order; replies are appended to their parent.
    pub fn test_seed_node(
        &self,
        parent: Option<NodeId>,
        author: &User,
        title: &str,
        content: &str,
    ) -> NodeId {
        let mut inner = self.inner.lock();
        let id = NodeId(Uuid::new_v4());
        let now = Utc::now();
        inner.nodes.insert(
            id,
            MockNode {
                id,
                parent,
                title: title.to_string(),
                content: content.to_string(),
                author: author.clone(),
                images: Vec::new(),
                upvoters: Vec::new(),
                downvoters: Vec::new(),
                children: Vec::new(),
                created_at: now,
                updated_at: now,
            },
        );
        match parent {
            Some(parent) => {
                let parent = inner
                    .nodes
                    .get_mut(&parent)
                    .unwrap_or_else(|| panic!("seeding under unknown parent {parent:?}"));
                parent.children.push(id);
            }
            None => inner.roots.push(id),
        }
        id
    }

    /// Attach an image record directly, as if it had been uploaded earlier.
    pub fn test_seed_image(&self, id: NodeId, path: &str) {
        let mut inner = self.inner.lock();
        let node = inner
            .nodes
            .get_mut(&id)
            .unwrap_or_else(|| panic!("seeding image on unknown node {id:?}"));
        node.images.push(ImageRef::Url(path.to_string()));
    }

    /// Record a pre-existing vote by any user. Overwrites that user's
    /// previous vote if there was one.
    pub fn test_seed_vote(&self, id: NodeId, user: &User, direction: Vote) {
        let mut inner = self.inner.lock();
        let node = inner
            .nodes
            .get_mut(&id)
            .unwrap_or_else(|| panic!("seeding vote on unknown node {id:?}"));
        node.upvoters.retain(|u| u.id != user.id);
        node.downvoters.retain(|u| u.id != user.id);
        node.voters_mut(direction).push(user.clone());
    }

    pub fn test_contains(&self, id: NodeId) -> bool {
        self.inner.lock().nodes.contains_key(&id)
    }

    pub fn test_num_nodes(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    /// Current (upvotes, downvotes) of a node.
    pub fn test_counts(&self, id: NodeId) -> (u32, u32) {
        let inner = self.inner.lock();
        let node = inner
            .nodes
            .get(&id)
            .unwrap_or_else(|| panic!("counting votes on unknown node {id:?}"));
        (node.upvoters.len() as u32, node.downvoters.len() as u32)
    }

    pub fn test_child_ids(&self, id: NodeId) -> Vec<NodeId> {
        let inner = self.inner.lock();
        inner
            .nodes
            .get(&id)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Gateway for MockServer {
    async fn list_roots(&self) -> Result<Vec<Node>, Error> {
        let mut inner = self.inner.lock();
        inner.check(Call::ListRoots)?;
        Ok(inner
            .roots
            .iter()
            .filter_map(|id| inner.wire(*id, 0, false))
            .collect())
    }

    async fn get_detail(&self, id: NodeId, depth: u32) -> Result<Node, Error> {
        let mut inner = self.inner.lock();
        inner.check(Call::GetDetail)?;
        // like the real backend: the root's own relations are not included,
        // only the nested children carry theirs
        inner.wire(id, depth, false).ok_or(Error::NotFound(id.0))
    }

    async fn create(&self, req: &CreateNode) -> Result<Node, Error> {
        req.validate()?;
        let mut inner = self.inner.lock();
        inner.check(Call::Create)?;
        if let Some(parent) = req.parent_id {
            if !inner.nodes.contains_key(&parent) {
                return Err(Error::NotFound(parent.0));
            }
        }
        let id = NodeId(Uuid::new_v4());
        let now = Utc::now();
        inner.nodes.insert(
            id,
            MockNode {
                id,
                parent: req.parent_id,
                title: req.title.clone(),
                content: req.content.clone(),
                author: self.user.clone(),
                images: Vec::new(),
                upvoters: Vec::new(),
                downvoters: Vec::new(),
                children: Vec::new(),
                created_at: now,
                updated_at: now,
            },
        );
        match req.parent_id {
            Some(parent) => {
                if let Some(parent) = inner.nodes.get_mut(&parent) {
                    parent.children.push(id);
                }
            }
            // newest articles list first
            None => inner.roots.insert(0, id),
        }
        let mut echo = inner.wire(id, 0, true).ok_or(Error::NotFound(id.0))?;
        // the creation echo ships authorId but no resolved author record
        echo.author = None;
        Ok(echo)
    }

    async fn update(&self, id: NodeId, req: &UpdateNode) -> Result<Node, Error> {
        req.validate()?;
        let mut inner = self.inner.lock();
        inner.check(Call::Update)?;
        let user = self.user.id;
        let node = inner.nodes.get_mut(&id).ok_or(Error::NotFound(id.0))?;
        if node.author.id != user {
            return Err(Error::PermissionDenied);
        }
        if let Some(title) = &req.title {
            node.title = title.clone();
        }
        if let Some(content) = &req.content {
            node.content = content.clone();
        }
        node.updated_at = Utc::now();
        inner.wire(id, 0, true).ok_or(Error::NotFound(id.0))
    }

    async fn upload_images(&self, id: NodeId, images: Vec<ImageUpload>) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.check(Call::UploadImages)?;
        let now = Utc::now();
        let node = inner.nodes.get_mut(&id).ok_or(Error::NotFound(id.0))?;
        for image in images {
            image.validate()?;
            node.images.push(ImageRef::Record {
                path: Some(format!(
                    "uploads/images/{}/{}",
                    now.format("%Y/%m/%d"),
                    image.filename
                )),
                filename: Some(image.filename),
                created_at: Some(now),
            });
            node.updated_at = now;
        }
        Ok(())
    }

    async fn vote(&self, id: NodeId, direction: Vote) -> Result<VoteResponse, Error> {
        let mut inner = self.inner.lock();
        inner.check(Call::Vote)?;
        let user = self.user.clone();
        let node = inner.nodes.get_mut(&id).ok_or(Error::NotFound(id.0))?;
        let had = node.voters(direction).iter().any(|u| u.id == user.id);
        node.upvoters.retain(|u| u.id != user.id);
        node.downvoters.retain(|u| u.id != user.id);
        if !had {
            node.voters_mut(direction).push(user);
        }
        Ok(VoteResponse {
            voted: !had,
            upvote_count: node.upvoters.len() as u32,
            downvote_count: node.downvoters.len() as u32,
        })
    }

    async fn delete(&self, id: NodeId) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.check(Call::Delete)?;
        let Some(node) = inner.nodes.get(&id) else {
            // deleting an already-gone node is fine
            return Ok(());
        };
        if node.author.id != self.user.id {
            return Err(Error::PermissionDenied);
        }
        let parent = node.parent;
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(gone) = inner.nodes.remove(&next) {
                stack.extend(gone.children);
            }
        }
        match parent {
            Some(parent) => {
                if let Some(parent) = inner.nodes.get_mut(&parent) {
                    parent.children.retain(|c| *c != id);
                }
            }
            None => inner.roots.retain(|r| *r != id),
        }
        Ok(())
    }

    async fn vote_counts(&self, id: NodeId) -> Result<VoteCounts, Error> {
        let mut inner = self.inner.lock();
        inner.check(Call::VoteCounts)?;
        let node = inner.nodes.get(&id).ok_or(Error::NotFound(id.0))?;
        Ok(VoteCounts {
            upvote_count: node.upvoters.len() as u32,
            downvote_count: node.downvoters.len() as u32,
        })
    }
}
