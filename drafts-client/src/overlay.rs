use std::{collections::HashMap, fs, path::PathBuf, sync::Arc};

use parking_lot::Mutex;

use crate::{
    api::{NodeId, UserId, Vote},
    Node,
};

/// Smallest storage surface the vote overlay needs. Implementations are
/// best-effort: they swallow their own IO problems and answer `None`
/// instead of failing.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Process-local storage, mostly useful in tests.
#[derive(Default)]
pub struct MemoryStorage(Mutex<HashMap<String, String>>);

impl MemoryStorage {
    pub fn new() -> MemoryStorage {
        MemoryStorage::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.0.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.0.lock().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.0.lock().remove(key);
    }
}

/// One file per key under a directory. Keys are sanitized into file names,
/// so arbitrary key strings cannot escape the directory.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> FileStorage {
        let dir = dir.into();
        if let Err(err) = fs::create_dir_all(&dir) {
            tracing::debug!(dir = %dir.display(), %err, "could not prepare storage directory");
        }
        FileStorage { dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(safe)
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.path_for(key)).ok()
    }

    fn set(&self, key: &str, value: &str) {
        let path = self.path_for(key);
        if let Err(err) = fs::write(&path, value) {
            tracing::debug!(path = %path.display(), %err, "could not persist storage entry");
        }
    }

    fn remove(&self, key: &str) {
        let _ = fs::remove_file(self.path_for(key));
    }
}

/// One user's parsed overlay: node id to active vote direction.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct VoteMap(HashMap<NodeId, Vote>);

impl VoteMap {
    pub fn get(&self, node: &NodeId) -> Option<Vote> {
        self.0.get(node).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn set(&mut self, node: NodeId, vote: Option<Vote>) {
        match vote {
            Some(vote) => {
                self.0.insert(node, vote);
            }
            None => {
                self.0.remove(&node);
            }
        }
    }

    /// Fill in the user's voter entry when the node does not already carry
    /// one. Tallies are left alone: the overlay remembers directions, not
    /// counts.
    pub fn apply_to(&self, node: &mut Node, user: &UserId) {
        if node.vote_of(user).is_some() {
            return;
        }
        if let Some(vote) = self.get(&node.id) {
            node.set_vote(*user, Some(vote));
        }
    }
}

/// Persisted memory of each user's own confirmed votes.
///
/// The bulk listing endpoint leaves per-user vote relations out, so without
/// this overlay every reload would show "no vote" everywhere until a full
/// detail fetch. One record per user; an unreadable record reads as empty.
#[derive(Clone)]
pub struct VoteOverlay {
    storage: Arc<dyn Storage>,
}

impl VoteOverlay {
    pub fn new(storage: Arc<dyn Storage>) -> VoteOverlay {
        VoteOverlay { storage }
    }

    fn key(user: &UserId) -> String {
        format!("drafts.node-votes.{}", user.0)
    }

    pub fn map_for(&self, user: &UserId) -> VoteMap {
        let Some(raw) = self.storage.get(&Self::key(user)) else {
            return VoteMap::default();
        };
        match serde_json::from_str(&raw) {
            Ok(map) => map,
            Err(err) => {
                tracing::debug!(user = %user.0, %err, "dropping unreadable vote overlay");
                VoteMap::default()
            }
        }
    }

    pub fn get(&self, user: &UserId, node: &NodeId) -> Option<Vote> {
        self.map_for(user).get(node)
    }

    /// Single-node convenience over [`map_for`](Self::map_for) +
    /// [`VoteMap::apply_to`]; prefer the map for whole-tree passes.
    pub fn apply_to(&self, node: &mut Node, user: &UserId) {
        self.map_for(user).apply_to(node, user);
    }

    /// Record the user's confirmed vote; `None` erases the entry.
    pub fn set(&self, user: &UserId, node: NodeId, vote: Option<Vote>) {
        let mut map = self.map_for(user);
        map.set(node, vote);
        match serde_json::to_string(&map) {
            Ok(raw) => self.storage.set(&Self::key(user), &raw),
            Err(err) => {
                tracing::debug!(user = %user.0, %err, "could not serialize vote overlay")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::api::Uuid;

    use super::*;

    fn user(n: u128) -> UserId {
        UserId(Uuid::from_u128(n))
    }

    fn node(n: u128) -> NodeId {
        NodeId(Uuid::from_u128(n))
    }

    #[test]
    fn remembers_votes_per_user() {
        let overlay = VoteOverlay::new(Arc::new(MemoryStorage::new()));
        overlay.set(&user(1), node(10), Some(Vote::Upvote));
        overlay.set(&user(2), node(10), Some(Vote::Downvote));

        assert_eq!(overlay.get(&user(1), &node(10)), Some(Vote::Upvote));
        assert_eq!(overlay.get(&user(2), &node(10)), Some(Vote::Downvote));
        assert_eq!(overlay.get(&user(1), &node(11)), None);
    }

    #[test]
    fn clearing_erases_the_entry() {
        let storage = Arc::new(MemoryStorage::new());
        let overlay = VoteOverlay::new(storage);
        overlay.set(&user(1), node(10), Some(Vote::Upvote));
        overlay.set(&user(1), node(11), Some(Vote::Downvote));
        overlay.set(&user(1), node(10), None);

        assert_eq!(overlay.get(&user(1), &node(10)), None);
        assert_eq!(overlay.get(&user(1), &node(11)), Some(Vote::Downvote));
        let map = overlay.map_for(&user(1));
        assert!(!map.is_empty());
        assert_eq!(map.get(&node(10)), None);
    }

    #[test]
    fn corrupted_records_read_as_empty() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set(
            &format!("drafts.node-votes.{}", user(1).0),
            "definitely not json",
        );
        let overlay = VoteOverlay::new(storage);
        assert!(overlay.map_for(&user(1)).is_empty());

        // writing over the corruption works and reads back
        overlay.set(&user(1), node(10), Some(Vote::Upvote));
        assert_eq!(overlay.get(&user(1), &node(10)), Some(Vote::Upvote));
    }

    #[test]
    fn apply_to_defers_to_payload_entries() {
        use chrono::Utc;

        let overlay = VoteOverlay::new(Arc::new(MemoryStorage::new()));
        overlay.set(&user(1), node(10), Some(Vote::Upvote));
        let map = overlay.map_for(&user(1));

        let mut n = Node {
            id: node(10),
            parent: None,
            title: String::new(),
            content: String::new(),
            images: Vec::new(),
            owner: UserId::stub(),
            owner_username: String::new(),
            upvotes: 0,
            downvotes: 1,
            voters: Vec::new(),
            children: Vec::new(),
            child_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        n.set_vote(user(1), Some(Vote::Downvote));

        // the payload already says downvote; the overlay must not override
        map.apply_to(&mut n, &user(1));
        assert_eq!(n.vote_of(&user(1)), Some(Vote::Downvote));

        // on a bare copy the overlay fills the gap, without touching tallies
        n.set_vote(user(1), None);
        overlay.apply_to(&mut n, &user(1));
        assert_eq!(n.vote_of(&user(1)), Some(Vote::Upvote));
        assert_eq!((n.upvotes, n.downvotes), (0, 1));
    }

    #[test]
    fn file_storage_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());

        assert_eq!(storage.get("drafts.node-votes.abc"), None);
        storage.set("drafts.node-votes.abc", r#"{"x":"upvote"}"#);
        assert_eq!(
            storage.get("drafts.node-votes.abc").as_deref(),
            Some(r#"{"x":"upvote"}"#)
        );

        // keys with path separators stay inside the directory
        storage.set("../escape/attempt", "nope");
        assert_eq!(storage.get("../escape/attempt").as_deref(), Some("nope"));
        assert!(!dir.path().parent().unwrap().join("escape").exists());

        storage.remove("drafts.node-votes.abc");
        assert_eq!(storage.get("drafts.node-votes.abc"), None);
    }
}
