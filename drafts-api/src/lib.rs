mod error;
pub use error::Error;

mod gateway;
pub use gateway::Gateway;

mod node;
pub use node::{CreateNode, ImageRef, ImageUpload, Node, NodeId, UpdateNode, MAX_IMAGE_BYTES};

mod user;
pub use user::{User, UserId};

mod vote;
pub use vote::{Vote, VoteCounts, VoteRequest, VoteResponse, Voter};

pub use uuid::{uuid, Uuid};
pub type Time = chrono::DateTime<chrono::Utc>;

pub const STUB_UUID: Uuid = uuid!("ffffffff-ffff-ffff-ffff-ffffffffffff");
