use async_trait::async_trait;

use crate::{
    CreateNode, Error, ImageUpload, Node, NodeId, UpdateNode, Vote, VoteCounts, VoteResponse,
};

/// The backend surface the data layer runs against.
///
/// Implementations are long-lived and shared; methods take `&self` so a
/// single instance can serve any number of concurrent in-flight requests.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Shallow top-level listing. Voter relations are absent and children
    /// may or may not be included.
    async fn list_roots(&self) -> Result<Vec<Node>, Error>;

    /// One node with children nested up to `depth` levels below it.
    async fn get_detail(&self, id: NodeId, depth: u32) -> Result<Node, Error>;

    /// Create a node; the echo carries the authoritative id and timestamps.
    async fn create(&self, req: &CreateNode) -> Result<Node, Error>;

    /// Patch title and/or content; the echo is the node after the edit.
    async fn update(&self, id: NodeId, req: &UpdateNode) -> Result<Node, Error>;

    async fn upload_images(&self, id: NodeId, images: Vec<ImageUpload>) -> Result<(), Error>;

    /// Toggle the calling user's vote in `direction`.
    async fn vote(&self, id: NodeId, direction: Vote) -> Result<VoteResponse, Error>;

    async fn delete(&self, id: NodeId) -> Result<(), Error>;

    /// Tallies only; meant for cheap reconciliation after shallow loads.
    async fn vote_counts(&self, id: NodeId) -> Result<VoteCounts, Error>;

    /// Base URL that relative image paths in payloads resolve against.
    fn image_base(&self) -> Option<String> {
        None
    }
}
