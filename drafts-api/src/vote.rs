use crate::UserId;

/// Direction of an active vote. "No vote" is represented as `None` wherever
/// per-user vote state appears, never as a third variant.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Upvote,
    Downvote,
}

impl Vote {
    pub fn opposite(self) -> Vote {
        match self {
            Vote::Upvote => Vote::Downvote,
            Vote::Downvote => Vote::Upvote,
        }
    }
}

/// One user's active vote on one node. A voter list never carries two
/// entries for the same user.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Voter {
    pub voter_id: UserId,
    pub vote: Vote,
}

/// Body of a vote request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct VoteRequest {
    pub direction: Vote,
}

/// Authoritative outcome of a vote request: whether the caller's vote in the
/// requested direction is active afterwards, plus both tallies.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub voted: bool,
    pub upvote_count: u32,
    pub downvote_count: u32,
}

/// Tallies alone, as served by the per-node votes endpoint.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteCounts {
    pub upvote_count: u32,
    pub downvote_count: u32,
}
