use crate::api::{NodeId, Time, UserId, Vote, Voter};

/// One article or comment in the local cache, fully normalized.
///
/// Records live in the owning [`Tree`](crate::Tree)'s arena; `parent` and
/// `children` are id links into it, so nothing here is recursive and a
/// record clones in O(number of children).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub title: String,
    pub content: String,
    /// Resolved image URLs in display order.
    pub images: Vec<String>,
    pub owner: UserId,
    pub owner_username: String,
    pub upvotes: u32,
    pub downvotes: u32,
    /// At most one entry per user.
    pub voters: Vec<Voter>,
    /// Ordered child ids.
    pub children: Vec<NodeId>,
    /// Reply count as last reported by the server, adjusted locally when
    /// replies are created or deleted. Can exceed `children.len()` while
    /// deeper levels are not loaded yet.
    pub child_count: u32,
    pub created_at: Time,
    pub updated_at: Time,
}

impl Node {
    /// Upvotes minus downvotes.
    pub fn score(&self) -> i64 {
        i64::from(self.upvotes) - i64::from(self.downvotes)
    }

    /// The user's active vote on this node, if any.
    pub fn vote_of(&self, user: &UserId) -> Option<Vote> {
        self.voters
            .iter()
            .find(|v| v.voter_id == *user)
            .map(|v| v.vote)
    }

    /// Replace the user's voter entry; `None` removes it.
    pub fn set_vote(&mut self, user: UserId, vote: Option<Vote>) {
        self.voters.retain(|v| v.voter_id != user);
        if let Some(vote) = vote {
            self.voters.push(Voter {
                voter_id: user,
                vote,
            });
        }
    }

    /// Toggle the user's vote in `direction`, moving both tallies the way
    /// the backend will: repeating the active direction clears the vote,
    /// the other direction moves it over. Tallies never go below zero even
    /// when they started out inconsistent with the voter list.
    pub fn toggle_vote(&mut self, user: UserId, direction: Vote) {
        let previous = self.vote_of(&user);
        if previous == Some(direction) {
            self.decrement(direction);
            self.set_vote(user, None);
        } else {
            if previous.is_some() {
                self.decrement(direction.opposite());
            }
            *self.tally_mut(direction) += 1;
            self.set_vote(user, Some(direction));
        }
    }

    pub fn tally(&self, direction: Vote) -> u32 {
        match direction {
            Vote::Upvote => self.upvotes,
            Vote::Downvote => self.downvotes,
        }
    }

    fn tally_mut(&mut self, direction: Vote) -> &mut u32 {
        match direction {
            Vote::Upvote => &mut self.upvotes,
            Vote::Downvote => &mut self.downvotes,
        }
    }

    fn decrement(&mut self, direction: Vote) {
        let tally = self.tally_mut(direction);
        *tally = tally.saturating_sub(1);
    }
}
