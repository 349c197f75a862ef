//! Friends, incoming requests and the add-friend workflow.

use std::sync::Arc;

use shared::domain::{FriendEdge, FriendEdgeId, User, UserId};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    error::{ClientError, ClientResult},
    transport::ChatBackend,
};

pub const DEFAULT_PROPOSE_CONFIRMATION: &str = "Friend request sent";

#[derive(Debug, Default)]
struct RosterState {
    accepted: Vec<User>,
    pending: Vec<FriendEdge>,
    candidates: Vec<User>,
    add_friend_active: bool,
}

pub struct RosterManager {
    backend: Arc<dyn ChatBackend>,
    state: Mutex<RosterState>,
}

impl RosterManager {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            state: Mutex::new(RosterState::default()),
        }
    }

    /// "Not found" is an empty roster; other failures leave the current list intact.
    pub async fn list_accepted_friends(&self, user_id: UserId) -> ClientResult<Vec<User>> {
        let friends = match self.backend.accepted_friends(user_id).await {
            Ok(friends) => friends,
            Err(err) if err.is_not_found() => Vec::new(),
            Err(err) => {
                warn!(user_id = user_id.0, "roster: failed to list friends: {err}");
                return Err(err);
            }
        };
        debug!(user_id = user_id.0, count = friends.len(), "roster: friends listed");
        self.state.lock().await.accepted = friends.clone();
        Ok(friends)
    }

    /// Requests are optional UI; any failure reads as "no requests".
    pub async fn list_acceptable_requests(&self, user_id: UserId) -> Vec<FriendEdge> {
        let requests = match self.backend.acceptable_requests(user_id).await {
            Ok(requests) => requests
                .into_iter()
                .filter(|edge| edge.is_acceptable_by(user_id))
                .collect(),
            Err(err) => {
                debug!(user_id = user_id.0, "roster: no acceptable requests: {err}");
                Vec::new()
            }
        };
        self.state.lock().await.pending = requests.clone();
        requests
    }

    /// Starts the add-friend workflow and loads non-friend candidates for it.
    pub async fn open_add_friend(&self, user_id: UserId) -> Vec<User> {
        self.state.lock().await.add_friend_active = true;
        self.list_candidates(user_id).await
    }

    pub async fn close_add_friend(&self) {
        let mut state = self.state.lock().await;
        state.add_friend_active = false;
        state.candidates.clear();
    }

    /// Only populated while the add-friend workflow is active.
    pub async fn list_candidates(&self, user_id: UserId) -> Vec<User> {
        if !self.state.lock().await.add_friend_active {
            return Vec::new();
        }
        let candidates = match self.backend.candidates(user_id).await {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(user_id = user_id.0, "roster: failed to list candidates: {err}");
                Vec::new()
            }
        };

        let mut state = self.state.lock().await;
        if !state.add_friend_active {
            return Vec::new();
        }
        state.candidates = candidates.clone();
        candidates
    }

    /// Resolves `target_email` and creates a pending edge to that user. A failed
    /// lookup creates nothing. A failed creation after a good lookup is not
    /// rolled back; proposing again is safe because edges are unique per pair.
    pub async fn propose_friend_request(
        &self,
        self_id: UserId,
        target_email: &str,
    ) -> ClientResult<String> {
        let email = target_email.trim();
        if email.is_empty() {
            return Err(ClientError::Validation(
                "Email and user ID are required.".to_string(),
            ));
        }

        let target_id = self
            .backend
            .lookup_by_email(email)
            .await
            .map_err(|err| match err {
                ClientError::NotFound(_) => {
                    ClientError::NotFound(format!("no user with email {email}"))
                }
                other => other,
            })?;
        if target_id == self_id {
            return Err(ClientError::Validation(
                "You cannot send a friend request to yourself.".to_string(),
            ));
        }

        let confirmation = self.backend.propose_edge(self_id, target_id).await?;
        info!(from = self_id.0, to = target_id.0, "roster: friend request sent");
        Ok(confirmation.unwrap_or_else(|| DEFAULT_PROPOSE_CONFIRMATION.to_string()))
    }

    /// Accepts on the backend, drops the request locally, then refetches friends.
    pub async fn accept_request(&self, self_id: UserId, edge_id: FriendEdgeId) -> ClientResult<()> {
        self.backend.accept_edge(self_id, edge_id).await?;
        info!(user_id = self_id.0, edge_id = edge_id.0, "roster: request accepted");

        self.state
            .lock()
            .await
            .pending
            .retain(|edge| edge.id != edge_id);

        if let Err(err) = self.list_accepted_friends(self_id).await {
            warn!(
                user_id = self_id.0,
                "roster: friends not refreshed after accepting request: {err}"
            );
        }
        Ok(())
    }

    pub async fn accepted(&self) -> Vec<User> {
        self.state.lock().await.accepted.clone()
    }

    pub async fn pending(&self) -> Vec<FriendEdge> {
        self.state.lock().await.pending.clone()
    }

    pub async fn candidates(&self) -> Vec<User> {
        self.state.lock().await.candidates.clone()
    }

    pub async fn add_friend_active(&self) -> bool {
        self.state.lock().await.add_friend_active
    }

    pub async fn find_friend(&self, peer_id: UserId) -> Option<User> {
        self.state
            .lock()
            .await
            .accepted
            .iter()
            .find(|friend| friend.id == peer_id)
            .cloned()
    }

    /// Case-insensitive match on display name; an empty query matches everyone.
    pub async fn filter_friends(&self, query: &str) -> Vec<User> {
        let needle = query.trim().to_lowercase();
        self.state
            .lock()
            .await
            .accepted
            .iter()
            .filter(|friend| friend.display_name.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
#[path = "tests/roster_tests.rs"]
mod tests;
