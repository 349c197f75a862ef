use std::sync::Arc;

use shared::domain::{PresenceState, UserId};
use tracing::{debug, warn};

use crate::transport::ChatBackend;

/// Best-effort presence lookup for the selected peer. Runs once per selection.
pub struct PresenceTracker {
    backend: Arc<dyn ChatBackend>,
}

impl PresenceTracker {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    /// Any failure reads as offline with no last-seen time.
    pub async fn refresh_presence(&self, peer_id: UserId) -> PresenceState {
        match self.backend.presence(peer_id).await {
            Ok(presence) => {
                debug!(peer_id = peer_id.0, online = presence.online, "presence: refreshed");
                PresenceState { peer_id, ..presence }
            }
            Err(err) => {
                warn!(peer_id = peer_id.0, "presence: lookup failed, assuming offline: {err}");
                PresenceState::offline(peer_id)
            }
        }
    }
}
