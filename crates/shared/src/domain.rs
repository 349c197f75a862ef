use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(FriendEdgeId);

/// A resolved account. Immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub email_address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendStatus {
    Pending,
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendEdge {
    pub id: FriendEdgeId,
    pub requester: Option<UserId>,
    pub addressee: Option<UserId>,
    pub requester_email: Option<String>,
    pub status: FriendStatus,
}

impl FriendEdge {
    /// A pending edge the given user is allowed to accept.
    pub fn is_acceptable_by(&self, user_id: UserId) -> bool {
        self.status == FriendStatus::Pending
            && self.addressee.map_or(true, |addressee| addressee == user_id)
    }

    pub fn label(&self) -> String {
        match &self.requester_email {
            Some(email) if !email.is_empty() => email.clone(),
            _ => format!("User ID: {}", self.id),
        }
    }
}

/// Presence of the currently selected peer. Never carried across selections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
    pub peer_id: UserId,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl PresenceState {
    pub fn offline(peer_id: UserId) -> Self {
        Self {
            peer_id,
            online: false,
            last_seen: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    Historical,
    Live,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender_display_name: String,
    pub content: String,
    pub origin: MessageOrigin,
}

impl Message {
    pub fn new(
        sender_display_name: impl Into<String>,
        content: impl Into<String>,
        origin: MessageOrigin,
    ) -> Self {
        Self {
            sender_display_name: sender_display_name.into(),
            content: content.into(),
            origin,
        }
    }
}

/// The (self, peer) pair a conversation and its live connection are bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationPair {
    pub user_id: UserId,
    pub peer_id: UserId,
}

impl ConversationPair {
    pub fn new(user_id: UserId, peer_id: UserId) -> Self {
        Self { user_id, peer_id }
    }
}

impl fmt::Display for ConversationPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.user_id, self.peer_id)
    }
}
