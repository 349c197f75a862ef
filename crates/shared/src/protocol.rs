use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{FriendEdge, FriendEdgeId, FriendStatus, Message, MessageOrigin, User, UserId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "ID")]
    pub id: UserId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email_id: String,
}

impl From<UserRecord> for User {
    fn from(value: UserRecord) -> Self {
        Self {
            id: value.id,
            display_name: value.name,
            email_address: value.email_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendRequestRecord {
    #[serde(rename = "ID")]
    pub id: FriendEdgeId,
    #[serde(rename = "Friend1UserID", default, skip_serializing_if = "Option::is_none")]
    pub friend1_user_id: Option<UserId>,
    #[serde(rename = "Friend2UserID", default, skip_serializing_if = "Option::is_none")]
    pub friend2_user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_id: Option<String>,
    #[serde(rename = "Status", default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl From<FriendRequestRecord> for FriendEdge {
    fn from(value: FriendRequestRecord) -> Self {
        let status = match value.status.as_deref() {
            Some(status) if status.eq_ignore_ascii_case("accepted") => FriendStatus::Accepted,
            _ => FriendStatus::Pending,
        };
        Self {
            id: value.id,
            requester: value.friend1_user_id,
            addressee: value.friend2_user_id,
            requester_email: value.email_id,
            status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailLookupResponse {
    #[serde(rename = "ID")]
    pub id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeFriendRequest {
    #[serde(rename = "Friend1UserID")]
    pub friend1_user_id: UserId,
    #[serde(rename = "Friend2UserID")]
    pub friend2_user_id: UserId,
}

/// `{message}` body returned by mutating endpoints and most error responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceResponse {
    #[serde(default)]
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

impl PresenceResponse {
    pub fn last_seen_at(&self) -> Option<DateTime<Utc>> {
        self.last_seen
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|at| at.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(rename = "Content", default)]
    pub content: String,
    #[serde(rename = "SenderName", default)]
    pub sender_name: String,
}

impl From<HistoryRecord> for Message {
    fn from(value: HistoryRecord) -> Self {
        Message::new(value.sender_name, value.content, MessageOrigin::Historical)
    }
}

/// Structured frame pushed over the live connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveFrame {
    #[serde(rename = "Content", default)]
    pub content: String,
    #[serde(rename = "SenderName", default)]
    pub sender_name: String,
}

/// Returns the structured frame only when both fields are present and non-empty.
pub fn parse_live_frame(text: &str) -> Option<LiveFrame> {
    serde_json::from_str::<LiveFrame>(text)
        .ok()
        .filter(|frame| !frame.content.is_empty() && !frame.sender_name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_frame_is_parsed() {
        let frame = parse_live_frame(r#"{"Content":"yo","SenderName":"Bob"}"#).expect("frame");
        assert_eq!(frame.content, "yo");
        assert_eq!(frame.sender_name, "Bob");
    }

    #[test]
    fn plain_text_and_partial_frames_fall_back() {
        assert!(parse_live_frame("hello there").is_none());
        assert!(parse_live_frame(r#"{"Content":"yo"}"#).is_none());
        assert!(parse_live_frame(r#"{"Content":"","SenderName":"Bob"}"#).is_none());
        assert!(parse_live_frame("42").is_none());
    }

    #[test]
    fn user_record_uses_backend_field_names() {
        let record: UserRecord =
            serde_json::from_str(r#"{"ID":7,"name":"Bob","email_id":"bob@example.com"}"#)
                .expect("json");
        let user = User::from(record);
        assert_eq!(user.id, UserId(7));
        assert_eq!(user.display_name, "Bob");
        assert_eq!(user.email_address, "bob@example.com");
    }

    #[test]
    fn presence_last_seen_tolerates_garbage() {
        let presence: PresenceResponse =
            serde_json::from_str(r#"{"online":false,"last_seen":"yesterday"}"#).expect("json");
        assert!(presence.last_seen_at().is_none());

        let presence: PresenceResponse =
            serde_json::from_str(r#"{"online":true,"last_seen":"2024-05-01T10:00:00Z"}"#)
                .expect("json");
        assert!(presence.online);
        assert!(presence.last_seen_at().is_some());
    }

    #[test]
    fn propose_body_serializes_backend_field_names() {
        let body = serde_json::to_value(ProposeFriendRequest {
            friend1_user_id: UserId(1),
            friend2_user_id: UserId(2),
        })
        .expect("json");
        assert_eq!(body, serde_json::json!({"Friend1UserID": 1, "Friend2UserID": 2}));
    }

    #[test]
    fn friend_request_status_defaults_to_pending() {
        let record: FriendRequestRecord =
            serde_json::from_str(r#"{"ID":3,"email_id":"eve@example.com"}"#).expect("json");
        let edge = FriendEdge::from(record);
        assert_eq!(edge.status, FriendStatus::Pending);
        assert_eq!(edge.label(), "eve@example.com");
        assert!(edge.is_acceptable_by(UserId(1)));
    }
}
