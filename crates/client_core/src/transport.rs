//! REST access to the chat backend.
//!
//! `ChatBackend` reports raw outcomes (`401` as [`ClientError::Auth`], `404` as
//! [`ClientError::NotFound`], any other non-2xx as [`ClientError::Rejected`]).
//! Deciding which of those become empty results or safe defaults is left to
//! the roster, presence and conversation components.

use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE, COOKIE},
    Client, Response, StatusCode,
};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ConversationPair, FriendEdge, FriendEdgeId, Message, PresenceState, User, UserId},
    protocol::{
        BackendMessage, EmailLookupResponse, FriendRequestRecord, HistoryRecord,
        PresenceResponse, ProposeFriendRequest, UserRecord,
    },
};
use tracing::debug;
use url::Url;

use crate::error::{ClientError, ClientResult};

/// Base origin shared by the REST calls and the live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEndpoint {
    base: Url,
}

impl BackendEndpoint {
    pub fn parse(raw: &str) -> ClientResult<Self> {
        let base = Url::parse(raw.trim())
            .map_err(|err| ClientError::Validation(format!("invalid base url '{raw}': {err}")))?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return Err(ClientError::Validation(format!(
                "base url must start with http:// or https://, got '{raw}'"
            )));
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Appends each segment percent-encoded, so an email address stays one segment.
    pub fn rest_url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        url.set_query(None);
        url.set_fragment(None);
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    pub fn live_url(&self, pair: ConversationPair) -> Url {
        let mut url = self.rest_url(&[
            "ws",
            &pair.user_id.to_string(),
            &pair.peer_id.to_string(),
        ]);
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http(s) -> ws(s) is always a permitted scheme change
        let _ = url.set_scheme(scheme);
        url
    }
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn current_user(&self) -> ClientResult<User>;
    async fn accepted_friends(&self, user_id: UserId) -> ClientResult<Vec<User>>;
    async fn acceptable_requests(&self, user_id: UserId) -> ClientResult<Vec<FriendEdge>>;
    async fn candidates(&self, user_id: UserId) -> ClientResult<Vec<User>>;
    async fn lookup_by_email(&self, email: &str) -> ClientResult<UserId>;
    /// Returns the backend's confirmation text, if it sent one.
    async fn propose_edge(&self, from: UserId, to: UserId) -> ClientResult<Option<String>>;
    async fn accept_edge(&self, user_id: UserId, edge_id: FriendEdgeId) -> ClientResult<()>;
    async fn presence(&self, peer_id: UserId) -> ClientResult<PresenceState>;
    async fn history(&self, user_id: UserId, peer_id: UserId) -> ClientResult<Vec<Message>>;
}

pub struct HttpBackend {
    http: Client,
    endpoint: BackendEndpoint,
}

impl HttpBackend {
    pub fn new(
        endpoint: BackendEndpoint,
        session_cookie: Option<&str>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = session_cookie.filter(|cookie| !cookie.trim().is_empty()) {
            let value = HeaderValue::from_str(cookie.trim())
                .map_err(|err| anyhow!("session cookie is not a valid header value: {err}"))?;
            headers.insert(COOKIE, value);
        }
        let http = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &BackendEndpoint {
        &self.endpoint
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, what: &str) -> ClientResult<T> {
        debug!(%url, "http: GET {what}");
        let response = self.http.get(url).send().await?;
        let response = check_status(response, what).await?;
        Ok(response.json().await?)
    }

    /// Lists may come back as JSON `null` when empty.
    async fn get_list<T: DeserializeOwned>(&self, url: Url, what: &str) -> ClientResult<Vec<T>> {
        let list: Option<Vec<T>> = self.get_json(url, what).await?;
        Ok(list.unwrap_or_default())
    }
}

async fn check_status(response: Response, what: &str) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::UNAUTHORIZED => Err(ClientError::Auth(format!("{what}: HTTP 401"))),
        StatusCode::NOT_FOUND => Err(ClientError::NotFound(what.to_string())),
        _ => Err(ClientError::Rejected {
            status: status.as_u16(),
            message: rejection_message(response).await,
        }),
    }
}

async fn rejection_message(response: Response) -> String {
    let status = response.status().as_u16();
    backend_message(response)
        .await
        .unwrap_or_else(|| format!("Error: HTTP {status}"))
}

/// The `message` of a JSON error body, or the trimmed text of any other body.
async fn backend_message(response: Response) -> Option<String> {
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("application/json"));
    let body = response.text().await.unwrap_or_default();

    let message = if is_json {
        serde_json::from_str::<BackendMessage>(&body)
            .ok()
            .and_then(|parsed| parsed.message)
    } else {
        Some(body.trim().to_string())
    };
    message.filter(|message| !message.is_empty())
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn current_user(&self) -> ClientResult<User> {
        let record: UserRecord = self
            .get_json(self.endpoint.rest_url(&["users", "me"]), "current user")
            .await?;
        Ok(record.into())
    }

    async fn accepted_friends(&self, user_id: UserId) -> ClientResult<Vec<User>> {
        let url = self.endpoint.rest_url(&[
            "friends",
            "friendRequestStatus",
            &user_id.to_string(),
            "Accepted",
        ]);
        let records: Vec<UserRecord> = self.get_list(url, "accepted friends").await?;
        Ok(records.into_iter().map(User::from).collect())
    }

    async fn acceptable_requests(&self, user_id: UserId) -> ClientResult<Vec<FriendEdge>> {
        let url = self.endpoint.rest_url(&[
            "friends",
            "friendRequestUserCanAccept",
            &user_id.to_string(),
        ]);
        let records: Vec<FriendRequestRecord> = self.get_list(url, "friend requests").await?;
        Ok(records.into_iter().map(FriendEdge::from).collect())
    }

    async fn candidates(&self, user_id: UserId) -> ClientResult<Vec<User>> {
        let url = self
            .endpoint
            .rest_url(&["users", "suggestedfriends", &user_id.to_string()]);
        let records: Vec<UserRecord> = self.get_list(url, "suggested friends").await?;
        Ok(records.into_iter().map(User::from).collect())
    }

    async fn lookup_by_email(&self, email: &str) -> ClientResult<UserId> {
        let url = self.endpoint.rest_url(&["users", "email", email]);
        debug!(%url, "http: GET user by email");
        let response = self.http.get(url).send().await?;
        // The backend explains a miss in the 404 body; keep its words.
        if response.status() == StatusCode::NOT_FOUND {
            return Err(match backend_message(response).await {
                Some(message) => ClientError::Rejected {
                    status: 404,
                    message,
                },
                None => ClientError::NotFound("user by email".to_string()),
            });
        }
        let response = check_status(response, "user by email").await?;
        let found: EmailLookupResponse = response.json().await?;
        Ok(found.id)
    }

    async fn propose_edge(&self, from: UserId, to: UserId) -> ClientResult<Option<String>> {
        let url = self.endpoint.rest_url(&["friends"]);
        debug!(%url, from = from.0, to = to.0, "http: POST friend request");
        let response = self
            .http
            .post(url)
            .json(&ProposeFriendRequest {
                friend1_user_id: from,
                friend2_user_id: to,
            })
            .send()
            .await?;
        let response = check_status(response, "friend request").await?;
        let body = response.text().await?;
        let reply = serde_json::from_str::<BackendMessage>(&body).unwrap_or_default();
        Ok(reply.message.filter(|message| !message.is_empty()))
    }

    async fn accept_edge(&self, user_id: UserId, edge_id: FriendEdgeId) -> ClientResult<()> {
        let url = self.endpoint.rest_url(&[
            "friends",
            &user_id.to_string(),
            &edge_id.to_string(),
            "Accepted",
        ]);
        debug!(%url, "http: PUT accept friend request");
        let response = self.http.put(url).send().await?;
        check_status(response, "friend request").await?;
        Ok(())
    }

    async fn presence(&self, peer_id: UserId) -> ClientResult<PresenceState> {
        let url = self
            .endpoint
            .rest_url(&["ws", "isOnline", &peer_id.to_string()]);
        let response: PresenceResponse = self.get_json(url, "presence").await?;
        Ok(PresenceState {
            peer_id,
            online: response.online,
            last_seen: response.last_seen_at(),
        })
    }

    async fn history(&self, user_id: UserId, peer_id: UserId) -> ClientResult<Vec<Message>> {
        let url = self.endpoint.rest_url(&[
            "messages",
            &user_id.to_string(),
            &peer_id.to_string(),
        ]);
        let records: Vec<HistoryRecord> = self.get_list(url, "message history").await?;
        Ok(records.into_iter().map(Message::from).collect())
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
