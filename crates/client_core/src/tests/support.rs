//! In-memory backend and connector used by the unit tests.

use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::domain::{
    ConversationPair, FriendEdge, FriendEdgeId, FriendStatus, Message, MessageOrigin,
    PresenceState, User, UserId,
};
use tokio::sync::{broadcast, mpsc, Mutex, Notify};

use crate::{
    error::{ClientError, ClientResult},
    live::{LiveConnector, LiveSignal, LiveSocket, Outbound},
    session::SessionEvent,
    transport::ChatBackend,
};

pub fn user(id: i64, name: &str) -> User {
    User {
        id: UserId(id),
        display_name: name.to_string(),
        email_address: format!("{}@example.com", name.to_lowercase()),
    }
}

pub fn pending_edge(id: i64, from: i64, to: i64) -> FriendEdge {
    FriendEdge {
        id: FriendEdgeId(id),
        requester: Some(UserId(from)),
        addressee: Some(UserId(to)),
        requester_email: Some(format!("user{from}@example.com")),
        status: FriendStatus::Pending,
    }
}

pub fn historical(sender: &str, content: &str) -> Message {
    Message::new(sender, content, MessageOrigin::Historical)
}

pub fn online(peer_id: i64) -> PresenceState {
    PresenceState {
        peer_id: UserId(peer_id),
        online: true,
        last_seen: None,
    }
}

/// Blocks one backend call until released, after announcing it was reached.
#[derive(Clone, Default)]
pub struct Gate {
    pub reached: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl Gate {
    async fn pass(&self) {
        self.reached.notify_one();
        self.release.notified().await;
    }
}

pub struct FakeBackend {
    pub me: Mutex<ClientResult<User>>,
    pub friends: Mutex<ClientResult<Vec<User>>>,
    pub requests: Mutex<ClientResult<Vec<FriendEdge>>>,
    pub candidates: Mutex<ClientResult<Vec<User>>>,
    pub emails: Mutex<HashMap<String, UserId>>,
    /// Returned for any email not in `emails`.
    pub email_miss: Mutex<ClientError>,
    pub propose_result: Mutex<ClientResult<Option<String>>>,
    pub accept_result: Mutex<ClientResult<()>>,
    /// Friend that appears in the accepted list once the edge is accepted.
    pub friend_on_accept: Mutex<HashMap<FriendEdgeId, User>>,
    pub presence: Mutex<HashMap<UserId, ClientResult<PresenceState>>>,
    pub history: Mutex<HashMap<UserId, ClientResult<Vec<Message>>>>,
    pub history_gates: Mutex<HashMap<UserId, Gate>>,
    pub proposed_edges: Mutex<Vec<(UserId, UserId)>>,
    pub accepted_edges: Mutex<Vec<FriendEdgeId>>,
    pub me_calls: Mutex<u32>,
}

impl FakeBackend {
    pub fn signed_in(me: User) -> Self {
        Self {
            me: Mutex::new(Ok(me)),
            friends: Mutex::new(Ok(Vec::new())),
            requests: Mutex::new(Ok(Vec::new())),
            candidates: Mutex::new(Ok(Vec::new())),
            emails: Mutex::new(HashMap::new()),
            email_miss: Mutex::new(ClientError::Rejected {
                status: 404,
                message: "user not found".to_string(),
            }),
            propose_result: Mutex::new(Ok(None)),
            accept_result: Mutex::new(Ok(())),
            friend_on_accept: Mutex::new(HashMap::new()),
            presence: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            history_gates: Mutex::new(HashMap::new()),
            proposed_edges: Mutex::new(Vec::new()),
            accepted_edges: Mutex::new(Vec::new()),
            me_calls: Mutex::new(0),
        }
    }

    pub fn signed_out() -> Self {
        let backend = Self::signed_in(user(0, "nobody"));
        *backend.me.try_lock().expect("fresh mutex") =
            Err(ClientError::Auth("current user: HTTP 401".to_string()));
        backend
    }

    pub async fn with_friends(self, friends: Vec<User>) -> Self {
        *self.friends.lock().await = Ok(friends);
        self
    }

    pub async fn set_presence(&self, peer_id: i64, presence: ClientResult<PresenceState>) {
        self.presence.lock().await.insert(UserId(peer_id), presence);
    }

    pub async fn set_history(&self, peer_id: i64, history: ClientResult<Vec<Message>>) {
        self.history.lock().await.insert(UserId(peer_id), history);
    }

    pub async fn gate_history(&self, peer_id: i64) -> Gate {
        let gate = Gate::default();
        self.history_gates
            .lock()
            .await
            .insert(UserId(peer_id), gate.clone());
        gate
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn current_user(&self) -> ClientResult<User> {
        *self.me_calls.lock().await += 1;
        self.me.lock().await.clone()
    }

    async fn accepted_friends(&self, _user_id: UserId) -> ClientResult<Vec<User>> {
        self.friends.lock().await.clone()
    }

    async fn acceptable_requests(&self, _user_id: UserId) -> ClientResult<Vec<FriendEdge>> {
        self.requests.lock().await.clone()
    }

    async fn candidates(&self, _user_id: UserId) -> ClientResult<Vec<User>> {
        self.candidates.lock().await.clone()
    }

    async fn lookup_by_email(&self, email: &str) -> ClientResult<UserId> {
        match self.emails.lock().await.get(email) {
            Some(id) => Ok(*id),
            None => Err(self.email_miss.lock().await.clone()),
        }
    }

    async fn propose_edge(&self, from: UserId, to: UserId) -> ClientResult<Option<String>> {
        let result = self.propose_result.lock().await.clone();
        if result.is_ok() {
            self.proposed_edges.lock().await.push((from, to));
        }
        result
    }

    async fn accept_edge(&self, _user_id: UserId, edge_id: FriendEdgeId) -> ClientResult<()> {
        self.accept_result.lock().await.clone()?;
        self.accepted_edges.lock().await.push(edge_id);
        if let Ok(requests) = &mut *self.requests.lock().await {
            requests.retain(|edge| edge.id != edge_id);
        }
        if let Some(friend) = self.friend_on_accept.lock().await.remove(&edge_id) {
            if let Ok(friends) = &mut *self.friends.lock().await {
                friends.push(friend);
            }
        }
        Ok(())
    }

    async fn presence(&self, peer_id: UserId) -> ClientResult<PresenceState> {
        self.presence
            .lock()
            .await
            .get(&peer_id)
            .cloned()
            .unwrap_or_else(|| Err(ClientError::Transport("connection refused".to_string())))
    }

    async fn history(&self, _user_id: UserId, peer_id: UserId) -> ClientResult<Vec<Message>> {
        let gate = self.history_gates.lock().await.remove(&peer_id);
        if let Some(gate) = gate {
            gate.pass().await;
        }
        self.history
            .lock()
            .await
            .get(&peer_id)
            .cloned()
            .unwrap_or_else(|| Err(ClientError::NotFound("message history".to_string())))
    }
}

/// Test-side ends of a socket handed out by [`FakeConnector`].
pub struct FakeLink {
    pub pair: ConversationPair,
    pub inbound: mpsc::UnboundedSender<LiveSignal>,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl FakeLink {
    pub fn push(&self, text: &str) {
        self.inbound
            .send(LiveSignal::Frame(text.to_string()))
            .expect("reader alive");
    }

    /// Next outbound item, if one arrives within a short wait.
    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        tokio::time::timeout(Duration::from_millis(500), self.outbound.recv())
            .await
            .ok()
            .flatten()
    }
}

#[derive(Default)]
pub struct FakeConnector {
    links: Mutex<Vec<Option<FakeLink>>>,
    fail_with: Mutex<Option<String>>,
    gates: Mutex<HashMap<UserId, Gate>>,
}

impl FakeConnector {
    pub async fn fail_next(&self, reason: &str) {
        *self.fail_with.lock().await = Some(reason.to_string());
    }

    pub async fn gate_connect(&self, peer_id: i64) -> Gate {
        let gate = Gate::default();
        self.gates.lock().await.insert(UserId(peer_id), gate.clone());
        gate
    }

    pub async fn connect_count(&self) -> usize {
        self.links.lock().await.len()
    }

    /// Takes the first untaken link opened towards `peer_id`.
    pub async fn take_link_to(&self, peer_id: i64) -> FakeLink {
        self.links
            .lock()
            .await
            .iter_mut()
            .find(|link| {
                link.as_ref()
                    .is_some_and(|link| link.pair.peer_id == UserId(peer_id))
            })
            .and_then(Option::take)
            .expect("link to peer exists and was not taken")
    }

    pub async fn take_link(&self, index: usize) -> FakeLink {
        self.links
            .lock()
            .await
            .get_mut(index)
            .and_then(Option::take)
            .expect("link exists and was not taken")
    }
}

#[async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(&self, pair: ConversationPair) -> Result<LiveSocket> {
        let gate = self.gates.lock().await.remove(&pair.peer_id);
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if let Some(reason) = self.fail_with.lock().await.take() {
            return Err(anyhow!(reason));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.links.lock().await.push(Some(FakeLink {
            pair,
            inbound: in_tx,
            outbound: out_rx,
        }));
        Ok(LiveSocket::from_channels(out_tx, in_rx))
    }
}

/// Waits for the first event matching `predicate`, skipping the rest.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<SessionEvent>, mut predicate: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(err) => panic!("event stream ended: {err}"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

/// Everything already queued on the receiver.
pub fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
