//! Session orchestration: identity, roster, presence, history and the live
//! connection for the selected peer.
//!
//! Every peer selection advances the [`Epoch`]. Work started under an older
//! epoch keeps running to completion but its results are dropped on arrival;
//! only the live connection is actively closed when a selection is superseded.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use shared::{
    domain::{ConversationPair, FriendEdge, FriendEdgeId, Message, PresenceState, User, UserId},
    error::ApiError,
};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::{
    connection::{
        ConnectionChange, ConnectionId, ConnectionState, LiveConnectionManager, OpenOutcome,
        SignalOutcome,
    },
    conversation::ConversationStore,
    error::{ClientError, ClientResult},
    identity::IdentityResolver,
    live::{LiveConnector, LiveSignal, WsConnector},
    presence::PresenceTracker,
    roster::RosterManager,
    transport::{BackendEndpoint, ChatBackend, HttpBackend},
};

const EVENT_CAPACITY: usize = 1024;

/// Identifies the selection a piece of async work was issued under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Epoch(pub u64);

impl Epoch {
    fn next(self) -> Self {
        Epoch(self.0 + 1)
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    IdentityResolved(User),
    /// The session cannot continue; every later operation fails with `Auth`.
    SessionFailed(ApiError),
    FriendsUpdated(Vec<User>),
    RequestsUpdated(Vec<FriendEdge>),
    CandidatesUpdated(Vec<User>),
    PeerSelected {
        peer: User,
        epoch: Epoch,
    },
    PeerDeselected,
    ConversationCleared {
        epoch: Epoch,
    },
    /// The history seeded into the view for the selection made at `epoch`.
    HistoryLoaded {
        peer_id: UserId,
        epoch: Epoch,
        messages: Vec<Message>,
    },
    PresenceUpdated(PresenceState),
    ConnectionStateChanged(ConnectionChange),
    ConnectionError(String),
    MessageAppended(Message),
    Notice(String),
    Error(ApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    Connected,
    PeerOffline,
    ConnectFailed,
    /// A later selection took over before this one finished.
    Superseded,
}

struct Selection {
    peer: User,
    epoch: Epoch,
}

struct SessionState {
    epoch: Epoch,
    selection: Option<Selection>,
    presence: Option<PresenceState>,
    conversation: ConversationStore,
    connection: LiveConnectionManager,
    terminal_error: Option<ApiError>,
}

impl SessionState {
    fn is_current(&self, epoch: Epoch) -> bool {
        self.epoch == epoch
            && self
                .selection
                .as_ref()
                .is_some_and(|selection| selection.epoch == epoch)
    }
}

pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    connector: Arc<dyn LiveConnector>,
    identity: IdentityResolver,
    roster: RosterManager,
    presence: PresenceTracker,
    inner: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl ChatSession {
    pub fn new(backend: Arc<dyn ChatBackend>, connector: Arc<dyn LiveConnector>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            identity: IdentityResolver::new(Arc::clone(&backend)),
            roster: RosterManager::new(Arc::clone(&backend)),
            presence: PresenceTracker::new(Arc::clone(&backend)),
            backend,
            connector,
            inner: Mutex::new(SessionState {
                epoch: Epoch::default(),
                selection: None,
                presence: None,
                conversation: ConversationStore::new(),
                connection: LiveConnectionManager::new(),
                terminal_error: None,
            }),
            events,
        })
    }

    /// Builds a session against a real backend over HTTP and WebSocket.
    pub fn connect_http(
        endpoint: BackendEndpoint,
        session_cookie: Option<String>,
        request_timeout: Duration,
    ) -> anyhow::Result<Arc<Self>> {
        let backend = HttpBackend::new(endpoint.clone(), session_cookie.as_deref(), request_timeout)?;
        let connector =
            WsConnector::new(endpoint, session_cookie).with_connect_timeout(request_timeout);
        Ok(Self::new(Arc::new(backend), Arc::new(connector)))
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn emit_connection_changes(&self, changes: Vec<ConnectionChange>) {
        for change in changes {
            self.emit(SessionEvent::ConnectionStateChanged(change));
        }
    }

    /// Reports a failed user action. Auth failures end the session.
    async fn fail(&self, err: ClientError) -> ClientError {
        let api_error = err.to_api_error();
        if api_error.kind.is_terminal() {
            warn!("session: authentication lost: {err}");
            self.inner.lock().await.terminal_error = Some(api_error.clone());
            self.emit(SessionEvent::SessionFailed(api_error));
        } else {
            self.emit(SessionEvent::Error(api_error));
        }
        err
    }

    async fn ensure_live(&self) -> ClientResult<User> {
        if let Some(terminal) = &self.inner.lock().await.terminal_error {
            return Err(ClientError::Auth(terminal.message.clone()));
        }
        self.identity.cached().cloned().ok_or(ClientError::NoSession)
    }

    /// Resolves the user, then loads friends and pending requests together.
    pub async fn mount(&self) -> ClientResult<User> {
        if let Some(terminal) = &self.inner.lock().await.terminal_error {
            return Err(ClientError::Auth(terminal.message.clone()));
        }

        let user = match self.identity.resolve_current_user().await {
            Ok(user) => user,
            Err(err) => return Err(self.fail(err).await),
        };
        self.emit(SessionEvent::IdentityResolved(user.clone()));

        let (friends, requests) = tokio::join!(
            self.roster.list_accepted_friends(user.id),
            self.roster.list_acceptable_requests(user.id)
        );
        self.emit(SessionEvent::RequestsUpdated(requests));
        match friends {
            Ok(friends) => self.emit(SessionEvent::FriendsUpdated(friends)),
            Err(err) => return Err(self.fail(err).await),
        }

        info!(user_id = user.id.0, "session: mounted");
        Ok(user)
    }

    pub async fn refresh_friends(&self) -> ClientResult<Vec<User>> {
        let user = self.ensure_live().await?;
        match self.roster.list_accepted_friends(user.id).await {
            Ok(friends) => {
                self.emit(SessionEvent::FriendsUpdated(friends.clone()));
                Ok(friends)
            }
            Err(err) => Err(self.fail(err).await),
        }
    }

    pub async fn select_peer_by_id(self: &Arc<Self>, peer_id: UserId) -> ClientResult<SelectionOutcome> {
        self.ensure_live().await?;
        let peer = self
            .roster
            .find_friend(peer_id)
            .await
            .ok_or_else(|| ClientError::Validation(format!("user {peer_id} is not a friend")))?;
        self.select_peer(peer).await
    }

    /// Clears the view, refreshes presence, reloads history and rebinds the
    /// live connection, in that order. Selecting the current peer again
    /// re-runs the whole sequence.
    pub async fn select_peer(self: &Arc<Self>, peer: User) -> ClientResult<SelectionOutcome> {
        let user = self.ensure_live().await?;

        let epoch = {
            let mut state = self.inner.lock().await;
            state.epoch = state.epoch.next();
            let epoch = state.epoch;
            state.connection.close("peer selection changed");
            state.conversation.reset();
            state.presence = None;
            state.selection = Some(Selection {
                peer: peer.clone(),
                epoch,
            });
            let changes = state.connection.drain_changes();
            self.emit_connection_changes(changes);
            epoch
        };
        info!(user_id = user.id.0, peer_id = peer.id.0, epoch = epoch.0, "session: peer selected");
        self.emit(SessionEvent::PeerSelected {
            peer: peer.clone(),
            epoch,
        });
        self.emit(SessionEvent::ConversationCleared { epoch });

        let presence = self.presence.refresh_presence(peer.id).await;
        {
            let mut state = self.inner.lock().await;
            if !state.is_current(epoch) {
                debug!(epoch = epoch.0, "session: dropping presence for superseded selection");
                return Ok(SelectionOutcome::Superseded);
            }
            state.presence = Some(presence.clone());
        }
        self.emit(SessionEvent::PresenceUpdated(presence.clone()));

        let history = ConversationStore::load_history(self.backend.as_ref(), user.id, peer.id).await;
        let history_failure = {
            let mut state = self.inner.lock().await;
            if !state.is_current(epoch) {
                debug!(epoch = epoch.0, "session: dropping history for superseded selection");
                return Ok(SelectionOutcome::Superseded);
            }
            match history {
                Ok(messages) => {
                    state.conversation.seed_history(messages);
                    let messages = state.conversation.messages().to_vec();
                    self.emit(SessionEvent::HistoryLoaded {
                        peer_id: peer.id,
                        epoch,
                        messages,
                    });
                    None
                }
                Err(err) => Some(err),
            }
        };
        if let Some(err) = history_failure {
            if matches!(err, ClientError::Auth(_)) {
                return Err(self.fail(err).await);
            }
            warn!(peer_id = peer.id.0, "session: history unavailable, showing empty conversation: {err}");
        }

        if !presence.online {
            info!(peer_id = peer.id.0, "session: peer offline, not connecting");
            return Ok(SelectionOutcome::PeerOffline);
        }

        self.bind_connection(ConversationPair::new(user.id, peer.id), epoch)
            .await
    }

    async fn bind_connection(
        self: &Arc<Self>,
        pair: ConversationPair,
        epoch: Epoch,
    ) -> ClientResult<SelectionOutcome> {
        // A newer selection may begin its own open while this connect is in
        // flight; the stale socket is then discarded on arrival.
        let ticket = {
            let mut state = self.inner.lock().await;
            if !state.is_current(epoch) {
                return Ok(SelectionOutcome::Superseded);
            }
            let ticket = state.connection.begin_open(pair);
            let changes = state.connection.drain_changes();
            self.emit_connection_changes(changes);
            ticket
        };

        let connected = self.connector.connect(pair).await;

        let mut state = self.inner.lock().await;
        let outcome = match connected {
            Ok(socket) => match state.connection.complete_open(ticket, socket) {
                OpenOutcome::Opened { inbound } => {
                    if let Some(inbound) = inbound {
                        self.spawn_reader(ticket.connection_id, inbound);
                    }
                    SelectionOutcome::Connected
                }
                OpenOutcome::Discarded => SelectionOutcome::Superseded,
            },
            Err(err) => {
                state.connection.fail_open(ticket, &format!("{err:#}"));
                if state.is_current(epoch) {
                    self.emit(SessionEvent::ConnectionError(format!("{err:#}")));
                    SelectionOutcome::ConnectFailed
                } else {
                    SelectionOutcome::Superseded
                }
            }
        };
        let changes = state.connection.drain_changes();
        self.emit_connection_changes(changes);
        Ok(outcome)
    }

    fn spawn_reader(
        self: &Arc<Self>,
        connection_id: ConnectionId,
        mut inbound: mpsc::UnboundedReceiver<LiveSignal>,
    ) {
        let session: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(signal) = inbound.recv().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                let closed = matches!(signal, LiveSignal::Closed { .. });
                session.handle_live_signal(connection_id, signal).await;
                if closed {
                    break;
                }
            }
            debug!(connection_id = connection_id.0, "ws: reader finished");
        });
    }

    async fn handle_live_signal(
        &self,
        connection_id: ConnectionId,
        signal: LiveSignal,
    ) {
        let self_name = self
            .identity
            .cached()
            .map(|user| user.display_name.clone())
            .unwrap_or_default();

        let mut state = self.inner.lock().await;
        let peer_name = state
            .selection
            .as_ref()
            .map(|selection| selection.peer.display_name.clone())
            .unwrap_or_default();

        match state.connection.on_signal(connection_id, signal, &peer_name) {
            SignalOutcome::Ignored => {}
            SignalOutcome::Inbound(message) => {
                if state.conversation.append_live(message.clone(), &self_name) {
                    self.emit(SessionEvent::MessageAppended(message));
                }
            }
            SignalOutcome::Error(err) => self.emit(SessionEvent::ConnectionError(err)),
            SignalOutcome::Closed { .. } => {}
        }
        let changes = state.connection.drain_changes();
        self.emit_connection_changes(changes);
    }

    /// Echoes the message locally, then sends it over the open connection.
    pub async fn send_message(&self, text: &str) -> ClientResult<Message> {
        let user = self.ensure_live().await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::Validation("message is empty".to_string()));
        }

        let mut state = self.inner.lock().await;
        if state.selection.is_none() {
            return Err(ClientError::NoPeerSelected);
        }
        if !state.connection.is_open() {
            debug!(state = %state.connection.state(), "session: send while not connected");
            return Err(ClientError::NotConnected);
        }

        let message = state.conversation.append_local(text, &user.display_name);
        self.emit(SessionEvent::MessageAppended(message.clone()));

        if let Err(err) = state.connection.send(text) {
            warn!("session: send failed: {err}");
            state.conversation.retract_local(&message);
            drop(state);
            return Err(self.fail(err).await);
        }
        Ok(message)
    }

    /// Drops the current selection, closing its connection and clearing the view.
    pub async fn deselect(&self) {
        let mut state = self.inner.lock().await;
        state.epoch = state.epoch.next();
        state.connection.close("peer deselected");
        state.conversation.reset();
        state.presence = None;
        let had_selection = state.selection.take().is_some();
        let changes = state.connection.drain_changes();
        self.emit_connection_changes(changes);
        drop(state);
        if had_selection {
            self.emit(SessionEvent::PeerDeselected);
        }
    }

    /// Tears the session scope down; in-flight work is discarded as it completes.
    pub async fn unmount(&self) {
        self.deselect().await;
        self.roster.close_add_friend().await;
        info!("session: unmounted");
    }

    pub async fn open_add_friend(&self) -> ClientResult<Vec<User>> {
        let user = self.ensure_live().await?;
        let candidates = self.roster.open_add_friend(user.id).await;
        self.emit(SessionEvent::CandidatesUpdated(candidates.clone()));
        Ok(candidates)
    }

    pub async fn close_add_friend(&self) {
        self.roster.close_add_friend().await;
        self.emit(SessionEvent::CandidatesUpdated(Vec::new()));
    }

    /// Returns the confirmation to show the user.
    pub async fn propose_friend_request(&self, target_email: &str) -> ClientResult<String> {
        let user = self.ensure_live().await?;
        match self.roster.propose_friend_request(user.id, target_email).await {
            Ok(confirmation) => {
                self.emit(SessionEvent::Notice(confirmation.clone()));
                self.close_add_friend().await;
                Ok(confirmation)
            }
            Err(err) => Err(self.fail(err).await),
        }
    }

    pub async fn accept_request(&self, edge_id: FriendEdgeId) -> ClientResult<()> {
        let user = self.ensure_live().await?;
        if let Err(err) = self.roster.accept_request(user.id, edge_id).await {
            return Err(self.fail(err).await);
        }
        self.emit(SessionEvent::Notice("Friend request accepted!".to_string()));
        self.emit(SessionEvent::RequestsUpdated(self.roster.pending().await));
        self.emit(SessionEvent::FriendsUpdated(self.roster.accepted().await));
        Ok(())
    }

    pub fn current_user(&self) -> Option<User> {
        self.identity.cached().cloned()
    }

    pub async fn terminal_error(&self) -> Option<ApiError> {
        self.inner.lock().await.terminal_error.clone()
    }

    pub async fn epoch(&self) -> Epoch {
        self.inner.lock().await.epoch
    }

    pub async fn selected_peer(&self) -> Option<User> {
        self.inner
            .lock()
            .await
            .selection
            .as_ref()
            .map(|selection| selection.peer.clone())
    }

    pub async fn presence(&self) -> Option<PresenceState> {
        self.inner.lock().await.presence.clone()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.lock().await.connection.state()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.inner.lock().await.conversation.messages().to_vec()
    }

    pub async fn accepted_friends(&self) -> Vec<User> {
        self.roster.accepted().await
    }

    pub async fn pending_requests(&self) -> Vec<FriendEdge> {
        self.roster.pending().await
    }

    pub async fn candidates(&self) -> Vec<User> {
        self.roster.candidates().await
    }

    pub async fn filter_friends(&self, query: &str) -> Vec<User> {
        self.roster.filter_friends(query).await
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
