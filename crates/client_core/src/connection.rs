//! State machine for the single live connection of a session.
//!
//! `Closed -> Opening -> Open -> Closing -> Closed`, with failures during
//! `Opening` and remote closes falling straight back to `Closed`. The manager
//! never performs I/O itself: the caller connects between [`begin_open`] and
//! [`complete_open`] and feeds inbound signals back through [`on_signal`].
//!
//! [`begin_open`]: LiveConnectionManager::begin_open
//! [`complete_open`]: LiveConnectionManager::complete_open
//! [`on_signal`]: LiveConnectionManager::on_signal

use std::fmt;

use serde::{Deserialize, Serialize};
use shared::{
    domain::{ConversationPair, Message, MessageOrigin},
    protocol::parse_live_frame,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{
    error::{ClientError, ClientResult},
    live::{LiveSignal, LiveSocket},
};

pub const UNKNOWN_SENDER: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Opening => "opening",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Proof that an `Opening` was started; stale once another open or a close happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenTicket {
    pub connection_id: ConnectionId,
    pub pair: ConversationPair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionChange {
    pub connection_id: ConnectionId,
    pub pair: ConversationPair,
    pub state: ConnectionState,
}

#[derive(Debug)]
pub enum OpenOutcome {
    Opened {
        inbound: Option<mpsc::UnboundedReceiver<LiveSignal>>,
    },
    /// The ticket was superseded while connecting; the socket has been closed.
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    /// The signal belongs to a connection that is no longer current.
    Ignored,
    Inbound(Message),
    Error(String),
    Closed { code: Option<u16>, reason: String },
}

pub struct LiveConnectionManager {
    state: ConnectionState,
    pair: Option<ConversationPair>,
    current: Option<ConnectionId>,
    socket: Option<LiveSocket>,
    next_id: u64,
    changes: Vec<ConnectionChange>,
}

impl Default for LiveConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveConnectionManager {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Closed,
            pair: None,
            current: None,
            socket: None,
            next_id: 1,
            changes: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn pair(&self) -> Option<ConversationPair> {
        self.pair
    }

    pub fn current_id(&self) -> Option<ConnectionId> {
        self.current
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Transitions recorded since the last drain, oldest first.
    pub fn drain_changes(&mut self) -> Vec<ConnectionChange> {
        std::mem::take(&mut self.changes)
    }

    fn transition(&mut self, state: ConnectionState) {
        self.state = state;
        if let (Some(connection_id), Some(pair)) = (self.current, self.pair) {
            self.changes.push(ConnectionChange {
                connection_id,
                pair,
                state,
            });
        }
    }

    /// Starts `Opening` for `pair`, closing whatever handle is held first.
    pub fn begin_open(&mut self, pair: ConversationPair) -> OpenTicket {
        if self.state != ConnectionState::Closed {
            self.close("superseded by a new connection");
        }

        let connection_id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.current = Some(connection_id);
        self.pair = Some(pair);
        self.transition(ConnectionState::Opening);
        info!(connection_id = connection_id.0, pair = %pair, "ws: opening");

        OpenTicket {
            connection_id,
            pair,
        }
    }

    /// Moves to `Open` and hands back the inbound stream, or closes the socket
    /// if the ticket was superseded while connecting.
    pub fn complete_open(&mut self, ticket: OpenTicket, mut socket: LiveSocket) -> OpenOutcome {
        if self.current != Some(ticket.connection_id) || self.state != ConnectionState::Opening {
            info!(
                connection_id = ticket.connection_id.0,
                pair = %ticket.pair,
                "ws: discarding socket for superseded open"
            );
            socket.close();
            return OpenOutcome::Discarded;
        }

        let inbound = socket.take_inbound();
        self.socket = Some(socket);
        self.transition(ConnectionState::Open);
        info!(connection_id = ticket.connection_id.0, pair = %ticket.pair, "ws: connected");
        OpenOutcome::Opened { inbound }
    }

    pub fn fail_open(&mut self, ticket: OpenTicket, reason: &str) {
        warn!(
            connection_id = ticket.connection_id.0,
            pair = %ticket.pair,
            "ws: open failed: {reason}"
        );
        if self.current != Some(ticket.connection_id) || self.state != ConnectionState::Opening {
            return;
        }
        self.transition(ConnectionState::Closed);
        self.current = None;
        self.pair = None;
    }

    /// Releases the handle unconditionally. A no-op when already closed.
    pub fn close(&mut self, reason: &str) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if let Some(connection_id) = self.current {
            info!(connection_id = connection_id.0, "ws: closing ({reason})");
        }
        if self.state != ConnectionState::Closing {
            self.transition(ConnectionState::Closing);
        }
        if let Some(socket) = self.socket.take() {
            socket.close();
        }
        self.transition(ConnectionState::Closed);
        self.current = None;
        self.pair = None;
    }

    /// Applies an inbound signal from `connection_id`. Frames are attributed to
    /// `peer_display_name` when they are not structured payloads.
    pub fn on_signal(
        &mut self,
        connection_id: ConnectionId,
        signal: LiveSignal,
        peer_display_name: &str,
    ) -> SignalOutcome {
        if self.current != Some(connection_id) {
            return SignalOutcome::Ignored;
        }

        match signal {
            LiveSignal::Frame(text) => {
                if self.state != ConnectionState::Open {
                    return SignalOutcome::Ignored;
                }
                SignalOutcome::Inbound(decode_frame(&text, peer_display_name))
            }
            LiveSignal::Error(err) => {
                warn!(connection_id = connection_id.0, "ws: error: {err}");
                SignalOutcome::Error(err)
            }
            LiveSignal::Closed { code, reason } => {
                info!(connection_id = connection_id.0, ?code, "ws: closed: {reason}");
                // The remote side is gone; dropping the handle only releases local resources.
                self.socket.take();
                self.transition(ConnectionState::Closed);
                self.current = None;
                self.pair = None;
                SignalOutcome::Closed { code, reason }
            }
        }
    }

    pub fn send(&self, text: &str) -> ClientResult<()> {
        if self.state != ConnectionState::Open {
            return Err(ClientError::NotConnected);
        }
        let socket = self.socket.as_ref().ok_or(ClientError::NotConnected)?;
        socket
            .send_text(text)
            .map_err(|err| ClientError::Transport(err.to_string()))
    }
}

/// Structured `{Content, SenderName}` frames keep their sender; anything else is
/// raw text from the selected peer.
pub fn decode_frame(text: &str, peer_display_name: &str) -> Message {
    match parse_live_frame(text) {
        Some(frame) => Message::new(frame.sender_name, frame.content, MessageOrigin::Live),
        None => {
            let sender = if peer_display_name.is_empty() {
                UNKNOWN_SENDER
            } else {
                peer_display_name
            };
            Message::new(sender, text, MessageOrigin::Live)
        }
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
