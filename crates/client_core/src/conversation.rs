use std::collections::VecDeque;

use shared::domain::{Message, MessageOrigin, UserId};
use tracing::{debug, warn};

use crate::{error::ClientResult, transport::ChatBackend};

const MAX_OUTSTANDING_ECHOES: usize = 64;

/// Ordered messages of the active conversation. Insertion order is the only
/// ordering; nothing is ever reordered or replaced.
#[derive(Debug, Default)]
pub struct ConversationStore {
    messages: Vec<Message>,
    // Local echoes the backend might still send back over the live connection.
    outstanding_echoes: VecDeque<String>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.messages.clear();
        self.outstanding_echoes.clear();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Fetches the stored conversation. No prior history is an empty list.
    pub async fn load_history(
        backend: &dyn ChatBackend,
        user_id: UserId,
        peer_id: UserId,
    ) -> ClientResult<Vec<Message>> {
        match backend.history(user_id, peer_id).await {
            Ok(messages) => Ok(messages),
            Err(err) if err.is_not_found() => {
                debug!(user_id = user_id.0, peer_id = peer_id.0, "history: none stored");
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    pub fn seed_history(&mut self, history: Vec<Message>) {
        if !self.messages.is_empty() {
            warn!(
                existing = self.messages.len(),
                "history: seeding a conversation that already has messages"
            );
        }
        self.messages.extend(history.into_iter().map(|mut message| {
            message.origin = MessageOrigin::Historical;
            message
        }));
    }

    /// Appends a pushed message. Returns `false` when it was the backend echoing
    /// one of our own local messages.
    pub fn append_live(&mut self, message: Message, self_display_name: &str) -> bool {
        if !self_display_name.is_empty() && message.sender_display_name == self_display_name {
            if let Some(index) = self
                .outstanding_echoes
                .iter()
                .position(|content| *content == message.content)
            {
                self.outstanding_echoes.remove(index);
                debug!("conversation: suppressed echo of local message");
                return false;
            }
        }
        self.messages.push(Message {
            origin: MessageOrigin::Live,
            ..message
        });
        true
    }

    pub fn append_local(&mut self, content: &str, self_display_name: &str) -> Message {
        let message = Message::new(self_display_name, content, MessageOrigin::Local);
        if self.outstanding_echoes.len() == MAX_OUTSTANDING_ECHOES {
            self.outstanding_echoes.pop_front();
        }
        self.outstanding_echoes.push_back(content.to_string());
        self.messages.push(message.clone());
        message
    }

    /// Undoes the most recent local echo when its send failed outright.
    pub fn retract_local(&mut self, message: &Message) -> bool {
        if self.messages.last() != Some(message) || message.origin != MessageOrigin::Local {
            return false;
        }
        self.messages.pop();
        if let Some(index) = self
            .outstanding_echoes
            .iter()
            .rposition(|content| *content == message.content)
        {
            self.outstanding_echoes.remove(index);
        }
        true
    }
}

#[cfg(test)]
#[path = "tests/conversation_tests.rs"]
mod tests;
