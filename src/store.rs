use crate::chat::{Conversation, ConversationId, Message, MessageId};
use crate::entity::UserId;

/// Conversations visible to the current user, in the order the inbox returned them.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    /// Apply a refresh result. Returns whether anything changed.
    pub fn replace(&mut self, conversations: Vec<Conversation>) -> bool {
        if self.conversations == conversations {
            return false;
        }
        self.conversations = conversations;
        true
    }

    /// Insert or update a conversation and move it to the top.
    pub fn upsert_front(&mut self, conversation: Conversation) {
        self.conversations.retain(|c| c.id != conversation.id);
        self.conversations.insert(0, conversation);
    }

    /// Zero `me`'s unread counter without waiting for the server.
    /// Returns true if there was something to clear.
    pub fn mark_read(&mut self, id: &ConversationId, me: &UserId) -> bool {
        let participant = self
            .conversations
            .iter_mut()
            .find(|c| &c.id == id)
            .and_then(|c| c.participant_mut(me));
        match participant {
            Some(p) if p.unread_count > 0 => {
                p.unread_count = 0;
                true
            }
            _ => false,
        }
    }

    /// Badge value: conversations with unread messages, not the number of messages.
    pub fn total_unread(&self, me: &UserId) -> usize {
        self.conversations
            .iter()
            .filter(|c| c.unread_for(me) > 0)
            .count()
    }
}

/// Message list of the selected conversation, mixing confirmed and in-flight entries.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    conversation: Option<ConversationId>,
    messages: Vec<Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation(&self) -> Option<&ConversationId> {
        self.conversation.as_ref()
    }

    /// Point the store at another conversation and drop everything it held.
    pub fn reset(&mut self, conversation: Option<ConversationId>) {
        self.conversation = conversation;
        self.messages.clear();
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

    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| &m.id == id)
    }

    /// Provisional entries whose send has not resolved yet, in append order.
    pub fn pending(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.is_provisional())
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append unless a message with the same id is already present.
    pub fn push_unique(&mut self, message: Message) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let pos = self.messages.iter().position(|m| &m.id == id)?;
        Some(self.messages.remove(pos))
    }

    /// Apply a load or poll result.
    ///
    /// The confirmed part of the list is replaced wholesale, but only when the
    /// result differs from it: another length, another last id, or another read
    /// timestamp on the last message. Provisional entries still waiting on their
    /// send are appended again after a replace. Returns whether anything changed.
    pub fn merge(&mut self, incoming: Vec<Message>) -> bool {
        let count = self.messages.iter().filter(|m| !m.is_provisional()).count();
        let last = self
            .messages
            .iter()
            .rev()
            .find(|m| !m.is_provisional())
            .map(|m| (&m.id, m.read_at));
        let incoming_last = incoming.last().map(|m| (&m.id, m.read_at));
        if count == incoming.len() && last == incoming_last {
            return false;
        }

        let pending: Vec<Message> = self
            .messages
            .drain(..)
            .filter(|m| m.is_provisional())
            .collect();
        self.messages = incoming;
        self.messages.extend(pending);
        true
    }

    /// Last confirmed message from `me` that the peer has read, for the "Seen" marker.
    pub fn last_seen_own(&self, me: &UserId) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .filter(|m| !m.is_provisional() && &m.sender_id == me)
            .find(|m| m.is_read())
    }
}
