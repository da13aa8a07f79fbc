use crate::chat::{ConversationId, Message, MessageId};
use crate::entity::UserId;
use crate::store::MessageStore;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendRejected {
    #[error("message is empty")]
    EmptyText,
    #[error("no conversation selected")]
    NoConversation,
}

/// A provisional entry waiting on its send request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub provisional_id: MessageId,
    pub conversation: ConversationId,
    /// Text sent to the server.
    pub body: String,
    /// Text exactly as typed, restored to the input if the send fails.
    pub typed: String,
}

/// Owns the input field and reconciles provisional messages with server answers.
///
/// Sends are not serialized: every call to `begin` produces an independent
/// provisional entry, each resolved on its own by `confirm` or `rollback`.
#[derive(Debug, Default)]
pub struct OptimisticSendController {
    draft: String,
}

impl OptimisticSendController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Show the message right away and clear the input.
    pub fn begin(
        &mut self,
        store: &mut MessageStore,
        sender: &UserId,
        recipient: &UserId,
        text: &str,
    ) -> Result<PendingSend, SendRejected> {
        let body = text.trim();
        if body.is_empty() {
            return Err(SendRejected::EmptyText);
        }
        let conversation = store
            .conversation()
            .cloned()
            .ok_or(SendRejected::NoConversation)?;

        let message = Message::provisional(
            conversation.clone(),
            sender.clone(),
            recipient.clone(),
            body,
        );
        let pending = PendingSend {
            provisional_id: message.id.clone(),
            conversation,
            body: body.to_string(),
            typed: text.to_string(),
        };
        store.push(message);
        self.draft.clear();
        Ok(pending)
    }

    /// Swap the provisional entry for the confirmed one.
    ///
    /// The confirmed message is only appended if a poll has not already brought
    /// it in, and only while the store still shows its conversation. Returns
    /// whether it was appended.
    pub fn confirm(
        &mut self,
        store: &mut MessageStore,
        pending: &PendingSend,
        confirmed: Message,
    ) -> bool {
        store.remove(&pending.provisional_id);
        if store.conversation() != Some(&confirmed.conversation_id) {
            return false;
        }
        store.push_unique(confirmed)
    }

    /// Drop the provisional entry and put the typed text back in the input.
    ///
    /// The draft belongs to whatever thread is shown, so it is left alone once
    /// the store has moved on to another conversation. Returns whether the text
    /// was restored.
    pub fn rollback(&mut self, store: &mut MessageStore, pending: PendingSend) -> bool {
        store.remove(&pending.provisional_id);
        if store.conversation() != Some(&pending.conversation) {
            return false;
        }
        self.draft = pending.typed;
        true
    }
}
