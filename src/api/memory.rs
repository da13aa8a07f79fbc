use super::{InboxApi, MessagePage};
use crate::chat::{
    Attachment, AttachmentKind, AttachmentUpload, Conversation, ConversationId, Message, MessageId,
};
use crate::entity::{UserId, UserRef};
use crate::error::ApiError;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListInbox,
    ListMessages,
    StartConversation,
    SendMessage,
    Upload,
    MarkRead,
}

/// Holds responses of one operation until released, one call per permit.
#[derive(Clone, Debug)]
pub struct Gate {
    permits: Arc<Semaphore>,
}

impl Gate {
    fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn release(&self) {
        self.permits.add_permits(1);
    }

    async fn pass(&self) {
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<UserId, UserRef>,
    conversations: Vec<Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
    failing: HashSet<Operation>,
    gates: HashMap<Operation, Gate>,
    calls: HashMap<Operation, usize>,
    next_id: u64,
}

impl MemoryState {
    fn mint(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{}", prefix, self.next_id)
    }

    fn user(&self, id: &UserId) -> UserRef {
        self.users
            .get(id)
            .cloned()
            .unwrap_or_else(|| UserRef::new(id.as_str(), id.as_str()))
    }

    fn conversation_mut(&mut self, id: &ConversationId) -> Result<&mut Conversation, ApiError> {
        self.conversations
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| ApiError::Status {
                status: 404,
                body: format!("conversation {} not found", id),
            })
    }

    /// Append a message and bump the conversation to the top of the inbox.
    fn deliver(&mut self, message: Message) -> Result<Message, ApiError> {
        let conversation = self.conversation_mut(&message.conversation_id)?;
        conversation.last_message_preview = Some(preview(&message));
        conversation.last_message_at = Some(message.created_at);
        if let Some(recipient) = conversation.participant_mut(&message.recipient_id) {
            recipient.unread_count += 1;
        }
        if let Some(pos) = self
            .conversations
            .iter()
            .position(|c| c.id == message.conversation_id)
        {
            let conversation = self.conversations.remove(pos);
            self.conversations.insert(0, conversation);
        }
        self.messages
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message.clone());
        Ok(message)
    }
}

fn preview(message: &Message) -> String {
    match (&message.text, message.attachments.first()) {
        (Some(text), _) => text.clone(),
        (None, Some(attachment)) => attachment.to_string(),
        (None, None) => String::new(),
    }
}

/// In-process stand-in for the DM service, seen from one user's session.
#[derive(Clone)]
pub struct InMemoryInbox {
    me: UserId,
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryInbox {
    pub fn new(me: UserRef) -> Self {
        let mut state = MemoryState::default();
        let id = me.id.clone();
        state.users.insert(id.clone(), me);
        Self {
            me: id,
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_user(&self, user: UserRef) {
        self.state().users.insert(user.id.clone(), user);
    }

    pub fn add_conversation(&self, conversation: Conversation) {
        let mut state = self.state();
        state.messages.entry(conversation.id.clone()).or_default();
        state.conversations.push(conversation);
    }

    /// Replace the stored history of a conversation verbatim.
    pub fn set_messages(&self, conversation: &ConversationId, messages: Vec<Message>) {
        self.state().messages.insert(conversation.clone(), messages);
    }

    pub fn messages(&self, conversation: &ConversationId) -> Vec<Message> {
        self.state()
            .messages
            .get(conversation)
            .cloned()
            .unwrap_or_default()
    }

    /// Simulate the peer writing to us.
    pub fn receive(
        &self,
        conversation: &ConversationId,
        from: &UserId,
        text: &str,
    ) -> Result<Message, ApiError> {
        let mut state = self.state();
        let id = state.mint("m");
        let message = Message {
            id: MessageId::new(id),
            conversation_id: conversation.clone(),
            sender_id: from.clone(),
            recipient_id: self.me.clone(),
            text: Some(text.to_string()),
            attachments: Vec::new(),
            created_at: Utc::now(),
            read_at: None,
        };
        state.deliver(message)
    }

    /// Simulate the peer opening the conversation: our messages get a read timestamp.
    pub fn peer_reads(&self, conversation: &ConversationId) {
        let me = self.me.clone();
        let now = Utc::now();
        let mut state = self.state();
        if let Some(list) = state.messages.get_mut(conversation) {
            list.iter_mut()
                .filter(|m| m.sender_id == me && m.read_at.is_none())
                .for_each(|m| m.read_at = Some(now));
        }
    }

    pub fn set_failing(&self, op: Operation, failing: bool) {
        let mut state = self.state();
        if failing {
            state.failing.insert(op);
        } else {
            state.failing.remove(&op);
        }
    }

    /// From now on every `op` call waits for a `Gate::release`.
    pub fn hold(&self, op: Operation) -> Gate {
        self.state().gates.entry(op).or_insert_with(Gate::new).clone()
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    /// Count the call, wait on the gate if any, then report injected failure.
    async fn enter(&self, op: Operation) -> Result<(), ApiError> {
        let gate = {
            let mut state = self.state();
            *state.calls.entry(op).or_insert(0) += 1;
            state.gates.get(&op).cloned()
        };
        if let Some(gate) = gate {
            gate.pass().await;
        }
        if self.state().failing.contains(&op) {
            return Err(ApiError::unavailable(format!("{:?} failed", op)));
        }
        Ok(())
    }

    fn peer_of(
        &self,
        state: &mut MemoryState,
        conversation: &ConversationId,
    ) -> Result<UserId, ApiError> {
        let me = self.me.clone();
        let conversation = state.conversation_mut(conversation)?;
        conversation
            .peer(&me)
            .map(|u| u.id.clone())
            .ok_or_else(|| ApiError::Status {
                status: 403,
                body: "not a participant".to_string(),
            })
    }
}

#[async_trait]
impl InboxApi for InMemoryInbox {
    async fn list_inbox(&self) -> Result<Vec<Conversation>, ApiError> {
        self.enter(Operation::ListInbox).await?;
        let me = self.me.clone();
        Ok(self
            .state()
            .conversations
            .iter()
            .filter(|c| c.participant(&me).is_some())
            .cloned()
            .collect())
    }

    async fn list_messages(&self, conversation: &ConversationId) -> Result<MessagePage, ApiError> {
        self.enter(Operation::ListMessages).await?;
        let mut state = self.state();
        let found = state.conversation_mut(conversation)?.clone();
        let messages = state.messages.get(conversation).cloned().unwrap_or_default();
        Ok(MessagePage {
            conversation: found,
            messages,
        })
    }

    async fn start_peer_conversation(
        &self,
        _community_id: &str,
        target: &UserId,
    ) -> Result<Conversation, ApiError> {
        self.enter(Operation::StartConversation).await?;
        let mut state = self.state();
        let me = self.me.clone();
        if let Some(existing) = state
            .conversations
            .iter()
            .find(|c| c.participant(&me).is_some() && c.participant(target).is_some())
        {
            return Ok(existing.clone());
        }
        let mine = state.user(&me);
        let theirs = state.user(target);
        let id = state.mint("dm");
        let conversation = Conversation::new(id, mine, theirs);
        state.messages.entry(conversation.id.clone()).or_default();
        state.conversations.insert(0, conversation.clone());
        Ok(conversation)
    }

    async fn send_message(
        &self,
        conversation: &ConversationId,
        text: &str,
    ) -> Result<Message, ApiError> {
        self.enter(Operation::SendMessage).await?;
        let mut state = self.state();
        let recipient = self.peer_of(&mut state, conversation)?;
        let id = state.mint("m");
        let message = Message {
            id: MessageId::new(id),
            conversation_id: conversation.clone(),
            sender_id: self.me.clone(),
            recipient_id: recipient,
            text: Some(text.to_string()),
            attachments: Vec::new(),
            created_at: Utc::now(),
            read_at: None,
        };
        state.deliver(message)
    }

    async fn upload_attachment(
        &self,
        conversation: &ConversationId,
        file: AttachmentUpload,
    ) -> Result<Message, ApiError> {
        self.enter(Operation::Upload).await?;
        let mut state = self.state();
        let recipient = self.peer_of(&mut state, conversation)?;
        let kind = if file.content_type.starts_with("image/") {
            AttachmentKind::Image
        } else if file.content_type.starts_with("video/") {
            AttachmentKind::Video
        } else {
            AttachmentKind::File
        };
        let id = state.mint("m");
        let message = Message {
            id: MessageId::new(id),
            conversation_id: conversation.clone(),
            sender_id: self.me.clone(),
            recipient_id: recipient,
            text: None,
            attachments: vec![Attachment {
                kind,
                url: format!("memory://{}/{}", conversation, file.file_name),
                caption: Some(file.file_name),
            }],
            created_at: Utc::now(),
            read_at: None,
        };
        state.deliver(message)
    }

    async fn mark_read(&self, conversation: &ConversationId) -> Result<(), ApiError> {
        self.enter(Operation::MarkRead).await?;
        let me = self.me.clone();
        let mut state = self.state();
        if let Some(participant) = state.conversation_mut(conversation)?.participant_mut(&me) {
            participant.unread_count = 0;
        }
        Ok(())
    }
}
