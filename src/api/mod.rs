pub mod http;
pub mod memory;

use crate::chat::{AttachmentUpload, Conversation, ConversationId, Message};
use crate::entity::UserId;
use crate::error::ApiError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpInboxApi;
pub use memory::InMemoryInbox;

/// Remote DM endpoints the panel consumes. Request and response shapes belong to the service.
#[async_trait]
pub trait InboxApi: Send + Sync {
    async fn list_inbox(&self) -> Result<Vec<Conversation>, ApiError>;

    async fn list_messages(&self, conversation: &ConversationId) -> Result<MessagePage, ApiError>;

    /// Returns the existing conversation for the pair, or creates it.
    async fn start_peer_conversation(
        &self,
        community_id: &str,
        target: &UserId,
    ) -> Result<Conversation, ApiError>;

    async fn send_message(
        &self,
        conversation: &ConversationId,
        text: &str,
    ) -> Result<Message, ApiError>;

    async fn upload_attachment(
        &self,
        conversation: &ConversationId,
        file: AttachmentUpload,
    ) -> Result<Message, ApiError>;

    async fn mark_read(&self, conversation: &ConversationId) -> Result<(), ApiError>;
}

// Wire envelopes

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxResponse {
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePage {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub conversation: Conversation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: Message,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartConversationRequest {
    pub target_user_id: UserId,
}
