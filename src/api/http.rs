use super::{
    ConversationResponse, InboxApi, InboxResponse, MessagePage, MessageResponse,
    SendMessageRequest, StartConversationRequest,
};
use crate::chat::{AttachmentUpload, Conversation, ConversationId, Message};
use crate::entity::UserId;
use crate::error::ApiError;
use async_trait::async_trait;
use reqwest::{multipart, Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// `InboxApi` over the platform's REST endpoints.
#[derive(Clone, Debug)]
pub struct HttpInboxApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpInboxApi {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(serde_json::from_slice(&body)?)
    }

    fn conversation_path(conversation: &ConversationId, tail: &str) -> String {
        format!("/dm/conversations/{}{}", conversation, tail)
    }
}

#[async_trait]
impl InboxApi for HttpInboxApi {
    async fn list_inbox(&self) -> Result<Vec<Conversation>, ApiError> {
        let response = self.request(Method::GET, "/dm/inbox").send().await?;
        let inbox: InboxResponse = Self::decode(response).await?;
        Ok(inbox.conversations)
    }

    async fn list_messages(&self, conversation: &ConversationId) -> Result<MessagePage, ApiError> {
        let path = Self::conversation_path(conversation, "/messages");
        let response = self.request(Method::GET, &path).send().await?;
        Self::decode(response).await
    }

    async fn start_peer_conversation(
        &self,
        community_id: &str,
        target: &UserId,
    ) -> Result<Conversation, ApiError> {
        let path = format!("/communities/{}/dm/peer", community_id);
        let body = StartConversationRequest {
            target_user_id: target.clone(),
        };
        let response = self.request(Method::POST, &path).json(&body).send().await?;
        let started: ConversationResponse = Self::decode(response).await?;
        Ok(started.conversation)
    }

    async fn send_message(
        &self,
        conversation: &ConversationId,
        text: &str,
    ) -> Result<Message, ApiError> {
        let path = Self::conversation_path(conversation, "/messages");
        let body = SendMessageRequest {
            text: text.to_string(),
        };
        let response = self.request(Method::POST, &path).json(&body).send().await?;
        let sent: MessageResponse = Self::decode(response).await?;
        Ok(sent.message)
    }

    async fn upload_attachment(
        &self,
        conversation: &ConversationId,
        file: AttachmentUpload,
    ) -> Result<Message, ApiError> {
        let path = Self::conversation_path(conversation, "/attachments");
        let part = multipart::Part::bytes(file.bytes)
            .file_name(file.file_name)
            .mime_str(&file.content_type)?;
        let form = multipart::Form::new().part("file", part);
        let response = self
            .request(Method::POST, &path)
            .multipart(form)
            .send()
            .await?;
        let uploaded: MessageResponse = Self::decode(response).await?;
        Ok(uploaded.message)
    }

    async fn mark_read(&self, conversation: &ConversationId) -> Result<(), ApiError> {
        let path = Self::conversation_path(conversation, "/read");
        let response = self.request(Method::POST, &path).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
