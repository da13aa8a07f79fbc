use crate::entity::{UserId, UserRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix reserved for ids minted on the client before the server confirms a message.
pub const PROVISIONAL_PREFIX: &str = "tmp_";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a locally unique id that can never collide with a server id.
    pub fn provisional() -> Self {
        Self(format!("{}{}", PROVISIONAL_PREFIX, Uuid::new_v4().simple()))
    }

    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub url: String,
    #[serde(default)]
    pub caption: Option<String>,
}

impl fmt::Display for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            AttachmentKind::Image => write!(f, "[image] {}", self.url),
            AttachmentKind::Video => write!(f, "[video] {}", self.url),
            AttachmentKind::File => {
                let label = self.caption.as_deref().unwrap_or(&self.url);
                write!(f, "[file] {}", label)
            }
        }
    }
}

/// Raw file handed to the upload endpoint. The server answers with a full message.
#[derive(Debug, Clone)]
pub struct AttachmentUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl AttachmentUpload {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Build an unconfirmed message stamped with the client clock.
    pub fn provisional(
        conversation_id: ConversationId,
        sender_id: UserId,
        recipient_id: UserId,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::provisional(),
            conversation_id,
            sender_id,
            recipient_id,
            text: Some(text.into()),
            attachments: Vec::new(),
            created_at: Utc::now(),
            read_at: None,
        }
    }

    pub fn is_provisional(&self) -> bool {
        self.id.is_provisional()
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.sender_id)?;
        if let Some(text) = &self.text {
            f.write_str(text)?;
        }
        for attachment in &self.attachments {
            write!(f, " {}", attachment)?;
        }
        if self.is_provisional() {
            f.write_str(" (sending)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user: UserRef,
    #[serde(default)]
    pub unread_count: u32,
}

impl Participant {
    pub fn new(user: UserRef) -> Self {
        Self {
            user,
            unread_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: [Participant; 2],
    #[serde(default)]
    pub last_message_preview: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, a: UserRef, b: UserRef) -> Self {
        Self {
            id: ConversationId::new(id),
            participants: [Participant::new(a), Participant::new(b)],
            last_message_preview: None,
            last_message_at: None,
        }
    }

    pub fn participant(&self, user: &UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.user.id == user)
    }

    pub fn participant_mut(&mut self, user: &UserId) -> Option<&mut Participant> {
        self.participants.iter_mut().find(|p| &p.user.id == user)
    }

    /// The other side of the conversation as seen by `me`.
    pub fn peer(&self, me: &UserId) -> Option<&UserRef> {
        match &self.participants {
            [a, b] if &a.user.id == me => Some(&b.user),
            [a, b] if &b.user.id == me => Some(&a.user),
            _ => None,
        }
    }

    pub fn unread_for(&self, user: &UserId) -> u32 {
        self.participant(user).map(|p| p.unread_count).unwrap_or(0)
    }
}
