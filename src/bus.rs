use crate::chat::ConversationId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PanelEvent {
    /// The conversation list or an unread counter changed
    ConversationsUpdated,

    /// The message list of the selected conversation changed
    MessagesUpdated(ConversationId),

    /// A message was appended locally; the view should follow it
    ScrollToBottom,

    /// The last operation failed; text is meant for display
    Error(String),

    /// Panel opened or closed
    Opened,
    Closed,
}

/// Slow subscribers past this many events see `RecvError::Lagged`.
pub const EVENT_CAPACITY: usize = 100;

/// Fan-out of panel changes to whoever renders them.
pub struct EventBus {
    tx: broadcast::Sender<PanelEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.tx.subscribe()
    }

    pub fn subscribers(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Returns how many subscribers saw the event.
    pub fn publish(&self, event: PanelEvent) -> usize {
        match self.tx.send(event) {
            Ok(seen) => seen,
            Err(broadcast::error::SendError(event)) => {
                trace!("No subscribers for {:?}", event);
                0
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
