use async_trait::async_trait;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::api::InboxApi;
use crate::bus::{EventBus, PanelEvent};
use crate::chat::{AttachmentUpload, Conversation, ConversationId, Message, MessageId};
use crate::entity::UserId;
use crate::presence::PresenceView;
use crate::scheduler::{PollIntervals, PollState, Poller, PollingScheduler};
use crate::send::{OptimisticSendController, SendRejected};
use crate::store::{ConversationStore, MessageStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing was sent and nothing changed
    Rejected(SendRejected),
    /// Server accepted the message under this id
    Confirmed(MessageId),
    /// Provisional entry rolled back, text restored to the draft
    Failed,
}

/// What the UI renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelSnapshot {
    pub open: bool,
    pub conversations: Vec<Conversation>,
    pub selected: Option<ConversationId>,
    pub messages: Vec<Message>,
    /// Last own message the peer has read
    pub seen: Option<MessageId>,
    pub draft: String,
    pub error: Option<String>,
    pub loading_conversations: bool,
    pub loading_messages: bool,
    pub uploading: bool,
    pub total_unread: usize,
}

#[derive(Default)]
struct PanelState {
    open: bool,
    selected: Option<ConversationId>,
    conversations: ConversationStore,
    messages: MessageStore,
    sender: OptimisticSendController,
    error: Option<String>,
    loading_conversations: bool,
    loading_messages: bool,
    uploading: bool,
    /// Bumped on every open and close.
    session: u64,
    /// Bumped on every selection, including re-selecting the same conversation.
    selection: u64,
}

/// Where the panel stood when a request went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticket {
    session: u64,
    selection: u64,
}

impl PanelState {
    fn ticket(&self) -> Ticket {
        Ticket {
            session: self.session,
            selection: self.selection,
        }
    }

    /// The panel is open and showing `id`.
    fn shows(&self, id: &ConversationId) -> bool {
        self.open && self.selected.as_ref() == Some(id)
    }

    /// A message response for `id` may only land if nothing was closed, reopened
    /// or reselected since the request went out.
    fn accepts(&self, id: &ConversationId, ticket: Ticket) -> bool {
        self.shows(id) && self.ticket() == ticket
    }
}

/// Fetches triggered by the user surface their errors; poll ticks only log them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Explicit,
    Poll,
}

struct Inner {
    me: UserId,
    api: Arc<dyn InboxApi>,
    presence: Arc<dyn PresenceView>,
    bus: EventBus,
    state: Mutex<PanelState>,
    scheduler: Mutex<PollingScheduler>,
}

/// Direct-message panel: conversation list, selected thread, optimistic sends and polling.
///
/// Cheap to clone; clones share state. The state lock is never held across a
/// request, so a slow response never blocks the UI. Responses that arrive after
/// the panel closed or the selection moved on are dropped.
#[derive(Clone)]
pub struct DmPanel {
    inner: Arc<Inner>,
}

impl DmPanel {
    pub fn new(
        me: UserId,
        api: Arc<dyn InboxApi>,
        presence: Arc<dyn PresenceView>,
        intervals: PollIntervals,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                me,
                api,
                presence,
                bus: EventBus::new(),
                state: Mutex::new(PanelState::default()),
                scheduler: Mutex::new(PollingScheduler::new(intervals)),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, PanelState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn scheduler(&self) -> MutexGuard<'_, PollingScheduler> {
        self.inner
            .scheduler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: PanelEvent) {
        self.inner.bus.publish(event);
    }

    fn fail(&self, state: &mut PanelState, message: String) {
        state.error = Some(message.clone());
        self.publish(PanelEvent::Error(message));
    }

    pub fn me(&self) -> &UserId {
        &self.inner.me
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.inner.bus.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    pub fn poll_state(&self) -> PollState {
        self.scheduler().state()
    }

    pub fn snapshot(&self) -> PanelSnapshot {
        let state = self.state();
        PanelSnapshot {
            open: state.open,
            conversations: state.conversations.conversations().to_vec(),
            selected: state.selected.clone(),
            messages: state.messages.messages().to_vec(),
            seen: state
                .messages
                .last_seen_own(&self.inner.me)
                .map(|m| m.id.clone()),
            draft: state.sender.draft().to_string(),
            error: state.error.clone(),
            loading_conversations: state.loading_conversations,
            loading_messages: state.loading_messages,
            uploading: state.uploading,
            total_unread: state.conversations.total_unread(&self.inner.me),
        }
    }

    pub fn total_unread(&self) -> usize {
        self.state().conversations.total_unread(&self.inner.me)
    }

    pub fn is_peer_online(&self, conversation: &ConversationId) -> bool {
        let state = self.state();
        state
            .conversations
            .get(conversation)
            .and_then(|c| c.peer(&self.inner.me))
            .map(|peer| self.inner.presence.is_online(&peer.id))
            .unwrap_or(false)
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        self.state().sender.set_draft(text);
    }

    pub fn clear_error(&self) {
        self.state().error = None;
    }

    /// Show the panel: fetch the inbox and start polling.
    pub async fn open(&self) {
        let reopen_selected = {
            let mut state = self.state();
            if state.open {
                return;
            }
            state.open = true;
            state.session += 1;
            state.selected.clone()
        };
        info!("DM panel opened for {}", self.inner.me);
        self.publish(PanelEvent::Opened);
        self.scheduler().start(PanelRef(Arc::downgrade(&self.inner)));

        self.load_conversations(Trigger::Explicit).await;
        if let Some(id) = reopen_selected {
            self.load_messages(&id, Trigger::Explicit).await;
        }
    }

    /// Hide the panel. Requests already on the wire are left alone; their results are ignored.
    pub fn close(&self) {
        {
            let mut state = self.state();
            if !state.open {
                return;
            }
            state.open = false;
            state.session += 1;
            state.loading_conversations = false;
            state.loading_messages = false;
        }
        self.scheduler().stop();
        info!("DM panel closed");
        self.publish(PanelEvent::Closed);
    }

    pub async fn refresh_conversations(&self) {
        self.load_conversations(Trigger::Explicit).await;
    }

    async fn load_conversations(&self, trigger: Trigger) {
        let session = {
            let mut state = self.state();
            if !state.open {
                return;
            }
            if trigger == Trigger::Explicit {
                state.loading_conversations = true;
            }
            state.session
        };

        let result = self.inner.api.list_inbox().await;

        let mut state = self.state();
        if !state.open || state.session != session {
            debug!("Discarding inbox response from an earlier session");
            return;
        }
        if trigger == Trigger::Explicit {
            state.loading_conversations = false;
        }
        let conversations = match result {
            Ok(conversations) => conversations,
            Err(e) if trigger == Trigger::Explicit => {
                warn!("Failed to load conversations: {}", e);
                Vec::new()
            }
            Err(e) => {
                warn!("Conversation poll failed: {}", e);
                return;
            }
        };
        if state.conversations.replace(conversations) {
            drop(state);
            self.publish(PanelEvent::ConversationsUpdated);
        }
    }

    /// Switch the thread shown in the panel and mark it read.
    ///
    /// Selecting the conversation already shown keeps its list, including sends
    /// still in flight, and only reloads it.
    pub async fn select_conversation(&self, id: ConversationId) {
        {
            let mut state = self.state();
            state.selection += 1;
            if state.selected.as_ref() != Some(&id) {
                state.selected = Some(id.clone());
                state.messages.reset(Some(id.clone()));
            }
            state.loading_messages = false;
            state.error = None;
        }
        debug!("Selected conversation {}", id);
        self.publish(PanelEvent::MessagesUpdated(id.clone()));
        self.mark_read(&id);
        self.load_messages(&id, Trigger::Explicit).await;
    }

    /// Load the selected thread again after a failure.
    pub async fn retry_messages(&self) {
        let selected = self.state().selected.clone();
        if let Some(id) = selected {
            self.load_messages(&id, Trigger::Explicit).await;
        }
    }

    async fn load_messages(&self, id: &ConversationId, trigger: Trigger) {
        let ticket = {
            let mut state = self.state();
            if !state.shows(id) {
                return;
            }
            if trigger == Trigger::Explicit {
                state.loading_messages = true;
            }
            state.ticket()
        };

        let result = self.inner.api.list_messages(id).await;

        let mut state = self.state();
        if !state.accepts(id, ticket) {
            debug!(
                "Discarding messages for {} (selected: {:?}, open: {})",
                id, state.selected, state.open
            );
            return;
        }
        if trigger == Trigger::Explicit {
            state.loading_messages = false;
        }
        match result {
            Ok(page) => {
                if trigger == Trigger::Explicit {
                    state.error = None;
                }
                let mut conversations_changed = false;
                if state.conversations.get(&page.conversation.id).is_none() {
                    state.conversations.upsert_front(page.conversation);
                    conversations_changed = true;
                }
                let messages_changed = state.messages.merge(page.messages);
                drop(state);
                if conversations_changed {
                    self.publish(PanelEvent::ConversationsUpdated);
                }
                if messages_changed {
                    self.publish(PanelEvent::MessagesUpdated(id.clone()));
                }
            }
            Err(e) if trigger == Trigger::Explicit => {
                warn!("Failed to load messages for {}: {}", id, e);
                self.fail(&mut state, format!("Failed to load messages: {}", e));
            }
            Err(e) => warn!("Message poll for {} failed: {}", id, e),
        }
    }

    /// Clear our unread counter now and tell the server in the background.
    /// A failed call is only logged; the next refresh corrects the counter.
    pub fn mark_read(&self, id: &ConversationId) {
        let changed = self.state().conversations.mark_read(id, &self.inner.me);
        if changed {
            self.publish(PanelEvent::ConversationsUpdated);
        }

        let api = self.inner.api.clone();
        let id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = api.mark_read(&id).await {
                warn!("Failed to mark {} as read: {}", id, e);
            }
        });
    }

    /// Send `text` to the selected conversation.
    ///
    /// The message shows up immediately under a provisional id and is swapped
    /// for the server's copy once confirmed. On failure it disappears again and
    /// the text goes back into the draft.
    pub async fn send(&self, text: &str) -> SendOutcome {
        let pending = {
            let mut state = self.state();
            let PanelState {
                selected,
                conversations,
                messages,
                sender,
                ..
            } = &mut *state;

            let recipient = selected
                .as_ref()
                .and_then(|id| conversations.get(id))
                .and_then(|c| c.peer(&self.inner.me))
                .map(|peer| peer.id.clone());
            let Some(recipient) = recipient else {
                return SendOutcome::Rejected(SendRejected::NoConversation);
            };
            match sender.begin(messages, &self.inner.me, &recipient, text) {
                Ok(pending) => pending,
                Err(rejected) => return SendOutcome::Rejected(rejected),
            }
        };
        self.publish(PanelEvent::MessagesUpdated(pending.conversation.clone()));
        self.publish(PanelEvent::ScrollToBottom);

        let result = self
            .inner
            .api
            .send_message(&pending.conversation, &pending.body)
            .await;

        let (outcome, visible) = {
            let mut state = self.state();
            let PanelState {
                messages, sender, ..
            } = &mut *state;
            let outcome = match result {
                Ok(confirmed) => {
                    let id = confirmed.id.clone();
                    sender.confirm(messages, &pending, confirmed);
                    SendOutcome::Confirmed(id)
                }
                Err(e) => {
                    error!("Failed to send message to {}: {}", pending.conversation, e);
                    sender.rollback(messages, pending.clone());
                    self.fail(&mut state, format!("Failed to send message: {}", e));
                    SendOutcome::Failed
                }
            };
            (outcome, state.shows(&pending.conversation))
        };
        if visible {
            self.publish(PanelEvent::MessagesUpdated(pending.conversation.clone()));
        }

        self.load_conversations(Trigger::Poll).await;
        outcome
    }

    /// Upload a file into the selected conversation. The server answers with the message
    /// carrying it, so a failed upload never leaves a partial message behind.
    pub async fn upload(&self, file: AttachmentUpload) -> bool {
        let conversation = {
            let mut state = self.state();
            let Some(id) = state.selected.clone() else {
                return false;
            };
            state.uploading = true;
            state.error = None;
            id
        };

        let result = self.inner.api.upload_attachment(&conversation, file).await;

        let uploaded = {
            let mut state = self.state();
            state.uploading = false;
            match result {
                Ok(message) => {
                    let shown = state.messages.conversation() == Some(&message.conversation_id)
                        && state.messages.push_unique(message);
                    drop(state);
                    if shown {
                        self.publish(PanelEvent::MessagesUpdated(conversation.clone()));
                        self.publish(PanelEvent::ScrollToBottom);
                    }
                    true
                }
                Err(e) => {
                    error!("Failed to upload attachment to {}: {}", conversation, e);
                    self.fail(&mut state, format!("Failed to upload attachment: {}", e));
                    false
                }
            }
        };

        self.load_conversations(Trigger::Poll).await;
        uploaded
    }

    /// Open (or find) the conversation with `target` and select it.
    pub async fn start_conversation(
        &self,
        community_id: &str,
        target: &UserId,
    ) -> Option<ConversationId> {
        match self
            .inner
            .api
            .start_peer_conversation(community_id, target)
            .await
        {
            Ok(conversation) => {
                let id = conversation.id.clone();
                self.state().conversations.upsert_front(conversation);
                self.publish(PanelEvent::ConversationsUpdated);
                self.select_conversation(id.clone()).await;
                Some(id)
            }
            Err(e) => {
                warn!("Failed to start conversation with {}: {}", target, e);
                let mut state = self.state();
                self.fail(&mut state, format!("Could not start conversation: {}", e));
                None
            }
        }
    }
}

#[async_trait]
impl Poller for DmPanel {
    async fn poll_conversations(&self) -> ControlFlow<()> {
        self.load_conversations(Trigger::Poll).await;
        ControlFlow::Continue(())
    }

    async fn poll_messages(&self) -> ControlFlow<()> {
        let selected = self.state().selected.clone();
        if let Some(id) = selected {
            self.load_messages(&id, Trigger::Poll).await;
        }
        ControlFlow::Continue(())
    }
}

/// Handle given to the poll loops so they do not keep the panel alive.
#[derive(Clone)]
struct PanelRef(Weak<Inner>);

impl PanelRef {
    fn upgrade(&self) -> Option<DmPanel> {
        self.0.upgrade().map(|inner| DmPanel { inner })
    }
}

#[async_trait]
impl Poller for PanelRef {
    async fn poll_conversations(&self) -> ControlFlow<()> {
        match self.upgrade() {
            Some(panel) => panel.poll_conversations().await,
            None => ControlFlow::Break(()),
        }
    }

    async fn poll_messages(&self) -> ControlFlow<()> {
        match self.upgrade() {
            Some(panel) => panel.poll_messages().await,
            None => ControlFlow::Break(()),
        }
    }
}
