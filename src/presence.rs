use crate::entity::UserId;
use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

/// Read-only view over whoever tracks online users. The panel only asks.
pub trait PresenceView: Send + Sync {
    fn is_online(&self, user: &UserId) -> bool;
}

/// Set-backed presence the host keeps up to date from its realtime channel.
#[derive(Debug, Default)]
pub struct OnlineUsers {
    online: RwLock<HashSet<UserId>>,
}

impl OnlineUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, user: UserId) {
        self.online
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user);
    }

    pub fn set_offline(&self, user: &UserId) {
        self.online
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(user);
    }

    /// Swap in a full snapshot, as delivered on reconnect.
    pub fn replace(&self, users: impl IntoIterator<Item = UserId>) {
        let mut online = self.online.write().unwrap_or_else(PoisonError::into_inner);
        *online = users.into_iter().collect();
    }
}

impl PresenceView for OnlineUsers {
    fn is_online(&self, user: &UserId) -> bool {
        self.online
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(user)
    }
}

/// Presence for hosts without a realtime channel: nobody is shown online.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPresence;

impl PresenceView for NoPresence {
    fn is_online(&self, _user: &UserId) -> bool {
        false
    }
}
