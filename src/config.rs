use anyhow::{Context, Result};
use std::time::Duration;

use crate::chat::ConversationId;
use crate::entity::UserId;
use crate::scheduler::PollIntervals;

/// Settings for the terminal client, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub api_token: Option<String>,
    pub user_id: UserId,
    pub intervals: PollIntervals,
    pub http_timeout: Duration,
    /// Conversation to select right after opening
    pub conversation: Option<ConversationId>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_url = lookup("DMSYNC_API_URL").context("DMSYNC_API_URL is not set")?;
        let user_id = lookup("DMSYNC_USER_ID").context("DMSYNC_USER_ID is not set")?;
        let api_token = lookup("DMSYNC_API_TOKEN").filter(|t| !t.is_empty());

        let defaults = PollIntervals::default();
        let intervals = PollIntervals {
            conversations: secs(&lookup, "DMSYNC_CONVERSATION_POLL_SECS", defaults.conversations)?,
            messages: secs(&lookup, "DMSYNC_MESSAGE_POLL_SECS", defaults.messages)?,
        };
        let http_timeout = secs(&lookup, "DMSYNC_HTTP_TIMEOUT_SECS", Duration::from_secs(30))?;

        Ok(Self {
            api_url,
            api_token,
            user_id: UserId::new(user_id),
            intervals,
            http_timeout,
            conversation: lookup("DMSYNC_CONVERSATION")
                .filter(|c| !c.is_empty())
                .map(ConversationId::new),
        })
    }
}

fn secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let secs: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{} must be a whole number of seconds, got {:?}", key, raw))?;
    if secs == 0 {
        anyhow::bail!("{} must be greater than zero", key);
    }
    Ok(Duration::from_secs(secs))
}
