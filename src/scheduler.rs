use async_trait::async_trait;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Whatever the scheduler keeps fresh. `Break` means the owner is gone and the loop should end.
#[async_trait]
pub trait Poller: Send + Sync + 'static {
    async fn poll_conversations(&self) -> ControlFlow<()>;
    async fn poll_messages(&self) -> ControlFlow<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    pub conversations: Duration,
    pub messages: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            conversations: Duration::from_secs(15),
            messages: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Stopped,
    Polling,
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Conversations,
    Messages,
}

/// Two independent interval loops standing in for a push channel.
///
/// Ticks never retry or back off; a failed fetch waits for the next tick.
/// Stopping ends the timers but not requests already on the wire; those finish
/// and their owner decides whether the result still applies.
pub struct PollingScheduler {
    intervals: PollIntervals,
    stop: Option<watch::Sender<()>>,
}

impl PollingScheduler {
    pub fn new(intervals: PollIntervals) -> Self {
        Self {
            intervals,
            stop: None,
        }
    }

    pub fn intervals(&self) -> PollIntervals {
        self.intervals
    }

    pub fn state(&self) -> PollState {
        match self.stop {
            Some(_) => PollState::Polling,
            None => PollState::Stopped,
        }
    }

    /// Returns false if already polling.
    pub fn start<P: Poller + Clone>(&mut self, poller: P) -> bool {
        if self.stop.is_some() {
            return false;
        }
        let (tx, rx) = watch::channel(());
        info!(
            "Polling started (conversations every {:?}, messages every {:?})",
            self.intervals.conversations, self.intervals.messages
        );
        tokio::spawn(run(
            poller.clone(),
            self.intervals.conversations,
            Target::Conversations,
            rx.clone(),
        ));
        tokio::spawn(run(poller, self.intervals.messages, Target::Messages, rx));
        self.stop = Some(tx);
        true
    }

    /// Returns false if already stopped.
    pub fn stop(&mut self) -> bool {
        // Dropping the sender wakes both loops.
        match self.stop.take() {
            Some(_) => {
                info!("Polling stopped");
                true
            }
            None => false,
        }
    }
}

async fn run<P: Poller>(poller: P, every: Duration, target: Target, mut stop: watch::Receiver<()>) {
    // The owner fetches on open, so the first tick is one full period away.
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {}
        }
        debug!("Poll tick: {:?}", target);
        let flow = match target {
            Target::Conversations => poller.poll_conversations().await,
            Target::Messages => poller.poll_messages().await,
        };
        if flow.is_break() {
            debug!("Poll loop for {:?} ended by its owner", target);
            break;
        }
    }
}
