//! Connection lifecycle of a live-feed viewer.
//!
//! The state machine only decides what to do next; the caller performs the
//! I/O and reports back with events.

use crate::models::log_entry::LogEntry;
use crate::viewer::live_view::LiveView;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// `attempt` is the number of consecutive failures so far.
    Connecting { attempt: u32 },
    /// Connected; fetching what was missed while live pushes are held back.
    CatchingUp,
    Live,
    Backoff { attempt: u32, delay: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEvent {
    Opened,
    /// The connection failed to open or was lost.
    Closed,
    BackoffElapsed,
    CatchUpFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedAction {
    Connect,
    FetchCatchUp { after_id: i64 },
    Wait(Duration),
    Nothing,
}

/// Exponential reconnect delay: `initial`, doubling per failure, capped.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

#[derive(Debug, Clone)]
pub struct FeedMachine {
    state: FeedState,
    policy: BackoffPolicy,
    has_connected: bool,
}

impl FeedMachine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: FeedState::Connecting { attempt: 0 },
            policy,
            has_connected: false,
        }
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    pub fn start(&self) -> FeedAction {
        FeedAction::Connect
    }

    pub fn handle(&mut self, event: FeedEvent, last_seen_id: i64) -> FeedAction {
        let (next, action) = match (self.state, event) {
            (FeedState::Connecting { .. }, FeedEvent::Opened) => {
                let reconnect = self.has_connected;
                self.has_connected = true;
                if reconnect && last_seen_id > 0 {
                    (
                        FeedState::CatchingUp,
                        FeedAction::FetchCatchUp {
                            after_id: last_seen_id,
                        },
                    )
                } else {
                    (FeedState::Live, FeedAction::Nothing)
                }
            }
            (FeedState::Connecting { attempt }, FeedEvent::Closed) => self.back_off(attempt),
            (FeedState::CatchingUp, FeedEvent::CatchUpFinished) => (FeedState::Live, FeedAction::Nothing),
            (FeedState::CatchingUp | FeedState::Live, FeedEvent::Closed) => self.back_off(0),
            (FeedState::Backoff { attempt, .. }, FeedEvent::BackoffElapsed) => {
                (FeedState::Connecting { attempt }, FeedAction::Connect)
            }
            (state, _) => (state, FeedAction::Nothing),
        };
        self.state = next;
        action
    }

    fn back_off(&self, failures: u32) -> (FeedState, FeedAction) {
        let delay = self.policy.delay(failures);
        (
            FeedState::Backoff {
                attempt: failures.saturating_add(1),
                delay,
            },
            FeedAction::Wait(delay),
        )
    }
}

/// A [`FeedMachine`] driving a [`LiveView`], holding back live pushes that
/// arrive while a catch-up is in flight so they land after it.
#[derive(Debug, Clone)]
pub struct FeedSession {
    machine: FeedMachine,
    view: LiveView,
    held: Vec<LogEntry>,
}

impl FeedSession {
    pub fn new(policy: BackoffPolicy, capacity: usize) -> Self {
        Self {
            machine: FeedMachine::new(policy),
            view: LiveView::new(capacity),
            held: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> FeedState {
        self.machine.state()
    }

    pub fn view(&self) -> &LiveView {
        &self.view
    }

    pub fn start(&self) -> FeedAction {
        self.machine.start()
    }

    pub fn opened(&mut self) -> FeedAction {
        self.held.clear();
        self.machine.handle(FeedEvent::Opened, self.view.last_seen_id())
    }

    pub fn closed(&mut self) -> FeedAction {
        self.held.clear();
        self.machine.handle(FeedEvent::Closed, self.view.last_seen_id())
    }

    pub fn backoff_elapsed(&mut self) -> FeedAction {
        self.machine
            .handle(FeedEvent::BackoffElapsed, self.view.last_seen_id())
    }

    /// Returns what became visible, if anything.
    pub fn on_live(&mut self, entry: LogEntry) -> Vec<LogEntry> {
        match self.machine.state() {
            FeedState::CatchingUp => {
                self.held.push(entry);
                Vec::new()
            }
            _ => self.view.apply_live(entry).cloned().into_iter().collect(),
        }
    }

    /// Merges the fetched history, then the held live pushes, and goes live.
    pub fn finish_catch_up(&mut self, fetched: Vec<LogEntry>) -> Vec<LogEntry> {
        let mut accepted = self.view.merge_catch_up(fetched);
        for entry in std::mem::take(&mut self.held) {
            if let Some(shown) = self.view.apply_live(entry) {
                accepted.push(shown.clone());
            }
        }
        self.machine
            .handle(FeedEvent::CatchUpFinished, self.view.last_seen_id());
        accepted
    }
}
