//! Reconnection state machine of the streaming channel client
//!
//! ```text
//! Connecting --opened--> Open --event--> Open
//!     |                   |  \--complete/error--> Terminal(Finished)
//!     |                   |  \--decode failure--> Terminal(Failed)
//!     +--open failed------+--channel error--> Reconnecting --backoff--> Connecting
//!                                         \--budget spent--> Terminal(Failed)
//! any --abort--> Terminal(Aborted)
//! ```
//!
//! [`transition`] is pure: it never sleeps or performs I/O, so backoff
//! timing can be tested without timers. The driver in
//! [`super::channel`] executes the returned [`Action`].

use std::time::Duration;

use crate::events::StreamEvent;

/// Reconnect budget and backoff base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnects allowed before giving up
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self { max_retries, base_delay }
    }

    /// `base_delay * 2^(retry - 1)` for a 1-based retry number
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// How a channel ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A `complete` or `error` event was delivered
    Finished,
    /// Decode failure, permanent open failure or exhausted reconnects
    Failed,
    /// Caller aborted
    Aborted,
}

/// Channel state. `retries` counts reconnects since the last decoded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting { retries: u32 },
    Open { retries: u32 },
    Reconnecting { retries: u32 },
    Terminal(Outcome),
}

impl ChannelState {
    pub fn initial() -> Self {
        ChannelState::Connecting { retries: 0 }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::Terminal(_))
    }
}

/// Something that happened to the channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelInput {
    Opened,
    OpenFailed { permanent: bool, reason: String },
    Event(StreamEvent),
    DecodeFailed(String),
    ChannelError(String),
    BackoffElapsed,
    Abort,
}

/// What the driver must do next
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    None,
    /// Hand the event carried by the input to the consumer
    Deliver,
    /// Close the current channel and wait before reconnecting
    ScheduleReconnect(Duration),
    /// Emit a synthetic `error` event with this message
    Fail(String),
    /// Stop without emitting anything
    Close,
}

fn on_channel_loss(retries: u32, reason: &str, policy: &ReconnectPolicy) -> (ChannelState, Action) {
    if retries < policy.max_retries {
        let retry = retries + 1;
        (
            ChannelState::Reconnecting { retries: retry },
            Action::ScheduleReconnect(policy.backoff(retry)),
        )
    } else {
        (
            ChannelState::Terminal(Outcome::Failed),
            Action::Fail(format!(
                "connection lost after {} retries: {}",
                policy.max_retries, reason
            )),
        )
    }
}

/// Compute the next state and action.
///
/// A terminal state absorbs every input, so a stray channel error after a
/// `complete` event never schedules a reconnect.
pub fn transition(
    state: ChannelState,
    input: &ChannelInput,
    policy: &ReconnectPolicy,
) -> (ChannelState, Action) {
    use ChannelInput as In;
    use ChannelState as St;

    match (state, input) {
        (St::Terminal(_), _) => (state, Action::None),
        (_, In::Abort) => (St::Terminal(Outcome::Aborted), Action::Close),

        (St::Connecting { retries }, In::Opened) => (St::Open { retries }, Action::None),
        (St::Connecting { .. }, In::OpenFailed { permanent: true, reason }) => (
            St::Terminal(Outcome::Failed),
            Action::Fail(format!("channel rejected: {}", reason)),
        ),
        (St::Connecting { retries }, In::OpenFailed { permanent: false, reason }) => {
            on_channel_loss(retries, reason, policy)
        }

        (St::Open { .. }, In::Event(event)) if event.is_terminal() => {
            (St::Terminal(Outcome::Finished), Action::Deliver)
        }
        (St::Open { .. }, In::Event(_)) => (St::Open { retries: 0 }, Action::Deliver),
        (St::Open { .. }, In::DecodeFailed(reason)) => (
            St::Terminal(Outcome::Failed),
            Action::Fail(format!("malformed event: {}", reason)),
        ),
        (St::Open { retries }, In::ChannelError(reason)) => on_channel_loss(retries, reason, policy),

        (St::Reconnecting { retries }, In::BackoffElapsed) => {
            (St::Connecting { retries }, Action::None)
        }

        // inputs that cannot occur in this state are ignored
        (state, _) => (state, Action::None),
    }
}
