//! Streaming channel client
//!
//! [`ChannelClient::connect`] spawns a driver task that opens the push
//! channel, decodes SSE frames into [`StreamEvent`]s and feeds them to a
//! [`ChannelSubscription`]. Reconnection follows the pure state machine in
//! [`super::reconnect`]. The subscription sees at most one terminal event
//! and nothing after [`ChannelSubscription::abort`].

use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::reconnect::{transition, Action, ChannelInput, ChannelState, ReconnectPolicy};
use super::transport::{ByteStream, Transport};
use crate::events::StreamEvent;
use crate::sse::{SseDecoder, SseFrame};
use crate::ErrorClass;

const EVENT_BUFFER: usize = 64;

/// Opens push channels with automatic reconnection.
#[derive(Clone)]
pub struct ChannelClient {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
}

impl ChannelClient {
    pub fn new(transport: Arc<dyn Transport>, policy: ReconnectPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Start receiving events for `session_id`.
    pub fn connect(&self, session_id: impl Into<String>) -> ChannelSubscription {
        let session_id = session_id.into();
        let (sender, receiver) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        let driver = Driver {
            transport: Arc::clone(&self.transport),
            policy: self.policy,
            session_id,
            sender,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(driver.run());

        ChannelSubscription {
            events: receiver,
            cancel,
            task,
            aborted: false,
        }
    }
}

/// Receiving end of a push channel.
///
/// Dropping the subscription aborts it.
pub struct ChannelSubscription {
    events: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    aborted: bool,
}

impl ChannelSubscription {
    /// Next event, or `None` once the channel has ended or was aborted.
    ///
    /// Cancel-safe.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.aborted {
            return None;
        }
        self.events.recv().await
    }

    /// Close the channel, cancel any pending reconnect and suppress all
    /// further events.
    pub fn abort(&mut self) {
        if self.aborted {
            return;
        }
        self.aborted = true;
        self.cancel.cancel();
        self.events.close();
        self.task.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// A token that aborts the driver when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        self.abort();
    }
}

struct Driver {
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    session_id: String,
    sender: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

struct Connection {
    stream: ByteStream,
    decoder: SseDecoder,
    frames: VecDeque<SseFrame>,
    ended: bool,
}

impl Connection {
    fn new(stream: ByteStream) -> Self {
        Self {
            stream,
            decoder: SseDecoder::new(),
            frames: VecDeque::new(),
            ended: false,
        }
    }

    /// Next decoded input from this connection. Not cancel-safe on its own;
    /// the caller races it against the cancellation token only.
    async fn next_input(&mut self) -> ChannelInput {
        loop {
            if let Some(frame) = self.frames.pop_front() {
                return match StreamEvent::decode(frame.event.as_deref(), &frame.data) {
                    Ok(event) => ChannelInput::Event(event),
                    Err(e) => ChannelInput::DecodeFailed(e.to_string()),
                };
            }
            if self.ended {
                return ChannelInput::ChannelError(
                    "stream ended before a terminal event".to_string(),
                );
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => match self.decoder.push(&chunk) {
                    Ok(frames) => self.frames.extend(frames),
                    Err(e) => return ChannelInput::DecodeFailed(e.to_string()),
                },
                Some(Err(e)) => return ChannelInput::ChannelError(e.to_string()),
                None => {
                    self.ended = true;
                    self.frames.extend(self.decoder.finish());
                }
            }
        }
    }
}

impl Driver {
    async fn run(self) {
        let mut state = ChannelState::initial();
        let mut connection: Option<Connection> = None;
        let mut backoff = Duration::ZERO;

        loop {
            let input = match state {
                ChannelState::Terminal(_) => break,
                ChannelState::Connecting { retries } => {
                    debug!(session_id = %self.session_id, retries, "Connecting push channel");
                    tokio::select! {
                        _ = self.cancel.cancelled() => ChannelInput::Abort,
                        opened = self.transport.open_channel(&self.session_id) => match opened {
                            Ok(stream) => {
                                connection = Some(Connection::new(stream));
                                ChannelInput::Opened
                            }
                            Err(e) => ChannelInput::OpenFailed {
                                permanent: e.class() == ErrorClass::Permanent,
                                reason: e.to_string(),
                            },
                        },
                    }
                }
                ChannelState::Reconnecting { .. } => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => ChannelInput::Abort,
                        _ = tokio::time::sleep(backoff) => ChannelInput::BackoffElapsed,
                    }
                }
                ChannelState::Open { .. } => match connection.as_mut() {
                    Some(conn) => tokio::select! {
                        _ = self.cancel.cancelled() => ChannelInput::Abort,
                        input = conn.next_input() => input,
                    },
                    None => ChannelInput::ChannelError("no open connection".to_string()),
                },
            };

            let (next, action) = transition(state, &input, &self.policy);
            state = next;

            match action {
                Action::None => {}
                Action::Deliver => {
                    if let ChannelInput::Event(event) = input {
                        if self.sender.send(event).await.is_err() {
                            // subscriber dropped
                            break;
                        }
                    }
                }
                Action::ScheduleReconnect(delay) => {
                    connection = None;
                    backoff = delay;
                    if let ChannelInput::OpenFailed { reason, .. } | ChannelInput::ChannelError(reason) =
                        &input
                    {
                        warn!(
                            session_id = %self.session_id,
                            delay_ms = delay.as_millis() as u64,
                            reason = %reason,
                            "Push channel lost, scheduling reconnect"
                        );
                    }
                }
                Action::Fail(message) => {
                    warn!(session_id = %self.session_id, %message, "Push channel failed");
                    let _ = self.sender.send(StreamEvent::error(message)).await;
                }
                Action::Close => {}
            }
        }

        info!(session_id = %self.session_id, state = ?state, "Push channel closed");
    }
}
