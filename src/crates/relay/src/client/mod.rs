//! Client side of the relay
//!
//! - [`transport`] - HTTP access to `/process` and `/stream`
//! - [`reconnect`] - pure reconnection state machine
//! - [`channel`] - reconnecting push-channel client
//! - [`orchestrator`] - cache-aware request processing
//! - [`history`] - bounded local conversation history

pub mod channel;
pub mod history;
pub mod orchestrator;
pub mod reconnect;
pub mod transport;

pub use channel::{ChannelClient, ChannelSubscription};
pub use history::{ConversationHistory, HistoryEntry};
pub use orchestrator::{
    OrchestratorConfig, ProcessError, QueryRequest, QueryResponse, RequestOrchestrator,
};
pub use reconnect::{ChannelState, ReconnectPolicy};
pub use transport::{ByteStream, HttpTransport, Transport};
