//! Push-channel session bookkeeping
//!
//! - [`SessionRegistry`] tracks live channels, heartbeats and stale eviction
//! - [`Outbox`] routes events from background jobs to the attached channel

pub mod outbox;
pub mod registry;

pub use outbox::Outbox;
pub use registry::{CloseReason, ReleaseCallback, SessionMeta, SessionRegistry, SessionStats};

use thiserror::Error;

/// Errors returned by the session registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A session with this id is already registered
    #[error("Session already exists: {0}")]
    Duplicate(String),
}
