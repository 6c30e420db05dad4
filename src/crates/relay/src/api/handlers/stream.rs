//! `GET /stream`: the server-sent event push channel of a session
//!
//! Opening the channel registers the session; events published by the
//! session's job are forwarded in order, interleaved with `: heartbeat`
//! comments. The channel ends after a terminal event, when the session is
//! evicted, when the client goes away, or when a newer channel for the same
//! session takes over. Taking over lets a client reconnect before the
//! server has noticed that its previous connection is dead.

use axum::{
    extract::{rejection::QueryRejection, ConnectInfo, Query, State},
    response::sse::{Event, Sse},
};
use futures::Stream;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::{interval_at, Instant};
use tracing::debug;

use crate::api::auth::authorize;
use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::AppState;
use crate::events::StreamEvent;
use crate::protocol::StreamParams;
use crate::session::{CloseReason, SessionMeta, SessionRegistry};

/// Closes the session when the response body is dropped, unless a newer
/// channel has replaced it.
struct SessionGuard {
    registry: Arc<SessionRegistry>,
    session_id: String,
    generation: u64,
    reason: CloseReason,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry
            .close_generation(&self.session_id, self.generation, self.reason);
    }
}

enum Step {
    Event(StreamEvent),
    Heartbeat,
    Closed,
}

fn to_sse_event(event: &StreamEvent) -> Event {
    Event::default()
        .event(event.kind.as_str())
        .data(event.payload.to_string())
}

/// Handler for GET /stream
///
/// The credential travels in the `token` query parameter.
pub async fn stream(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    params: Result<Query<StreamParams>, QueryRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let Query(params) = params.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    authorize(state.config.server.auth_token.as_deref(), params.token.as_deref())?;
    if params.session_id.trim().is_empty() {
        return Err(ApiError::BadRequest("session_id cannot be empty".to_string()));
    }

    let session_id = params.session_id;
    let meta = SessionMeta {
        source_address: connect_info.map(|ConnectInfo(addr)| addr.to_string()),
        path: "/stream".to_string(),
    };

    let outbox = state.outbox.clone();
    let release_id = session_id.clone();
    let generation = state.registry.replace_session(
        session_id.clone(),
        meta,
        Box::new(move |reason| match reason {
            CloseReason::Completed => outbox.remove(&release_id),
            _ => outbox.detach(&release_id),
        }),
    );

    let mut events = state.outbox.attach(&session_id);
    let period = state.registry.heartbeat_interval();
    let mut guard = SessionGuard {
        registry: state.registry.clone(),
        session_id,
        generation,
        reason: CloseReason::Client,
    };

    let stream = async_stream::stream! {
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            let step = tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => Step::Event(event),
                    None => Step::Closed,
                },
                _ = ticker.tick() => Step::Heartbeat,
            };

            match step {
                Step::Event(event) => {
                    guard.registry.heartbeat(&guard.session_id);
                    let terminal = event.is_terminal();
                    yield Ok(to_sse_event(&event));
                    if terminal {
                        guard.reason = CloseReason::Completed;
                        break;
                    }
                }
                Step::Heartbeat => {
                    if !guard.registry.heartbeat(&guard.session_id) {
                        debug!(session_id = %guard.session_id, "Session evicted, closing stream");
                        break;
                    }
                    yield Ok(Event::default().comment("heartbeat"));
                }
                Step::Closed => break,
            }
        }
    };

    Ok(Sse::new(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn recording(closed: &Arc<parking_lot::Mutex<Vec<CloseReason>>>) -> crate::session::ReleaseCallback {
        let sink = closed.clone();
        Box::new(move |reason| sink.lock().push(reason))
    }

    #[test]
    fn test_guard_closes_session_once() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(15), 4));
        let closed = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let generation = registry.replace_session("s-1", SessionMeta::default(), recording(&closed));

        drop(SessionGuard {
            registry: registry.clone(),
            session_id: "s-1".to_string(),
            generation,
            reason: CloseReason::Completed,
        });
        drop(SessionGuard {
            registry: registry.clone(),
            session_id: "s-1".to_string(),
            generation,
            reason: CloseReason::Client,
        });

        assert!(!registry.contains("s-1"));
        assert_eq!(*closed.lock(), vec![CloseReason::Completed]);
    }

    #[test]
    fn test_replaced_guard_leaves_new_session_alone() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(15), 4));
        let closed = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let old = registry.replace_session("s-1", SessionMeta::default(), recording(&closed));
        let new = registry.replace_session("s-1", SessionMeta::default(), recording(&closed));
        assert_ne!(old, new);
        assert_eq!(*closed.lock(), vec![CloseReason::Client]);

        drop(SessionGuard {
            registry: registry.clone(),
            session_id: "s-1".to_string(),
            generation: old,
            reason: CloseReason::Client,
        });
        assert!(registry.contains("s-1"));
        assert_eq!(closed.lock().len(), 1);
    }
}
