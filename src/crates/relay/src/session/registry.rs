//! Session registry
//!
//! One entry per open push channel. A session is created when the channel
//! opens, refreshed by heartbeats, and closed exactly once: by the client
//! going away, by a terminal event, or by the sweeper after
//! `heartbeat_interval * timeout_multiplier` without a heartbeat. Closing
//! runs the session's release callback outside the registry lock.
//!
//! Every registration gets a fresh generation number. An owner holding an
//! older generation cannot close a session that has since been replaced.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::SessionError;

/// Smallest accepted timeout multiplier
pub const MIN_TIMEOUT_MULTIPLIER: u32 = 2;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client disconnected or the owner released it
    Client,
    /// A terminal event was delivered
    Completed,
    /// No heartbeat within the timeout
    Timeout,
    /// The channel failed
    Error,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CloseReason::Client => "client",
            CloseReason::Completed => "completed",
            CloseReason::Timeout => "timeout",
            CloseReason::Error => "error",
        };
        f.write_str(name)
    }
}

/// Invoked once when a session closes.
pub type ReleaseCallback = Box<dyn FnOnce(CloseReason) + Send>;

/// Where a session came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionMeta {
    pub source_address: Option<String>,
    pub path: String,
}

struct Session {
    generation: u64,
    created_at: Instant,
    last_heartbeat: Instant,
    meta: SessionMeta,
    release: Option<ReleaseCallback>,
}

/// Snapshot counts; `active + stale` is the number of registered sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Sessions heard from within the timeout
    pub active: usize,
    /// Sessions past the timeout that the sweeper has not evicted yet
    pub stale: usize,
}

fn log_opened(id: &str, meta: &SessionMeta) {
    info!(
        session_id = %id,
        source = meta.source_address.as_deref().unwrap_or("unknown"),
        path = %meta.path,
        "Session opened"
    );
}

/// Registry of open push-channel sessions.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
    next_generation: AtomicU64,
    heartbeat_interval: Duration,
    timeout: Duration,
}

impl SessionRegistry {
    /// `timeout_multiplier` is clamped to at least [`MIN_TIMEOUT_MULTIPLIER`].
    pub fn new(heartbeat_interval: Duration, timeout_multiplier: u32) -> Self {
        let multiplier = timeout_multiplier.max(MIN_TIMEOUT_MULTIPLIER);
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            heartbeat_interval,
            timeout: heartbeat_interval * multiplier,
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a new session.
    ///
    /// Fails with [`SessionError::Duplicate`] if `id` is already present; the
    /// existing session and `release` are left untouched.
    pub fn add_session(
        &self,
        id: impl Into<String>,
        meta: SessionMeta,
        release: ReleaseCallback,
    ) -> Result<(), SessionError> {
        let id = id.into();

        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&id) {
            warn!(session_id = %id, "Rejecting duplicate session");
            return Err(SessionError::Duplicate(id));
        }

        log_opened(&id, &meta);
        let session = self.new_session(meta, release);
        sessions.insert(id, session);
        Ok(())
    }

    /// Register `id`, closing a session already registered under it.
    ///
    /// The displaced session is released with [`CloseReason::Client`] before
    /// this returns. Returns the generation of the new registration, for
    /// use with [`close_generation`](Self::close_generation).
    pub fn replace_session(
        &self,
        id: impl Into<String>,
        meta: SessionMeta,
        release: ReleaseCallback,
    ) -> u64 {
        let id = id.into();
        let session = self.new_session(meta.clone(), release);
        let generation = session.generation;

        let displaced = self.sessions.lock().insert(id.clone(), session);
        if let Some(displaced) = displaced {
            info!(session_id = %id, "Session taken over by a new channel");
            self.release(&id, displaced, CloseReason::Client);
        }
        log_opened(&id, &meta);
        generation
    }

    fn new_session(&self, meta: SessionMeta, release: ReleaseCallback) -> Session {
        let now = Instant::now();
        Session {
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            created_at: now,
            last_heartbeat: now,
            meta,
            release: Some(release),
        }
    }

    /// Record a heartbeat (or any message) for `id`.
    ///
    /// Returns `false` for an unknown id, which is logged and otherwise
    /// ignored.
    pub fn heartbeat(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(id) {
            Some(session) => {
                session.last_heartbeat = session.last_heartbeat.max(now);
                true
            }
            None => {
                debug!(session_id = %id, "Heartbeat for unknown session ignored");
                false
            }
        }
    }

    /// Release a session closed by its owner. See [`close_session`](Self::close_session).
    pub fn remove_session(&self, id: &str) -> bool {
        self.close_session(id, CloseReason::Client)
    }

    /// Remove `id` and run its release callback.
    ///
    /// Idempotent: only the call that actually removed the entry returns
    /// `true` and runs the callback.
    pub fn close_session(&self, id: &str, reason: CloseReason) -> bool {
        let removed = self.sessions.lock().remove(id);
        match removed {
            Some(session) => {
                self.release(id, session, reason);
                true
            }
            None => false,
        }
    }

    /// Like [`close_session`](Self::close_session), but only if `id` is
    /// still the registration numbered `generation`.
    pub fn close_generation(&self, id: &str, generation: u64, reason: CloseReason) -> bool {
        let removed = {
            let mut sessions = self.sessions.lock();
            match sessions.get(id) {
                Some(session) if session.generation == generation => sessions.remove(id),
                _ => None,
            }
        };
        match removed {
            Some(session) => {
                self.release(id, session, reason);
                true
            }
            None => false,
        }
    }

    fn release(&self, id: &str, mut session: Session, reason: CloseReason) {
        info!(
            session_id = %id,
            reason = %reason,
            lifetime_ms = session.created_at.elapsed().as_millis() as u64,
            "Session closed"
        );
        if let Some(release) = session.release.take() {
            release(reason);
        }
    }

    fn is_stale(&self, session: &Session, now: Instant) -> bool {
        now.saturating_duration_since(session.last_heartbeat) > self.timeout
    }

    /// Evict every session whose last heartbeat is older than the timeout
    /// at `now`. Returns the evicted ids.
    pub fn sweep(&self, now: Instant) -> Vec<String> {
        let evicted: Vec<(String, Session)> = {
            let mut sessions = self.sessions.lock();
            let stale: Vec<String> = sessions
                .iter()
                .filter(|(_, session)| self.is_stale(session, now))
                .map(|(id, _)| id.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|id| sessions.remove(&id).map(|session| (id, session)))
                .collect()
        };

        let mut ids = Vec::with_capacity(evicted.len());
        for (id, session) in evicted {
            warn!(
                session_id = %id,
                idle_ms = now.saturating_duration_since(session.last_heartbeat).as_millis() as u64,
                "Evicting stale session"
            );
            self.release(&id, session, CloseReason::Timeout);
            ids.push(id);
        }
        ids
    }

    /// Counts of active and stale sessions. Read-only.
    pub fn get_stats(&self) -> SessionStats {
        let now = Instant::now();
        let sessions = self.sessions.lock();
        let stale = sessions
            .values()
            .filter(|session| self.is_stale(session, now))
            .count();
        SessionStats {
            active: sessions.len() - stale,
            stale,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.lock().contains_key(id)
    }

    /// Metadata of a registered session
    pub fn meta(&self, id: &str) -> Option<SessionMeta> {
        self.sessions.lock().get(id).map(|session| session.meta.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweep every heartbeat interval until the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        self.spawn_sweeper_with(|| {})
    }

    /// Like [`spawn_sweeper`](Self::spawn_sweeper), running `after_sweep`
    /// after each pass.
    pub fn spawn_sweeper_with<F>(self: &Arc<Self>, mut after_sweep: F) -> JoinHandle<()>
    where
        F: FnMut() + Send + 'static,
    {
        let registry: Weak<Self> = Arc::downgrade(self);
        let period = self.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let evicted = registry.sweep(Instant::now());
                if !evicted.is_empty() {
                    debug!(evicted = evicted.len(), remaining = registry.len(), "Session sweep finished");
                }
                after_sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_release(counter: &Arc<AtomicUsize>) -> ReleaseCallback {
        let counter = Arc::clone(counter);
        Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_session_rejected() {
        let registry = SessionRegistry::new(Duration::from_secs(15), 4);
        let released = Arc::new(AtomicUsize::new(0));

        registry
            .add_session("s-1", SessionMeta::default(), counting_release(&released))
            .unwrap();
        let err = registry
            .add_session("s-1", SessionMeta::default(), counting_release(&released))
            .unwrap_err();

        assert_eq!(err, SessionError::Duplicate("s-1".into()));
        assert_eq!(registry.len(), 1);
        assert_eq!(released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_unknown_is_noop() {
        let registry = SessionRegistry::new(Duration::from_secs(15), 4);
        assert!(!registry.heartbeat("missing"));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_keeps_session_alive() {
        let registry = SessionRegistry::new(Duration::from_secs(10), 2);
        let released = Arc::new(AtomicUsize::new(0));
        registry
            .add_session("s-1", SessionMeta::default(), counting_release(&released))
            .unwrap();

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(15)).await;
            assert!(registry.heartbeat("s-1"));
            assert!(registry.sweep(Instant::now()).is_empty());
        }
        assert_eq!(registry.get_stats(), SessionStats { active: 1, stale: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiplier_clamped() {
        let registry = SessionRegistry::new(Duration::from_secs(10), 1);
        assert_eq!(registry.timeout(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_do_not_mutate() {
        let registry = SessionRegistry::new(Duration::from_secs(1), 2);
        let released = Arc::new(AtomicUsize::new(0));
        registry
            .add_session("s-1", SessionMeta::default(), counting_release(&released))
            .unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(registry.get_stats(), SessionStats { active: 0, stale: 1 });
        assert!(registry.contains("s-1"));
        assert_eq!(released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_reason_passed_to_callback() {
        let registry = SessionRegistry::new(Duration::from_secs(1), 2);
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        registry
            .add_session(
                "s-1",
                SessionMeta::default(),
                Box::new(move |reason| *sink.lock() = Some(reason)),
            )
            .unwrap();

        assert!(registry.close_session("s-1", CloseReason::Completed));
        assert_eq!(*seen.lock(), Some(CloseReason::Completed));
    }
}
