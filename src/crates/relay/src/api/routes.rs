//! API route definitions and shared state

use axum::{
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::api::{handlers, middleware};
use crate::cache::ResponseCache;
use crate::config::RelayConfig;
use crate::fingerprint::CacheKey;
use crate::session::{Outbox, SessionRegistry};
use crate::upstream::Upstream;
use crate::worker::Worker;

/// The job currently running for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningJob {
    pub job_id: String,
    /// Fingerprint of the request that started the job
    pub key: CacheKey,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub registry: Arc<SessionRegistry>,
    pub outbox: Arc<Outbox>,
    pub cache: Arc<ResponseCache>,
    pub worker: Arc<Worker>,
    /// Running job per session
    pub jobs: Arc<DashMap<String, RunningJob>>,
}

impl AppState {
    pub fn new(config: RelayConfig, upstream: Arc<dyn Upstream>) -> Self {
        let registry = Arc::new(SessionRegistry::new(
            config.heartbeat_interval(),
            config.sessions.timeout_multiplier,
        ));
        let outbox = Arc::new(Outbox::new());
        let cache = Arc::new(
            ResponseCache::new(config.cache.policies(), config.cache.general.into())
                .with_version(config.cache.version),
        );
        let worker = Arc::new(Worker::new(
            upstream,
            outbox.clone(),
            cache.clone(),
            config.retry.clone(),
            Worker::limiter_for(&config.upstream),
        ));

        Self {
            config: Arc::new(config),
            registry,
            outbox,
            cache,
            worker,
            jobs: Arc::new(DashMap::new()),
        }
    }

    /// Start the session and cache sweepers.
    ///
    /// Event buffers nobody attached to within the session timeout are
    /// dropped on each session sweep.
    pub fn spawn_maintenance(&self) -> Vec<JoinHandle<()>> {
        let outbox = self.outbox.clone();
        let timeout = self.registry.timeout();
        let sessions = self.registry.spawn_sweeper_with(move || {
            let purged = outbox.purge_pending(timeout);
            if purged > 0 {
                debug!(purged, "Dropped unclaimed event buffers");
            }
        });
        let cache = self
            .cache
            .spawn_sweeper(Duration::from_secs(self.config.cache.sweep_interval_secs));
        vec![sessions, cache]
    }
}

/// Build the complete API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/stats", get(handlers::stats))
        .route("/process", post(handlers::process))
        .route("/stream", get(handlers::stream))
        .layer(middleware::cors_layer())
        .layer(middleware::logging_layer())
        .with_state(state)
}
