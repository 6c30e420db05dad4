//! Server-side job execution
//!
//! A job runs one query against the upstream and reports through the
//! session's outbox: `thinking` when it starts, `progress` before every
//! upstream attempt, then exactly one `complete` or `error`.
//! Upstream calls are paced by a token bucket and retried with backoff.
//! Completed answers are cached so identical queries skip the upstream.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tooling::async_utils::{execute, RetryPolicy, Retryable};
use tooling::rate_limit::RateLimiter;
use tracing::{error, info, warn};

use crate::cache::ResponseCache;
use crate::config::{RetrySection, UpstreamSection};
use crate::events::{EventKind, StreamEvent};
use crate::session::Outbox;
use crate::upstream::{Upstream, UpstreamReply, UpstreamRequest};
use crate::{RelayError, Result};

/// One accepted `POST /process`
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub session_id: String,
    pub request: UpstreamRequest,
}

/// Runs jobs and publishes their events.
pub struct Worker {
    upstream: Arc<dyn Upstream>,
    outbox: Arc<Outbox>,
    cache: Arc<ResponseCache>,
    limiter: RateLimiter,
    retry: RetrySection,
}

impl Worker {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        outbox: Arc<Outbox>,
        cache: Arc<ResponseCache>,
        retry: RetrySection,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            upstream,
            outbox,
            cache,
            limiter,
            retry,
        }
    }

    /// Limiter allowing `requests_per_minute` upstream calls
    pub fn limiter_for(section: &UpstreamSection) -> RateLimiter {
        RateLimiter::new(
            section.requests_per_minute as usize,
            Duration::from_secs(60),
        )
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    /// Run `job` to completion. The terminal event has been published by the
    /// time this returns.
    pub async fn run(&self, job: Job) -> Result<UpstreamReply> {
        let Job {
            job_id,
            session_id,
            request,
        } = job;
        info!(%job_id, session_id = %session_id, category = %request.category, "Job started");
        self.outbox.publish(
            &session_id,
            StreamEvent::thinking(format!("processing {} query", request.category)),
        );

        let key = match request.cache_key() {
            Ok(key) => key,
            Err(e) => {
                self.outbox.publish(&session_id, StreamEvent::error(e.to_string()));
                return Err(e);
            }
        };

        if let Some(entry) = self.cache.get(&key) {
            info!(%job_id, session_id = %session_id, "Job served from cache");
            let reply = UpstreamReply {
                content: entry
                    .response
                    .get("content")
                    .and_then(|c| c.as_str())
                    .unwrap_or_default()
                    .to_string(),
                model: self.upstream.model().to_string(),
            };
            self.outbox
                .publish(&session_id, StreamEvent::new(EventKind::Complete, entry.response));
            return Ok(reply);
        }

        let policy: RetryPolicy<RelayError> = self.retry.policy();
        let max_attempts = policy.max_attempts;
        let attempts = AtomicU32::new(0);
        let upstream = &self.upstream;
        let limiter = &self.limiter;
        let request_ref = &request;

        let result = execute(&policy, || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            self.outbox
                .publish(&session_id, StreamEvent::progress(attempt, max_attempts));
            async move {
                limiter.acquire().await;
                upstream.complete(request_ref).await
            }
        })
        .await;

        match result {
            Ok(reply) => {
                let event = StreamEvent::complete(reply.content.clone(), reply.model.clone());
                self.cache.set(key, event.payload.clone(), request.category);
                self.outbox.publish(&session_id, event);
                info!(
                    %job_id,
                    session_id = %session_id,
                    attempts = attempts.load(Ordering::SeqCst),
                    "Job completed"
                );
                Ok(reply)
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!(%job_id, session_id = %session_id, error = %e, "Job failed after retries");
                } else {
                    error!(%job_id, session_id = %session_id, error = %e, "Job failed");
                }
                self.outbox.publish(&session_id, StreamEvent::error(e.to_string()));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct FlakyUpstream {
        calls: AtomicUsize,
        failures: usize,
        status: u16,
    }

    #[async_trait]
    impl Upstream for FlakyUpstream {
        async fn complete(&self, request: &UpstreamRequest) -> Result<UpstreamReply> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(RelayError::from_status(self.status, "upstream unavailable"));
            }
            Ok(UpstreamReply {
                content: format!("answer to {}", request.query),
                model: "test-model".to_string(),
            })
        }

        fn model(&self) -> &str {
            "test-model"
        }
    }

    fn worker(upstream: Arc<FlakyUpstream>) -> Worker {
        let retry = RetrySection {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 100,
            attempt_timeout_secs: 5,
        };
        Worker::new(
            upstream,
            Arc::new(Outbox::new()),
            Arc::new(ResponseCache::default()),
            retry,
            RateLimiter::unlimited(),
        )
    }

    fn job(query: &str) -> Job {
        Job {
            job_id: "j-1".to_string(),
            session_id: "s-1".to_string(),
            request: UpstreamRequest {
                category: crate::Category::General,
                query: query.to_string(),
                files: Vec::new(),
            },
        }
    }

    async fn drain(worker: &Worker) -> Vec<StreamEvent> {
        let mut rx = worker.outbox().attach("s-1");
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_completes() {
        let upstream = Arc::new(FlakyUpstream { calls: AtomicUsize::new(0), failures: 2, status: 503 });
        let worker = worker(Arc::clone(&upstream));

        let reply = worker.run(job("explain recursion")).await.unwrap();
        assert_eq!(reply.content, "answer to explain recursion");
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 3);

        let kinds: Vec<EventKind> = drain(&worker).await.into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Thinking,
                EventKind::Progress,
                EventKind::Progress,
                EventKind::Progress,
                EventKind::Complete
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_not_retried() {
        let upstream = Arc::new(FlakyUpstream { calls: AtomicUsize::new(0), failures: 10, status: 401 });
        let worker = worker(Arc::clone(&upstream));

        assert!(worker.run(job("q")).await.is_err());
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);

        let events = drain(&worker).await;
        assert_eq!(events.last().unwrap().kind, EventKind::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_identical_job_hits_cache() {
        let upstream = Arc::new(FlakyUpstream { calls: AtomicUsize::new(0), failures: 0, status: 500 });
        let worker = worker(Arc::clone(&upstream));

        worker.run(job("same question")).await.unwrap();
        let reply = worker.run(job("  Same   QUESTION ")).await.unwrap();
        assert_eq!(reply.content, "answer to same question");
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }
}
