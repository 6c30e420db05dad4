//! Request orchestrator
//!
//! The caller-facing entry point. A request is fingerprinted; a cache hit is
//! returned without touching the network. On a miss the triggering
//! `POST /process` (wrapped in the retry executor) and the push channel run
//! concurrently, and the first of these decides the outcome:
//!
//! - a `complete` event resolves with its payload, which is then cached
//! - an `error` event rejects with its message
//! - the POST failing permanently or exhausting its retries rejects
//! - cancellation rejects with [`ProcessError::Cancelled`]
//!
//! Whatever loses the race is dropped, which cancels the in-flight attempt
//! and closes the channel.

use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tooling::async_utils::{execute, RetryPolicy, Retryable};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::channel::ChannelClient;
use super::history::{ConversationHistory, HistoryEntry};
use super::reconnect::ReconnectPolicy;
use super::transport::Transport;
use crate::cache::ResponseCache;
use crate::config::{RelayConfig, RetrySection};
use crate::events::{EventKind, StreamEvent};
use crate::fingerprint::{normalize_query, CacheKey, Category, FileAttachment};
use crate::protocol::{ProcessAccepted, ProcessRequest};
use crate::RelayError;

/// A caller's query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub category: Category,
    pub query: String,
    pub files: Vec<FileAttachment>,
    /// Push-channel session; generated when `None`
    pub session_id: Option<String>,
}

impl QueryRequest {
    pub fn new(category: Category, query: impl Into<String>) -> Self {
        Self {
            category,
            query: query.into(),
            files: Vec::new(),
            session_id: None,
        }
    }

    pub fn with_files(mut self, files: Vec<FileAttachment>) -> Self {
        self.files = files;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Cache key of this request
    pub fn cache_key(&self) -> Result<CacheKey, RelayError> {
        let fingerprints: Vec<String> = self
            .files
            .iter()
            .map(|file| file.fingerprint().to_string())
            .collect();
        CacheKey::derive(self.category, &self.query, &fingerprints)
    }
}

/// Final answer to a query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    /// Payload of the `complete` event
    pub payload: Value,
    /// `payload.content`, empty if absent
    pub content: String,
    /// Served from the response cache
    pub cached: bool,
}

impl QueryResponse {
    fn from_payload(payload: Value, cached: bool) -> Self {
        let content = payload
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self { payload, content, cached }
    }
}

/// The only error type a caller of the orchestrator sees
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Rejected before anything was sent
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// The server refused the request with a non-retryable error
    #[error("Request rejected: {0}")]
    Rejected(RelayError),

    /// Every attempt of the triggering request failed
    #[error("Request failed after {attempts} attempts: {source}")]
    Exhausted { attempts: u32, source: RelayError },

    /// The push channel reported a terminal error
    #[error("{0}")]
    Remote(String),

    /// The push channel ended without a terminal event
    #[error("Push channel closed before completion")]
    ChannelClosed,

    /// The caller cancelled the request
    #[error("Request cancelled")]
    Cancelled,
}

/// Retry and reconnect settings of the orchestrator
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrchestratorConfig {
    pub retry: RetrySection,
    pub reconnect: ReconnectPolicy,
}

impl OrchestratorConfig {
    pub fn from_relay_config(config: &RelayConfig) -> Self {
        Self {
            retry: config.retry.clone(),
            reconnect: config.channel.policy(),
        }
    }
}

/// Caller-facing query processor.
pub struct RequestOrchestrator {
    transport: Arc<dyn Transport>,
    channel: ChannelClient,
    cache: Arc<ResponseCache>,
    config: OrchestratorConfig,
    history: Option<Arc<ConversationHistory>>,
}

impl RequestOrchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<ResponseCache>,
        config: OrchestratorConfig,
    ) -> Self {
        let channel = ChannelClient::new(Arc::clone(&transport), config.reconnect);
        Self {
            transport,
            channel,
            cache,
            config,
            history: None,
        }
    }

    /// Record completed exchanges in `history`.
    pub fn with_history(mut self, history: Arc<ConversationHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    fn retry_policy(&self) -> RetryPolicy<RelayError> {
        self.config.retry.policy()
    }

    /// Resolve `request`, ignoring progress events.
    pub async fn process(&self, request: QueryRequest) -> Result<QueryResponse, ProcessError> {
        self.process_with(request, None, CancellationToken::new()).await
    }

    /// Resolve `request`, forwarding non-terminal events to `progress` and
    /// giving up when `cancel` fires.
    pub async fn process_with(
        &self,
        request: QueryRequest,
        progress: Option<mpsc::UnboundedSender<StreamEvent>>,
        cancel: CancellationToken,
    ) -> Result<QueryResponse, ProcessError> {
        if normalize_query(&request.query).is_empty() {
            return Err(ProcessError::Invalid("query is empty".to_string()));
        }
        let key = request
            .cache_key()
            .map_err(|e| ProcessError::Invalid(e.to_string()))?;

        if let Some(entry) = self.cache.get(&key) {
            debug!(key = %key, category = %request.category, "Serving query from cache");
            return Ok(QueryResponse::from_payload(entry.response, true));
        }

        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let body = ProcessRequest {
            session_id: session_id.clone(),
            query: request.query.clone(),
            category: request.category,
            files: request.files.clone(),
        };

        info!(session_id = %session_id, category = %request.category, "Processing query");
        let mut channel = self.channel.connect(session_id.clone());

        let policy = self.retry_policy();
        let transport = &self.transport;
        let body = &body;
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let submit = execute(&policy, move || async move {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            match transport.submit(body).await {
                // an earlier attempt reached the server and its job owns the session
                Err(error) if attempt > 1 && error.status() == Some(409) => {
                    debug!(session_id = %body.session_id, attempt, "Work already accepted by an earlier attempt");
                    Ok(ProcessAccepted {
                        accepted: true,
                        session_id: body.session_id.clone(),
                        job_id: String::new(),
                    })
                }
                result => result,
            }
        });
        tokio::pin!(submit);
        let mut submitted = false;

        let outcome = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break Err(ProcessError::Cancelled),

                result = &mut submit, if !submitted => match result {
                    Ok(accepted) => {
                        submitted = true;
                        debug!(session_id = %session_id, job_id = %accepted.job_id, "Work accepted");
                    }
                    Err(error) if error.is_retryable() => {
                        break Err(ProcessError::Exhausted {
                            attempts: policy.max_attempts,
                            source: error,
                        });
                    }
                    Err(error) => break Err(ProcessError::Rejected(error)),
                },

                event = channel.next() => match event {
                    Some(event) if event.kind == EventKind::Complete => break Ok(event.payload),
                    Some(event) if event.kind == EventKind::Error => {
                        break Err(ProcessError::Remote(event.message()));
                    }
                    Some(event) => {
                        if let Some(progress) = &progress {
                            let _ = progress.send(event);
                        }
                    }
                    None => break Err(ProcessError::ChannelClosed),
                },
            }
        };
        channel.abort();

        match outcome {
            Ok(payload) => {
                self.cache.set(key, payload.clone(), request.category);
                let response = QueryResponse::from_payload(payload, false);
                if let Some(history) = &self.history {
                    let entry = HistoryEntry::new(request.category, &request.query, &response.content);
                    if let Err(e) = history.append(entry) {
                        warn!(error = %e, "Failed to record conversation history");
                    }
                }
                info!(session_id = %session_id, "Query completed");
                Ok(response)
            }
            Err(error) => {
                warn!(session_id = %session_id, error = %error, "Query failed");
                Err(error)
            }
        }
    }
}
