//! Common test utilities: scripted transport and upstream doubles

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use relay::client::{ByteStream, Transport};
use relay::protocol::{ProcessAccepted, ProcessRequest};
use relay::upstream::{Upstream, UpstreamReply, UpstreamRequest};
use relay::{RelayError, Result};

/// One scripted `open_channel` outcome
pub enum Open {
    /// Opening fails with this error
    Fail(RelayError),
    /// The channel yields these chunks and then ends
    Chunks(Vec<Result<Bytes>>),
}

impl Open {
    /// A channel carrying `body` in one chunk
    pub fn body(body: &str) -> Self {
        Open::Chunks(vec![Ok(Bytes::from(body.to_string()))])
    }
}

/// Transport whose responses are scripted in order.
///
/// Once the script is used up, `submit` accepts and `open_channel` returns a
/// channel that stays open without sending anything.
#[derive(Default)]
pub struct ScriptedTransport {
    submits: Mutex<VecDeque<Result<ProcessAccepted>>>,
    opens: Mutex<VecDeque<Open>>,
    pub submit_calls: AtomicUsize,
    pub open_calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_submits(self, submits: Vec<Result<ProcessAccepted>>) -> Self {
        self.submits.lock().extend(submits);
        self
    }

    pub fn with_opens(self, opens: Vec<Open>) -> Self {
        self.opens.lock().extend(opens);
        self
    }

    pub fn submits(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn submit(&self, request: &ProcessRequest) -> Result<ProcessAccepted> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.submits.lock().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(ProcessAccepted {
                accepted: true,
                session_id: request.session_id.clone(),
                job_id: "job-1".to_string(),
            })
        })
    }

    async fn open_channel(&self, _session_id: &str) -> Result<ByteStream> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.opens.lock().pop_front();
        match scripted {
            Some(Open::Fail(error)) => Err(error),
            Some(Open::Chunks(chunks)) => Ok(stream::iter(chunks).boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }
}

/// Upstream answering every query with a fixed template
pub struct EchoUpstream {
    pub calls: AtomicUsize,
}

impl EchoUpstream {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Upstream for EchoUpstream {
    async fn complete(&self, request: &UpstreamRequest) -> Result<UpstreamReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(UpstreamReply {
            content: format!("[{}] {}", request.category, request.query),
            model: "echo-1".to_string(),
        })
    }

    fn model(&self) -> &str {
        "echo-1"
    }
}

pub const THINKING: &str = "event: thinking\ndata: {\"message\":\"working\"}\n\n";
pub const PROGRESS: &str = "event: progress\ndata: {\"attempt\":1,\"max_attempts\":3}\n\n";
pub const HEARTBEAT: &str = ": heartbeat\n\n";

pub fn complete(content: &str) -> String {
    format!(
        "event: complete\ndata: {}\n\n",
        serde_json::json!({ "content": content, "model": "m-1" })
    )
}

pub fn error(message: &str) -> String {
    format!("event: error\ndata: {}\n\n", serde_json::json!({ "message": message }))
}
