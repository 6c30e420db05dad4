//! Client transport
//!
//! The orchestrator and channel client talk to the server through the
//! [`Transport`] trait so tests can substitute scripted transports.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use crate::protocol::{ProcessAccepted, ProcessRequest};
use crate::{RelayError, Result};

/// Raw bytes of an open push channel
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Connection to a relay server
#[async_trait]
pub trait Transport: Send + Sync {
    /// `POST /process`: ask the server to start work for a session.
    async fn submit(&self, request: &ProcessRequest) -> Result<ProcessAccepted>;

    /// `GET /stream`: open the push channel of a session.
    async fn open_channel(&self, session_id: &str) -> Result<ByteStream>;
}

/// reqwest-backed [`Transport`]
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(client, base_url, token))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RelayError::from_status(status.as_u16(), body))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn submit(&self, request: &ProcessRequest) -> Result<ProcessAccepted> {
        let url = format!("{}/process", self.base_url);
        debug!(session_id = %request.session_id, %url, "Submitting request");

        let mut builder = self.client.post(&url).json(request);
        if let Some(token) = &self.token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = error_for_status(builder.send().await?).await?;
        if response.status() != StatusCode::ACCEPTED && response.status() != StatusCode::OK {
            return Err(RelayError::Decode(format!(
                "unexpected status {} from /process",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    async fn open_channel(&self, session_id: &str) -> Result<ByteStream> {
        let url = format!("{}/stream", self.base_url);
        debug!(session_id, %url, "Opening push channel");

        let mut query = vec![("session_id", session_id.to_string())];
        if let Some(token) = &self.token {
            // browser-compatible channels cannot set headers
            query.push(("token", token.clone()));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = error_for_status(response).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(RelayError::from))
            .boxed())
    }
}
