//! Upstream language model API
//!
//! The server worker sends each query to an [`Upstream`]. The bundled
//! implementation speaks the OpenRouter (OpenAI-compatible) chat
//! completions API.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::UpstreamSection;
use crate::fingerprint::{CacheKey, Category, FileAttachment};
use crate::{RelayError, Result};

/// What the worker asks the upstream for
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub category: Category,
    pub query: String,
    pub files: Vec<FileAttachment>,
}

impl UpstreamRequest {
    /// Fingerprint identifying identical requests
    pub fn cache_key(&self) -> Result<CacheKey> {
        let fingerprints: Vec<String> = self
            .files
            .iter()
            .map(|file| file.fingerprint().to_string())
            .collect();
        CacheKey::derive(self.category, &self.query, &fingerprints)
    }
}

/// Upstream answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamReply {
    pub content: String,
    pub model: String,
}

/// A text-completion backend.
///
/// Errors must use [`RelayError::from_status`] for HTTP failures so the
/// worker's retry predicate classifies them correctly.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn complete(&self, request: &UpstreamRequest) -> Result<UpstreamReply>;

    /// Model identifier reported in `complete` events
    fn model(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenRouter chat completions client
#[derive(Clone)]
pub struct OpenRouterUpstream {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    app_name: Option<String>,
}

impl OpenRouterUpstream {
    pub fn new(section: &UpstreamSection, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: section.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: section.model.clone(),
            temperature: section.temperature,
            max_tokens: section.max_tokens,
            app_name: None,
        })
    }

    /// Application name sent in OpenRouter's attribution headers.
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    fn messages(request: &UpstreamRequest) -> Vec<ChatMessage> {
        let mut content = request.query.clone();
        if !request.files.is_empty() {
            let names: Vec<&str> = request.files.iter().map(|f| f.name.as_str()).collect();
            content.push_str(&format!("\n\nAttached files: {}", names.join(", ")));
        }

        vec![
            ChatMessage {
                role: "system",
                content: format!("You are a helpful {} assistant.", request.category),
            },
            ChatMessage { role: "user", content },
        ]
    }
}

#[async_trait]
impl Upstream for OpenRouterUpstream {
    async fn complete(&self, request: &UpstreamRequest) -> Result<UpstreamReply> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: Self::messages(request),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        let mut builder = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&body);
        if let Some(app_name) = &self.app_name {
            builder = builder.header("HTTP-Referer", app_name).header("X-Title", app_name);
        }

        debug!(%url, model = %self.model, category = %request.category, "Calling upstream");
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RelayError::from_status(status.as_u16(), text));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Decode(format!("invalid upstream response: {}", e)))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| RelayError::Decode("upstream response has no choices".to_string()))?;

        Ok(UpstreamReply {
            content,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}
