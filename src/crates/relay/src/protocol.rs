//! HTTP request and response bodies shared by server and client

use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::fingerprint::{Category, FileAttachment};
use crate::session::SessionStats;

/// Body of `POST /process`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub session_id: String,
    pub query: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub files: Vec<FileAttachment>,
}

/// `202 Accepted` response of `POST /process`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessAccepted {
    pub accepted: bool,
    pub session_id: String,
    pub job_id: String,
}

/// Query string of `GET /stream`
#[derive(Debug, Clone, Deserialize)]
pub struct StreamParams {
    pub session_id: String,
    pub token: Option<String>,
}

/// `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// `GET /stats`
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub sessions: SessionStats,
    pub cache: CacheStats,
    pub jobs_in_flight: usize,
}
