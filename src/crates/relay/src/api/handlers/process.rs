//! `POST /process`: accept a query and run it in the background

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::auth::{authorize, bearer_token};
use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::{AppState, RunningJob};
use crate::fingerprint::MAX_ATTACHMENT_BYTES;
use crate::protocol::{ProcessAccepted, ProcessRequest};
use crate::upstream::UpstreamRequest;
use crate::worker::Job;

fn validate(request: &ProcessRequest) -> ApiResult<()> {
    if request.session_id.trim().is_empty() {
        return Err(ApiError::BadRequest("session_id cannot be empty".to_string()));
    }
    if request.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query cannot be empty".to_string()));
    }
    if let Some(file) = request.files.iter().find(|f| f.size > MAX_ATTACHMENT_BYTES) {
        return Err(ApiError::BadRequest(format!(
            "attachment {} exceeds {} bytes",
            file.name, MAX_ATTACHMENT_BYTES
        )));
    }
    Ok(())
}

/// Handler for POST /process
///
/// Answers `202 Accepted` once the job is scheduled; results arrive on the
/// session's push channel. Resubmitting the request of the job already
/// running for the session answers `202` with that job's id, so a retried
/// POST whose first response was lost does not fail. A different request
/// for a busy session is a conflict.
pub async fn process(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ProcessRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ProcessAccepted>)> {
    authorize(state.config.server.auth_token.as_deref(), bearer_token(&headers))?;
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    validate(&request)?;

    let session_id = request.session_id;
    let upstream_request = UpstreamRequest {
        category: request.category,
        query: request.query,
        files: request.files,
    };
    let key = upstream_request.cache_key()?;

    let job_id = Uuid::new_v4().to_string();
    match state.jobs.entry(session_id.clone()) {
        Entry::Occupied(running) if running.get().key == key => {
            let job_id = running.get().job_id.clone();
            debug!(session_id = %session_id, %job_id, "Resubmitted job already running");
            return Ok(accepted(session_id, job_id));
        }
        Entry::Occupied(running) => {
            return Err(ApiError::Conflict(format!(
                "job {} already running for session {}",
                running.get().job_id,
                session_id
            )));
        }
        Entry::Vacant(slot) => {
            slot.insert(RunningJob {
                job_id: job_id.clone(),
                key,
            });
        }
    }

    info!(
        session_id = %session_id,
        %job_id,
        category = %upstream_request.category,
        files = upstream_request.files.len(),
        "Job accepted"
    );

    let job = Job {
        job_id: job_id.clone(),
        session_id: session_id.clone(),
        request: upstream_request,
    };

    let worker = state.worker.clone();
    let jobs = state.jobs.clone();
    let slot_session = session_id.clone();
    let slot_job = job_id.clone();
    tokio::spawn(async move {
        // the worker has already published the terminal event on failure
        let _ = worker.run(job).await;
        jobs.remove_if(&slot_session, |_, running| running.job_id == slot_job);
        debug!(session_id = %slot_session, "Job slot released");
    });

    Ok(accepted(session_id, job_id))
}

fn accepted(session_id: String, job_id: String) -> (StatusCode, Json<ProcessAccepted>) {
    (
        StatusCode::ACCEPTED,
        Json(ProcessAccepted {
            accepted: true,
            session_id,
            job_id,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{Category, FileAttachment};

    fn request(session_id: &str, query: &str) -> ProcessRequest {
        ProcessRequest {
            session_id: session_id.to_string(),
            query: query.to_string(),
            category: Category::General,
            files: Vec::new(),
        }
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        assert!(validate(&request("s", "explain recursion")).is_ok());
        assert!(matches!(validate(&request(" ", "q")), Err(ApiError::BadRequest(_))));
        assert!(matches!(validate(&request("s", "\n")), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_attachment() {
        let mut file = FileAttachment::from_bytes("big.pdf", b"x").unwrap();
        file.size = MAX_ATTACHMENT_BYTES + 1;
        let mut req = request("s", "q");
        req.files.push(file);
        assert!(validate(&req).is_err());
    }
}
