//! Request logging and CORS layers

use axum::{body::Body, http::Request};
use tooling::logging::redact_secrets;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{Level, Span};

/// Span for one request; the query string may carry the stream credential.
fn request_span(request: &Request<Body>) -> Span {
    let uri = redact_secrets(&request.uri().to_string());
    tracing::info_span!("request", method = %request.method(), uri = %uri)
}

/// Request logging middleware
pub fn logging_layer(
) -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, fn(&Request<Body>) -> Span> {
    TraceLayer::new_for_http()
        .make_span_with(request_span as fn(&Request<Body>) -> Span)
        .on_response(DefaultOnResponse::new().level(Level::INFO).include_headers(false))
}

/// Browser clients open `/stream` cross-origin.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::permissive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_span_builds_for_tokenized_uri() {
        let request = Request::builder()
            .uri("/stream?session_id=s&token=secret")
            .body(Body::empty())
            .unwrap();
        let _span = request_span(&request);
        assert!(redact_secrets(&request.uri().to_string()).contains("token=[REDACTED]"));
    }
}
