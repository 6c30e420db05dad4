//! HTTP surface of the relay server
//!
//! - `POST /process` - accept a query for a session
//! - `GET /stream` - server-sent event push channel of a session
//! - `GET /health` - liveness
//! - `GET /stats` - session, cache and job counts

pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;

pub use error::{ApiError, ApiErrorResponse, ApiResult};
pub use routes::{create_router, AppState, RunningJob};
