// HTTP API for app registration and member connections

pub mod apps;
pub mod connections;

use crate::app::AppRegistry;
use crate::auth::HeaderError;
use crate::connection::ConnectionAuthorizer;
use crate::error::{Error, FieldError};
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, warn};

pub use apps::create_app_router;
pub use connections::create_connection_router;

/// Shared state for every API router
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<AppRegistry>,
    pub authorizer: Arc<ConnectionAuthorizer>,
}

/// Full API: app management, connections and health check
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(create_app_router(state.clone()))
        .merge(create_connection_router(state))
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

/// API error types
#[derive(Debug)]
pub enum ApiError {
    /// Missing or malformed credential header
    Unauthorized(HeaderError),
    /// Request body missing, not JSON, or the wrong shape
    BadBody(JsonRejection),
    Domain(Error),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Domain(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadBody(rejection)
    }
}

impl From<HeaderError> for ApiError {
    fn from(err: HeaderError) -> Self {
        ApiError::Unauthorized(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, fields) = match self {
            ApiError::Unauthorized(e) => (StatusCode::UNAUTHORIZED, e.to_string(), Vec::new()),
            ApiError::BadBody(rejection) => (rejection.status(), rejection.body_text(), Vec::new()),
            ApiError::Domain(Error::NotFound) => {
                (StatusCode::NOT_FOUND, "App not found".to_string(), Vec::new())
            }
            ApiError::Domain(Error::InvalidApiKey) => {
                (StatusCode::UNAUTHORIZED, "Invalid api key".to_string(), Vec::new())
            }
            ApiError::Domain(Error::NoSuchConnection) => (
                StatusCode::UNAUTHORIZED,
                "Invalid access token".to_string(),
                Vec::new(),
            ),
            ApiError::Domain(Error::ValidationFailed(fields)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Validation failed".to_string(),
                fields,
            ),
            ApiError::Domain(e) if e.is_retryable() => {
                warn!(error = %e, "Store busy, asking client to retry");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Temporarily unavailable, retry".to_string(),
                    Vec::new(),
                )
            }
            ApiError::Domain(e) => {
                error!(error = %e, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error".to_string(),
                    Vec::new(),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                fields,
            }),
        )
            .into_response()
    }
}
