use super::{ApiError, ApiState};
use crate::app::PublicApp;
use crate::auth::{extract_account_id, extract_bearer_token};
use crate::connection::AppConnection;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

/// Query for the authorization prompt
#[derive(Deserialize)]
pub struct AuthorizeQuery {
    pub api_key: String,
}

/// Member approval of an app
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub api_key: String,
}

/// Member revocation of a connection
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectRequest {
    pub access_token: String,
}

/// Create connection router
pub fn create_connection_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/authorize", get(authorize_prompt))
        .route(
            "/api/connections",
            post(connect).get(list_connections).delete(disconnect),
        )
        .route("/api/connections/current", get(current_connection))
        .with_state(Arc::new(state))
}

/// GET /api/authorize?api_key=... - what the member is asked to approve
async fn authorize_prompt(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Json<PublicApp>, ApiError> {
    let app = state.registry.find_by_api_key(&query.api_key)?;
    Ok(Json(PublicApp::from(&app)))
}

/// POST /api/connections - member approved, issue (or reuse) the connection
async fn connect(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    payload: Result<Json<ConnectRequest>, JsonRejection>,
) -> Result<Json<AppConnection>, ApiError> {
    let account_id = extract_account_id(&headers)?;
    let Json(request) = payload?;
    Ok(Json(state.authorizer.connect(account_id, &request.api_key)?))
}

/// GET /api/connections - the member's connections
async fn list_connections(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<AppConnection>>, ApiError> {
    let account_id = extract_account_id(&headers)?;
    Ok(Json(state.authorizer.list_connections(account_id)?))
}

/// GET /api/connections/current - resolve the client's bearer token
async fn current_connection(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<AppConnection>, ApiError> {
    let token = extract_bearer_token(&headers)?;
    Ok(Json(state.authorizer.find_by_access_token(&token)?))
}

/// DELETE /api/connections - always 204, revoked or not
async fn disconnect(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    payload: Result<Json<DisconnectRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let account_id = extract_account_id(&headers)?;
    let Json(request) = payload?;
    state
        .authorizer
        .disconnect(account_id, &request.access_token)?;
    Ok(StatusCode::NO_CONTENT)
}
