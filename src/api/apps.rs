use super::{ApiError, ApiState};
use crate::app::{App, AppForm, AppSummary};
use crate::auth::extract_account_id;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Slug of a created or updated app
#[derive(Serialize, Deserialize)]
pub struct SlugResponse {
    pub slug: String,
}

/// Full app view for its owner, credentials included
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDetails {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub website: Option<String>,
    pub callback_url: Option<String>,
    pub api_key: String,
    pub secret: String,
    pub created_at: DateTime<Utc>,
}

impl From<App> for AppDetails {
    fn from(app: App) -> Self {
        Self {
            id: app.id,
            slug: app.slug,
            name: app.name,
            description: app.description,
            website: app.website,
            callback_url: app.callback_url,
            api_key: app.api_key,
            secret: app.secret,
            created_at: app.created_at,
        }
    }
}

/// Create app management router
///
/// Every route acts for the account in the `X-Account-Id` header and only
/// sees apps that account owns.
pub fn create_app_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/apps", get(list_apps).post(create_app))
        .route("/api/apps/new", get(new_app_form))
        .route(
            "/api/apps/:slug",
            get(get_app).put(update_app).delete(delete_app),
        )
        .route("/api/apps/:slug/edit", get(edit_app_form))
        .with_state(Arc::new(state))
}

/// GET /api/apps
async fn list_apps(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<AppSummary>>, ApiError> {
    let account_id = extract_account_id(&headers)?;
    Ok(Json(state.registry.list_summaries(account_id)?))
}

/// POST /api/apps
async fn create_app(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    payload: Result<Json<AppForm>, JsonRejection>,
) -> Result<(StatusCode, Json<SlugResponse>), ApiError> {
    let account_id = extract_account_id(&headers)?;
    let Json(form) = payload?;
    let slug = state.registry.create(account_id, &form)?;
    Ok((StatusCode::CREATED, Json(SlugResponse { slug })))
}

/// GET /api/apps/new - blank registration form
async fn new_app_form(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<AppForm>, ApiError> {
    let account_id = extract_account_id(&headers)?;
    Ok(Json(state.registry.get_new_form(account_id)))
}

/// GET /api/apps/:slug
async fn get_app(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<AppDetails>, ApiError> {
    let account_id = extract_account_id(&headers)?;
    let app = state.registry.get_by_slug(account_id, &slug)?;
    Ok(Json(app.into()))
}

/// GET /api/apps/:slug/edit - form pre-filled with current metadata
async fn edit_app_form(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<AppForm>, ApiError> {
    let account_id = extract_account_id(&headers)?;
    Ok(Json(state.registry.get_form(account_id, &slug)?))
}

/// PUT /api/apps/:slug - returns the slug, which changes on rename
async fn update_app(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    payload: Result<Json<AppForm>, JsonRejection>,
) -> Result<Json<SlugResponse>, ApiError> {
    let account_id = extract_account_id(&headers)?;
    let Json(form) = payload?;
    let slug = state.registry.update(account_id, &slug, &form)?;
    Ok(Json(SlugResponse { slug }))
}

/// DELETE /api/apps/:slug
async fn delete_app(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<StatusCode, ApiError> {
    let account_id = extract_account_id(&headers)?;
    state.registry.delete(account_id, &slug)?;
    Ok(StatusCode::NO_CONTENT)
}
