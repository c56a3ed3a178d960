use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::cache::SettingsCache;
use crate::collection::DocumentCollection;
use crate::config::{Collections, Environment};
use crate::content::{self, ContentError};
use crate::model::{ContentItem, PublishedArticle, Settings, SettingsPatch};
use crate::sweeper::{self, SweepError};
use crate::theme::ThemeState;

#[derive(Clone)]
pub struct AppState {
    pub remote: Arc<dyn DocumentCollection>,
    pub collections: Collections,
    pub cache: Arc<SettingsCache>,
    pub theme: ThemeState,
    pub environment: Environment,
    pub cron_secret: Option<String>,
}

/// Errors surfaced to HTTP callers as `{ "error": ... }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Upstream(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(%status, error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<ContentError> for ApiError {
    fn from(err: ContentError) -> Self {
        match err {
            ContentError::NotFound(id) => ApiError::NotFound(format!("article {} not found", id)),
            ContentError::Validation(msg) => ApiError::BadRequest(msg),
            ContentError::Backend(err) => ApiError::Internal(format!("{:#}", err)),
        }
    }
}

impl From<SweepError> for ApiError {
    fn from(err: SweepError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// `Json<T>` whose rejections become `ApiError::BadRequest`, so malformed
/// bodies still get an `{error}` response.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        Ok(ApiJson(value))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/cron/publish-scheduled", get(publish_scheduled))
        .route("/api/settings", get(get_settings).patch(patch_settings))
        .route("/api/settings/refresh", post(refresh_settings))
        .route("/api/articles/{id}/schedule", post(schedule_article))
        .route("/api/articles/{id}/publish", post(publish_article))
        .route("/api/articles/{id}/draft", post(draft_article))
        .route("/theme.css", get(theme_css))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepResponse {
    pub success: bool,
    pub message: String,
    pub published_at: DateTime<Utc>,
    pub articles: Vec<PublishedArticle>,
}

async fn publish_scheduled(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SweepResponse>, ApiError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if !sweeper::authorize_trigger(
        state.environment.is_production_like(),
        state.cron_secret.as_deref(),
        authorization,
    ) {
        warn!("rejected publish trigger with missing or invalid secret");
        return Err(ApiError::Unauthorized);
    }

    let report = sweeper::sweep(
        state.remote.as_ref(),
        &state.collections.articles,
        Utc::now(),
    )
    .await?;
    info!(
        published = report.articles.len(),
        skipped = report.skipped,
        failed = report.failed,
        malformed = report.malformed,
        "sweep finished"
    );
    Ok(Json(SweepResponse {
        success: true,
        message: report.message(),
        published_at: report.published_at,
        articles: report.articles,
    }))
}

async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.cache.snapshot())
}

async fn patch_settings(
    State(state): State<AppState>,
    ApiJson(patch): ApiJson<SettingsPatch>,
) -> Result<Json<Settings>, ApiError> {
    patch.validate().map_err(ApiError::BadRequest)?;
    state.cache.mutate(patch);
    Ok(Json(state.cache.snapshot()))
}

async fn refresh_settings(State(state): State<AppState>) -> Result<Json<Settings>, ApiError> {
    let settings = state
        .cache
        .refresh()
        .await
        .map_err(|err| ApiError::Upstream(format!("{:#}", err)))?;
    Ok(Json(settings))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleRequest {
    scheduled_at: DateTime<Utc>,
}

async fn schedule_article(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ScheduleRequest>,
) -> Result<Json<ContentItem>, ApiError> {
    let item = content::schedule(
        state.remote.as_ref(),
        &state.collections.articles,
        &id,
        req.scheduled_at,
        Utc::now(),
    )
    .await?;
    Ok(Json(item))
}

async fn publish_article(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ContentItem>, ApiError> {
    let item = content::publish_now(
        state.remote.as_ref(),
        &state.collections.articles,
        &id,
        Utc::now(),
    )
    .await?;
    Ok(Json(item))
}

async fn draft_article(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ContentItem>, ApiError> {
    let item =
        content::revert_to_draft(state.remote.as_ref(), &state.collections.articles, &id).await?;
    Ok(Json(item))
}

async fn theme_css(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        state.theme.current().to_css(),
    )
}
