use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use serde::Deserialize;
use stageboard_common::{StageId, StagePatch};

use crate::errors::EngineError;
use crate::pipeline::{DropGesture, DropOutcome, EditOutcome, PipelineEngine, PipelineHub};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub hub: PipelineHub,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    fn engine(&self, pipeline: &str) -> Result<&PipelineEngine, ApiError> {
        self.hub.get(pipeline).map_err(ApiError::from)
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateStageRequest {
    pub display_name: String,
    pub color: Option<String>,
}

#[derive(Deserialize)]
pub struct ReorderStagesRequest {
    pub keys: Vec<String>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    /// The request was understood but refused by validation.
    Unprocessable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::UnknownPipeline { .. }
            | EngineError::StageNotFound { .. }
            | EngineError::EntityNotFound { .. } => ApiError::NotFound(err.to_string()),
            EngineError::DuplicateKey { .. }
            | EngineError::InvalidOrder { .. }
            | EngineError::EmptyDisplayName
            | EngineError::UnknownStage { .. } => ApiError::Unprocessable(err.to_string()),
            EngineError::ConfigLoad { .. }
            | EngineError::TransitionFailed { .. }
            | EngineError::Store(_) => ApiError::Internal(format!("{:#}", anyhow::Error::new(err))),
        }
    }
}

fn applied<T>(outcome: EditOutcome<T>) -> Result<T, ApiError> {
    match outcome {
        EditOutcome::Applied(value) => Ok(value),
        EditOutcome::Rejected { message } => Err(ApiError::Unprocessable(message)),
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/pipelines", get(list_pipelines))
        .route("/api/pipelines/{pipeline}/board", get(get_board))
        .route("/api/pipelines/{pipeline}/refresh", post(refresh_pipeline))
        .route(
            "/api/pipelines/{pipeline}/stages",
            get(list_stages).post(create_stage),
        )
        .route("/api/pipelines/{pipeline}/stages/order", put(reorder_stages))
        .route(
            "/api/pipelines/{pipeline}/stages/{id}",
            patch(update_stage).delete(delete_stage),
        )
        .route("/api/pipelines/{pipeline}/drop", post(drop_card))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_pipelines(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.hub.bindings())
}

async fn get_board(
    State(state): State<SharedState>,
    Path(pipeline): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine(&pipeline)?;
    Ok(Json(engine.board().view()))
}

async fn refresh_pipeline(
    State(state): State<SharedState>,
    Path(pipeline): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.engine(&pipeline)?.refresh().await?;
    Ok(Json(report))
}

async fn list_stages(
    State(state): State<SharedState>,
    Path(pipeline): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine(&pipeline)?.stages()))
}

async fn create_stage(
    State(state): State<SharedState>,
    Path(pipeline): Path<String>,
    Json(req): Json<CreateStageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .engine(&pipeline)?
        .editor()
        .add_stage(&req.display_name, req.color.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(applied(outcome)?)))
}

async fn update_stage(
    State(state): State<SharedState>,
    Path((pipeline, id)): Path<(String, StageId)>,
    Json(patch): Json<StagePatch>,
) -> Result<impl IntoResponse, ApiError> {
    if patch.is_empty() {
        return Err(ApiError::BadRequest(
            "Nothing to update: provide display_name and/or color".to_string(),
        ));
    }
    let outcome = state.engine(&pipeline)?.editor().update(id, &patch).await?;
    Ok(Json(applied(outcome)?))
}

async fn delete_stage(
    State(state): State<SharedState>,
    Path((pipeline, id)): Path<(String, StageId)>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.engine(&pipeline)?.editor().remove(id).await?;
    applied(outcome)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reorder_stages(
    State(state): State<SharedState>,
    Path(pipeline): Path<String>,
    Json(req): Json<ReorderStagesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.engine(&pipeline)?.editor().reorder(&req.keys).await?;
    Ok(Json(applied(outcome)?))
}

/// Accepts a drag-and-drop gesture. Persistence continues in the
/// background; its outcome is pushed over `/ws`.
async fn drop_card(
    State(state): State<SharedState>,
    Path(pipeline): Path<String>,
    Json(gesture): Json<DropGesture>,
) -> Result<impl IntoResponse, ApiError> {
    let engine = state.engine(&pipeline)?;
    match engine.board().handle_drop(gesture) {
        DropOutcome::Accepted(_) => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"status": "accepted"})),
        )),
        DropOutcome::Unchanged => Ok((
            StatusCode::OK,
            Json(serde_json::json!({"status": "unchanged"})),
        )),
        DropOutcome::Rejected(err) => Err(err.into()),
    }
}
