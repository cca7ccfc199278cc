use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::models::*;
use crate::autosave::AutosaveConfig;
use crate::errors::{BoardError, StoreError};
use crate::ordering::DropTarget;
use crate::store::{BoardStore, RecordStore};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub store: BoardStore,
    pub ws_tx: broadcast::Sender<String>,
    /// Autosave timings handed to editing clients via `GET /api/config`.
    pub autosave: AutosaveConfig,
}

impl AppState {
    pub fn new(store: BoardStore, autosave: AutosaveConfig) -> Self {
        let ws_tx = store.sender().clone();
        Self {
            store,
            ws_tx,
            autosave,
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateColumnRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateSubtaskRequest {
    pub title: String,
}

#[derive(Deserialize)]
pub struct CreatePageRequest {
    pub title: String,
    pub content: Option<String>,
}

// ── Response payload types ────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ClientConfig {
    pub autosave: AutosaveTimings,
}

#[derive(Debug, Serialize)]
pub struct AutosaveTimings {
    pub debounce_ms: u64,
    pub grace_window_ms: u64,
}

impl From<AutosaveConfig> for AutosaveTimings {
    fn from(config: AutosaveConfig) -> Self {
        Self {
            debounce_ms: config.debounce.as_millis() as u64,
            grace_window_ms: config.grace_window.as_millis() as u64,
        }
    }
}

/// Reorder within the current group. `index` counts siblings with the moved
/// item removed; omitted means "after last".
#[derive(Deserialize)]
pub struct MoveRequest {
    pub index: Option<usize>,
}

#[derive(Deserialize)]
pub struct MoveTaskRequest {
    pub column_id: i64,
    pub index: Option<usize>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<BoardError>() {
            Some(e) if e.is_not_found() => ApiError::NotFound(e.to_string()),
            Some(BoardError::BadRequest(msg)) => ApiError::BadRequest(msg.clone()),
            _ => ApiError::Internal(format!("{:#}", err)),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            StoreError::Rejected(msg) => ApiError::BadRequest(msg),
            StoreError::Unavailable(msg) => ApiError::Internal(msg),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/{id}", get(get_project))
        .route("/api/projects/{id}/board", get(get_board))
        .route("/api/projects/{id}/columns", post(create_column))
        .route(
            "/api/projects/{id}/pages",
            get(list_pages).post(create_page),
        )
        .route(
            "/api/columns/{id}",
            patch(update_column).delete(delete_column),
        )
        .route("/api/columns/{id}/move", patch(move_column))
        .route("/api/columns/{id}/tasks", post(create_task))
        .route(
            "/api/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/api/tasks/{id}/move", patch(move_task))
        .route(
            "/api/tasks/{id}/subtasks",
            get(list_subtasks).post(create_subtask),
        )
        .route(
            "/api/subtasks/{id}",
            patch(update_subtask).delete(delete_subtask),
        )
        .route("/api/subtasks/{id}/move", patch(move_subtask))
        .route(
            "/api/pages/{id}",
            get(get_page).patch(update_page).delete(delete_page),
        )
        .route("/api/pages/{id}/move", patch(move_page))
        .route("/api/config", get(get_config))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn get_config(State(state): State<SharedState>) -> Json<ClientConfig> {
    Json(ClientConfig {
        autosave: state.autosave.into(),
    })
}

async fn list_projects(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.list_projects().await?))
}

async fn create_project(
    State(state): State<SharedState>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state.store.create_project(req.name).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.get_project(id).await?))
}

async fn get_board(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.board(id).await?))
}

// Columns

async fn create_column(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
    Json(req): Json<CreateColumnRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let column = RecordStore::<StatusColumn>::create(
        &state.store,
        NewColumn {
            project_id,
            name: req.name,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(column)))
}

async fn update_column(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<ColumnPatch>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        RecordStore::<StatusColumn>::update(&state.store, id, req).await?,
    ))
}

async fn delete_column(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    RecordStore::<StatusColumn>::delete(&state.store, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn move_column(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<MoveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let target = DropTarget::from_index(req.index);
    Ok(Json(state.store.move_column(id, target).await?))
}

// Tasks

async fn create_task(
    State(state): State<SharedState>,
    Path(column_id): Path<i64>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let task = RecordStore::<Task>::create(
        &state.store,
        NewTask {
            column_id,
            title: req.title,
            description: req.description.unwrap_or_default(),
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.task_detail(id).await?))
}

async fn update_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<TaskPatch>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(RecordStore::<Task>::update(&state.store, id, req).await?))
}

async fn delete_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    RecordStore::<Task>::delete(&state.store, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn move_task(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<MoveTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let target = DropTarget::from_index(req.index);
    Ok(Json(state.store.move_task(id, req.column_id, target).await?))
}

// Subtasks

async fn list_subtasks(
    State(state): State<SharedState>,
    Path(task_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.list_subtasks(task_id).await?))
}

async fn create_subtask(
    State(state): State<SharedState>,
    Path(task_id): Path<i64>,
    Json(req): Json<CreateSubtaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let subtask = RecordStore::<Subtask>::create(
        &state.store,
        NewSubtask {
            task_id,
            title: req.title,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(subtask)))
}

async fn update_subtask(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<SubtaskPatch>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(
        RecordStore::<Subtask>::update(&state.store, id, req).await?,
    ))
}

async fn delete_subtask(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    RecordStore::<Subtask>::delete(&state.store, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn move_subtask(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<MoveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let target = DropTarget::from_index(req.index);
    Ok(Json(state.store.move_subtask(id, target).await?))
}

// Pages

async fn list_pages(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.list_pages(project_id).await?))
}

async fn create_page(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
    Json(req): Json<CreatePageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let page = RecordStore::<Page>::create(
        &state.store,
        NewPage {
            project_id,
            title: req.title,
            content: req.content.unwrap_or_default(),
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(page)))
}

async fn get_page(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.get_page(id).await?))
}

async fn update_page(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<PagePatch>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(RecordStore::<Page>::update(&state.store, id, req).await?))
}

async fn delete_page(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    RecordStore::<Page>::delete(&state.store, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn move_page(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<MoveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let target = DropTarget::from_index(req.index);
    Ok(Json(state.store.move_page(id, target).await?))
}

// ── Tests ─────────────────────────────────────────────────────────────
