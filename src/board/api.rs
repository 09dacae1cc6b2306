use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use tokio::sync::broadcast;

use super::access;
use super::db::DbHandle;
#[cfg(test)]
use super::db::TrackerDb;
use super::models::*;
use super::positions::RankedItem;
use super::ws::{BoardEvent, broadcast_event};
use crate::errors::TrackerError;

/// Largest file whose metadata may be registered.
pub const MAX_FILE_SIZE: i64 = 25 * 1024 * 1024;

/// Header carrying the caller's user id.
pub const USER_HEADER: &str = "x-user-id";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: broadcast::Sender<String>,
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match TrackerError::find(&err) {
            Some(TrackerError::NotFound { entity, id }) => {
                ApiError::NotFound(format!("{} {} not found", entity, id))
            }
            Some(TrackerError::Validation(msg)) => ApiError::BadRequest(msg.clone()),
            Some(TrackerError::Unauthorized(msg)) => ApiError::Unauthorized(msg.clone()),
            Some(TrackerError::Forbidden(msg)) => ApiError::Forbidden(msg.clone()),
            Some(TrackerError::Conflict(msg)) => ApiError::Conflict(msg.clone()),
            None => {
                tracing::error!(error = %format!("{:#}", err), "request failed");
                ApiError::Internal("Internal server error".to_string())
            }
        }
    }
}

// ── Caller identity ───────────────────────────────────────────────────

/// The authenticated caller, resolved from the `x-user-id` header.
pub struct CurrentUser(pub User);

impl FromRequestParts<SharedState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let user = state
            .db
            .call(move |db| access::caller(db, user_id.as_deref()))
            .await?;
        Ok(CurrentUser(user))
    }
}

// ── Request payload types ─────────────────────────────────────────────

fn require_text(field: &str, value: &str, max: usize) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest(format!("{} must not be empty", field)));
    }
    if trimmed.chars().count() > max {
        return Err(ApiError::BadRequest(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(trimmed.to_string())
}

fn optional_text(field: &str, value: Option<&str>, max: usize) -> Result<Option<String>, ApiError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => require_text(field, v, max).map(Some),
        None => Ok(None),
    }
}

fn check_position(position: Option<i64>) -> Result<(), ApiError> {
    match position {
        Some(p) if p < 0 => Err(ApiError::BadRequest("position must be >= 0".into())),
        _ => Ok(()),
    }
}

fn check_comp_range(min: Option<i64>, max: Option<i64>) -> Result<(), ApiError> {
    if min.is_some_and(|v| v < 0) || max.is_some_and(|v| v < 0) {
        return Err(ApiError::BadRequest("Compensation must be >= 0".into()));
    }
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(ApiError::BadRequest("compMin must not exceed compMax".into()));
        }
    }
    Ok(())
}

/// Parse an RFC 3339 timestamp and normalise it to UTC with a `Z` suffix so
/// stored values compare correctly as strings.
fn normalize_timestamp(field: &str, raw: &str) -> Result<String, ApiError> {
    chrono::DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| {
            dt.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Millis, true)
        })
        .map_err(|_| ApiError::BadRequest(format!("{} must be an RFC 3339 timestamp", field)))
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub name: Option<String>,
}

impl CreateUserRequest {
    fn validate(&self) -> Result<(String, Option<String>), ApiError> {
        let email = require_text("email", &self.email, 254)?.to_lowercase();
        if !email.contains('@') {
            return Err(ApiError::BadRequest("email must be a valid address".into()));
        }
        let name = optional_text("name", self.name.as_deref(), 120)?;
        Ok((email, name))
    }
}

#[derive(Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub user_id: String,
    pub role: Option<WorkspaceRole>,
}

impl AddMemberRequest {
    fn validate(&self) -> Result<WorkspaceRole, ApiError> {
        match self.role.unwrap_or(WorkspaceRole::Member) {
            WorkspaceRole::Owner => Err(ApiError::BadRequest(
                "role must be ADMIN or MEMBER".into(),
            )),
            role => Ok(role),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePipelineRequest {
    pub name: String,
    pub is_default: Option<bool>,
    pub create_default_stages: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePipelineRequest {
    pub name: Option<String>,
    pub is_default: Option<bool>,
}

#[derive(Deserialize)]
pub struct CreateStageRequest {
    pub name: String,
    pub color: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderItemRequest {
    pub stage_id: String,
    pub position: i64,
}

#[derive(Deserialize)]
pub struct ReorderStagesRequest {
    pub items: Vec<ReorderItemRequest>,
}

#[derive(Deserialize)]
pub struct MoveStageRequest {
    pub position: Option<i64>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListApplicationsQuery {
    pub pipeline_id: Option<String>,
    pub stage_id: Option<String>,
    pub q: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApplicationRequest {
    pub pipeline_id: String,
    pub stage_id: String,
    pub company: String,
    pub role: String,
    pub link: Option<String>,
    pub source: Option<String>,
    pub location: Option<String>,
    pub comp_min: Option<i64>,
    pub comp_max: Option<i64>,
    pub priority: Option<ApplicationPriority>,
    pub status: Option<ApplicationStatus>,
    pub position: Option<i64>,
}

impl CreateApplicationRequest {
    fn validate(self, workspace_id: String) -> Result<NewApplication, ApiError> {
        check_comp_range(self.comp_min, self.comp_max)?;
        check_position(self.position)?;
        Ok(NewApplication {
            workspace_id,
            pipeline_id: require_text("pipelineId", &self.pipeline_id, 64)?,
            stage_id: require_text("stageId", &self.stage_id, 64)?,
            company: require_text("company", &self.company, 120)?,
            role: require_text("role", &self.role, 120)?,
            link: optional_text("link", self.link.as_deref(), 2048)?,
            source: optional_text("source", self.source.as_deref(), 120)?,
            location: optional_text("location", self.location.as_deref(), 120)?,
            comp_min: self.comp_min,
            comp_max: self.comp_max,
            priority: self.priority,
            status: self.status,
            position: self.position,
        })
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateApplicationRequest {
    pub company: Option<String>,
    pub role: Option<String>,
    pub link: Option<String>,
    pub source: Option<String>,
    pub location: Option<String>,
    pub comp_min: Option<i64>,
    pub comp_max: Option<i64>,
    pub priority: Option<ApplicationPriority>,
    pub status: Option<ApplicationStatus>,
    pub stage_id: Option<String>,
    pub position: Option<i64>,
}

impl UpdateApplicationRequest {
    fn validate(self) -> Result<ApplicationPatch, ApiError> {
        check_comp_range(self.comp_min, self.comp_max)?;
        check_position(self.position)?;
        let company = match self.company.as_deref() {
            Some(c) => Some(require_text("company", c, 120)?),
            None => None,
        };
        let role = match self.role.as_deref() {
            Some(r) => Some(require_text("role", r, 120)?),
            None => None,
        };
        Ok(ApplicationPatch {
            company,
            role,
            link: optional_text("link", self.link.as_deref(), 2048)?,
            source: optional_text("source", self.source.as_deref(), 120)?,
            location: optional_text("location", self.location.as_deref(), 120)?,
            comp_min: self.comp_min,
            comp_max: self.comp_max,
            priority: self.priority,
            status: self.status,
            stage_id: self.stage_id,
            position: self.position,
        })
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MoveApplicationRequest {
    pub stage_id: Option<String>,
    pub position: Option<i64>,
}

#[derive(Deserialize)]
pub struct CreateNoteRequest {
    pub content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    pub due_at: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksQuery {
    pub status: Option<TaskStatus>,
    pub due_before: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub status: Option<TaskStatus>,
    pub due_at: Option<String>,
}

impl UpdateTaskRequest {
    fn validate(self) -> Result<TaskPatch, ApiError> {
        let title = match self.title.as_deref() {
            Some(t) => Some(require_text("title", t, 120)?),
            None => None,
        };
        let due_at = match self.due_at.as_deref() {
            Some(d) => Some(normalize_timestamp("dueAt", d)?),
            None => None,
        };
        Ok(TaskPatch {
            title,
            status: self.status,
            due_at,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterFileRequest {
    pub name: String,
    pub storage_key: String,
    pub mime: String,
    pub size: i64,
}

impl RegisterFileRequest {
    fn validate(self) -> Result<NewFile, ApiError> {
        if !(1..=MAX_FILE_SIZE).contains(&self.size) {
            return Err(ApiError::BadRequest(format!(
                "size must be between 1 and {} bytes",
                MAX_FILE_SIZE
            )));
        }
        Ok(NewFile {
            name: require_text("name", &self.name, 255)?,
            storage_key: require_text("storageKey", &self.storage_key, 512)?,
            mime: require_text("mime", &self.mime, 100)?,
            size: self.size,
        })
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/users", post(create_user))
        .route("/api/me", get(me))
        .route("/api/workspaces", get(list_workspaces).post(create_workspace))
        .route("/api/workspaces/{id}", get(get_workspace))
        .route("/api/workspaces/{id}/members", post(add_member))
        .route(
            "/api/workspaces/{id}/pipelines",
            get(list_pipelines).post(create_pipeline),
        )
        .route(
            "/api/workspaces/{id}/applications",
            get(list_applications).post(create_application),
        )
        .route("/api/workspaces/{id}/tasks", get(list_workspace_tasks))
        .route(
            "/api/pipelines/{id}",
            get(get_pipeline).patch(update_pipeline),
        )
        .route("/api/pipelines/{id}/board", get(get_board))
        .route(
            "/api/pipelines/{id}/stages",
            get(list_stages).post(create_stage),
        )
        .route("/api/pipelines/{id}/stages/reorder", patch(reorder_stages))
        .route("/api/stages/{id}/move", patch(move_stage))
        .route(
            "/api/applications/{id}",
            get(get_application)
                .patch(update_application)
                .delete(delete_application),
        )
        .route("/api/applications/{id}/move", patch(move_application))
        .route(
            "/api/applications/{id}/activities",
            get(list_activities).post(create_note),
        )
        .route(
            "/api/applications/{id}/tasks",
            get(list_application_tasks).post(create_task),
        )
        .route(
            "/api/applications/{id}/files",
            get(list_files).post(register_file),
        )
        .route("/api/tasks/{id}", patch(update_task))
        .route("/api/files/{id}", delete(delete_file))
}

// ── Handlers: users & workspaces ──────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn create_user(
    State(state): State<SharedState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (email, name) = req.validate()?;
    let user = state
        .db
        .call(move |db| db.create_user(&email, name.as_deref()))
        .await?;
    tracing::info!(user_id = %user.id, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn me(CurrentUser(user): CurrentUser) -> impl IntoResponse {
    Json(user)
}

async fn list_workspaces(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let workspaces = state
        .db
        .call(move |db| db.list_workspaces_for_user(&user.id))
        .await?;
    Ok(Json(workspaces))
}

async fn create_workspace(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<CreateWorkspaceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = require_text("name", &req.name, 80)?;
    let workspace = state
        .db
        .call(move |db| db.create_workspace(&user.id, &name))
        .await?;
    tracing::info!(workspace_id = %workspace.id, "workspace created");
    Ok((StatusCode::CREATED, Json(workspace)))
}

async fn get_workspace(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = state
        .db
        .call(move |db| {
            access::assert_member(db, &id, &user.id)?;
            db.get_workspace(&id)?
                .ok_or_else(|| TrackerError::not_found("Workspace", &id).into())
        })
        .await?;
    Ok(Json(workspace))
}

async fn add_member(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let role = req.validate()?;
    let member_id = req.user_id;
    let membership = state
        .db
        .call(move |db| {
            access::assert_role(
                db,
                &id,
                &user.id,
                &[WorkspaceRole::Owner, WorkspaceRole::Admin],
            )?;
            db.add_member(&id, &member_id, role)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(membership)))
}

// ── Handlers: pipelines & stages ──────────────────────────────────────

async fn list_pipelines(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let pipelines = state
        .db
        .call(move |db| {
            access::assert_member(db, &id, &user.id)?;
            db.list_pipelines(&id)
        })
        .await?;
    Ok(Json(pipelines))
}

async fn create_pipeline(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<CreatePipelineRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = require_text("name", &req.name, 80)?;
    let is_default = req.is_default.unwrap_or(false);
    let with_stages = req.create_default_stages.unwrap_or(true);
    let pipeline = state
        .db
        .call(move |db| {
            access::assert_member(db, &id, &user.id)?;
            db.create_pipeline(&id, &name, is_default, with_stages)
        })
        .await?;
    broadcast_event(
        &state.ws_tx,
        &BoardEvent::PipelineCreated {
            pipeline: pipeline.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(pipeline)))
}

async fn get_pipeline(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let pipeline = state
        .db
        .call(move |db| access::pipeline_for(db, &id, &user.id))
        .await?;
    Ok(Json(pipeline))
}

async fn update_pipeline(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<UpdatePipelineRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = match req.name.as_deref() {
        Some(n) => Some(require_text("name", n, 80)?),
        None => None,
    };
    let is_default = req.is_default;
    let pipeline = state
        .db
        .call(move |db| {
            access::pipeline_for(db, &id, &user.id)?;
            db.update_pipeline(&id, name.as_deref(), is_default)
        })
        .await?;
    Ok(Json(pipeline))
}

async fn get_board(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state
        .db
        .call(move |db| {
            access::pipeline_for(db, &id, &user.id)?;
            db.get_board(&id)
        })
        .await?;
    Ok(Json(board))
}

async fn list_stages(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let stages = state
        .db
        .call(move |db| {
            access::pipeline_for(db, &id, &user.id)?;
            db.list_stages(&id)
        })
        .await?;
    Ok(Json(stages))
}

async fn create_stage(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<CreateStageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = require_text("name", &req.name, 50)?;
    let color = optional_text("color", req.color.as_deref(), 20)?;
    let stage = state
        .db
        .call(move |db| {
            access::pipeline_for(db, &id, &user.id)?;
            db.create_stage(&id, &name, color.as_deref())
        })
        .await?;
    broadcast_event(&state.ws_tx, &BoardEvent::StageCreated { stage: stage.clone() });
    Ok((StatusCode::CREATED, Json(stage)))
}

async fn reorder_stages(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<ReorderStagesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let items: Vec<RankedItem> = req
        .items
        .into_iter()
        .map(|i| RankedItem {
            id: i.stage_id,
            rank: i.position,
        })
        .collect();
    let pipeline_id = id.clone();
    let stages = state
        .db
        .call(move |db| {
            access::pipeline_for(db, &id, &user.id)?;
            db.reorder_stages(&id, &items)
        })
        .await?;
    tracing::info!(pipeline_id = %pipeline_id, count = stages.len(), "stages reordered");
    broadcast_event(
        &state.ws_tx,
        &BoardEvent::StagesReordered {
            pipeline_id,
            stages: stages.clone(),
        },
    );
    Ok(Json(stages))
}

async fn move_stage(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<MoveStageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_position(req.position)?;
    let position = req.position;
    let (stage, stages) = state
        .db
        .call(move |db| {
            access::stage_for(db, &id, &user.id)?;
            let (stage, _) = db.move_stage(&id, position)?;
            let stages = db.list_stages(&stage.pipeline_id)?;
            Ok((stage, stages))
        })
        .await?;
    broadcast_event(
        &state.ws_tx,
        &BoardEvent::StagesReordered {
            pipeline_id: stage.pipeline_id.clone(),
            stages,
        },
    );
    Ok(Json(stage))
}

// ── Handlers: applications ────────────────────────────────────────────

async fn list_applications(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Query(query): Query<ListApplicationsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = ApplicationFilter {
        pipeline_id: query.pipeline_id,
        stage_id: query.stage_id,
        q: query.q,
    };
    let apps = state
        .db
        .call(move |db| {
            access::assert_member(db, &id, &user.id)?;
            db.list_applications(&id, &filter)
        })
        .await?;
    Ok(Json(apps))
}

async fn create_application(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<CreateApplicationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let input = req.validate(id)?;
    let app = state
        .db
        .call(move |db| {
            access::assert_member(db, &input.workspace_id, &user.id)?;
            db.create_application(&input)
        })
        .await?;
    tracing::info!(application_id = %app.id, stage_id = %app.stage_id, position = app.position, "application created");
    broadcast_event(
        &state.ws_tx,
        &BoardEvent::ApplicationCreated {
            application: app.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(app)))
}

async fn get_application(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let app = state
        .db
        .call(move |db| access::application_for(db, &id, &user.id))
        .await?;
    Ok(Json(app))
}

async fn update_application(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateApplicationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let patch = req.validate()?;
    let (app, outcome) = state
        .db
        .call(move |db| {
            access::application_for(db, &id, &user.id)?;
            db.update_application(&id, &user.id, &patch)
        })
        .await?;
    if let Some(outcome) = outcome {
        broadcast_event(
            &state.ws_tx,
            &BoardEvent::ApplicationMoved {
                application_id: app.id.clone(),
                from_stage_id: outcome.from.group_id,
                to_stage_id: outcome.to.group_id,
                position: outcome.to.position,
            },
        );
    }
    broadcast_event(
        &state.ws_tx,
        &BoardEvent::ApplicationUpdated {
            application: app.clone(),
        },
    );
    Ok(Json(app))
}

async fn move_application(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<MoveApplicationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    check_position(req.position)?;
    let (stage_id, position) = (req.stage_id, req.position);
    let (app, outcome) = state
        .db
        .call(move |db| {
            access::application_for(db, &id, &user.id)?;
            db.move_application(&id, &user.id, stage_id.as_deref(), position)
        })
        .await?;
    tracing::info!(
        application_id = %app.id,
        from_stage = %outcome.from.group_id,
        from_position = outcome.from.position,
        to_stage = %outcome.to.group_id,
        to_position = outcome.to.position,
        "application moved"
    );
    broadcast_event(
        &state.ws_tx,
        &BoardEvent::ApplicationMoved {
            application_id: app.id.clone(),
            from_stage_id: outcome.from.group_id,
            to_stage_id: outcome.to.group_id,
            position: outcome.to.position,
        },
    );
    Ok(Json(app))
}

async fn delete_application(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let app_id = id.clone();
    let deleted = state
        .db
        .call(move |db| {
            access::application_for(db, &id, &user.id)?;
            db.delete_application(&id)
        })
        .await?;
    match deleted {
        true => {
            broadcast_event(
                &state.ws_tx,
                &BoardEvent::ApplicationDeleted {
                    application_id: app_id,
                },
            );
            Ok(StatusCode::NO_CONTENT)
        }
        false => Err(ApiError::NotFound(format!("Application {} not found", app_id))),
    }
}

// ── Handlers: activities, tasks, files ────────────────────────────────

async fn list_activities(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let activities = state
        .db
        .call(move |db| {
            access::application_for(db, &id, &user.id)?;
            db.list_activities(&id)
        })
        .await?;
    Ok(Json(activities))
}

async fn create_note(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<CreateNoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = require_text("content", &req.content, 500)?;
    let note = state
        .db
        .call(move |db| {
            access::application_for(db, &id, &user.id)?;
            db.create_note(&id, &user.id, &content)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(note)))
}

async fn list_application_tasks(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tasks = state
        .db
        .call(move |db| {
            access::application_for(db, &id, &user.id)?;
            db.list_tasks_for_application(&id)
        })
        .await?;
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = require_text("title", &req.title, 120)?;
    let due_at = match req.due_at.as_deref() {
        Some(d) => Some(normalize_timestamp("dueAt", d)?),
        None => None,
    };
    let task = state
        .db
        .call(move |db| {
            let app = access::application_for(db, &id, &user.id)?;
            db.create_task(&app.workspace_id, &app.id, &title, due_at.as_deref())
        })
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn list_workspace_tasks(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Query(query): Query<ListTasksQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let due_before = match query.due_before.as_deref() {
        Some(d) => Some(normalize_timestamp("dueBefore", d)?),
        None => None,
    };
    let status = query.status;
    let tasks = state
        .db
        .call(move |db| {
            access::assert_member(db, &id, &user.id)?;
            db.list_tasks_for_workspace(&id, status, due_before.as_deref())
        })
        .await?;
    Ok(Json(tasks))
}

async fn update_task(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let patch = req.validate()?;
    let task = state
        .db
        .call(move |db| {
            access::task_for(db, &id, &user.id)?;
            db.update_task(&id, &patch)
        })
        .await?;
    Ok(Json(task))
}

async fn list_files(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let files = state
        .db
        .call(move |db| {
            access::application_for(db, &id, &user.id)?;
            db.list_files(&id)
        })
        .await?;
    Ok(Json(files))
}

async fn register_file(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<RegisterFileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let input = req.validate()?;
    let file = state
        .db
        .call(move |db| {
            let app = access::application_for(db, &id, &user.id)?;
            db.register_file(&app, &input)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(file)))
}

async fn delete_file(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| {
            access::file_for(db, &id, &user.id)?;
            db.delete_file(&id)
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
