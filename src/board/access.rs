//! Workspace membership checks.
//!
//! Every workspace-scoped operation resolves the owning workspace first and
//! then requires the caller to be a member of it. A missing workspace is a
//! 404; a workspace the caller does not belong to is a 403.

use anyhow::Result;

use super::db::TrackerDb;
use super::models::*;
use crate::errors::TrackerError;

/// Resolve the calling user. A missing or unknown id is a 401.
pub fn caller(db: &TrackerDb, user_id: Option<&str>) -> Result<User> {
    let Some(user_id) = user_id.map(str::trim).filter(|v| !v.is_empty()) else {
        return Err(TrackerError::Unauthorized("Missing caller identity".into()).into());
    };
    db.get_user(user_id)?
        .ok_or_else(|| TrackerError::Unauthorized(format!("Unknown user {}", user_id)).into())
}

pub fn assert_member(db: &TrackerDb, workspace_id: &str, user_id: &str) -> Result<Membership> {
    if db.get_workspace(workspace_id)?.is_none() {
        return Err(TrackerError::not_found("Workspace", workspace_id).into());
    }
    db.get_membership(workspace_id, user_id)?.ok_or_else(|| {
        TrackerError::Forbidden("You are not a member of this workspace".into()).into()
    })
}

pub fn assert_role(
    db: &TrackerDb,
    workspace_id: &str,
    user_id: &str,
    allowed: &[WorkspaceRole],
) -> Result<Membership> {
    let membership = assert_member(db, workspace_id, user_id)?;
    if !allowed.contains(&membership.role) {
        return Err(TrackerError::Forbidden("Insufficient workspace role".into()).into());
    }
    Ok(membership)
}

/// Load a pipeline the caller may see.
pub fn pipeline_for(db: &TrackerDb, pipeline_id: &str, user_id: &str) -> Result<Pipeline> {
    let pipeline = db
        .get_pipeline(pipeline_id)?
        .ok_or_else(|| TrackerError::not_found("Pipeline", pipeline_id))?;
    assert_member(db, &pipeline.workspace_id, user_id)?;
    Ok(pipeline)
}

pub fn stage_for(db: &TrackerDb, stage_id: &str, user_id: &str) -> Result<Stage> {
    let stage = db
        .get_stage(stage_id)?
        .ok_or_else(|| TrackerError::not_found("Stage", stage_id))?;
    pipeline_for(db, &stage.pipeline_id, user_id)?;
    Ok(stage)
}

pub fn application_for(db: &TrackerDb, application_id: &str, user_id: &str) -> Result<Application> {
    let app = db
        .get_application(application_id)?
        .ok_or_else(|| TrackerError::not_found("Application", application_id))?;
    assert_member(db, &app.workspace_id, user_id)?;
    Ok(app)
}

pub fn task_for(db: &TrackerDb, task_id: &str, user_id: &str) -> Result<Task> {
    let task = db
        .get_task(task_id)?
        .ok_or_else(|| TrackerError::not_found("Task", task_id))?;
    assert_member(db, &task.workspace_id, user_id)?;
    Ok(task)
}

pub fn file_for(db: &TrackerDb, file_id: &str, user_id: &str) -> Result<FileRecord> {
    let file = db
        .get_file(file_id)?
        .ok_or_else(|| TrackerError::not_found("File", file_id))?;
    assert_member(db, &file.workspace_id, user_id)?;
    Ok(file)
}
