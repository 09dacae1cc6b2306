use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use uuid::Uuid;

use super::models::*;
use super::positions::{self, MoveOutcome, OrderedKind, RankedItem};
use crate::errors::TrackerError;

/// Stage names created with a new pipeline unless the caller opts out.
pub const DEFAULT_STAGE_NAMES: [&str; 5] = ["Interested", "Applied", "Interview", "Offer", "Rejected"];

/// Async-safe handle to the tracker database.
///
/// Wraps `TrackerDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<TrackerDb>>,
}

impl DbHandle {
    pub fn new(db: TrackerDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&TrackerDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub struct TrackerDb {
    conn: Connection,
}

impl TrackerDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    email TEXT NOT NULL UNIQUE,
                    name TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS workspaces (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    owner_id TEXT NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    deleted_at TEXT
                );

                CREATE TABLE IF NOT EXISTS memberships (
                    id TEXT PRIMARY KEY,
                    workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    role TEXT NOT NULL DEFAULT 'MEMBER',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    deleted_at TEXT,
                    UNIQUE(workspace_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS pipelines (
                    id TEXT PRIMARY KEY,
                    workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    is_default INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    deleted_at TEXT
                );

                CREATE TABLE IF NOT EXISTS stages (
                    id TEXT PRIMARY KEY,
                    pipeline_id TEXT NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    color TEXT,
                    position INTEGER NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    deleted_at TEXT
                );

                CREATE TABLE IF NOT EXISTS applications (
                    id TEXT PRIMARY KEY,
                    workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                    pipeline_id TEXT NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
                    stage_id TEXT NOT NULL REFERENCES stages(id),
                    company TEXT NOT NULL,
                    role TEXT NOT NULL,
                    link TEXT,
                    source TEXT,
                    location TEXT,
                    comp_min INTEGER,
                    comp_max INTEGER,
                    priority TEXT NOT NULL DEFAULT 'MEDIUM',
                    status TEXT NOT NULL DEFAULT 'ACTIVE',
                    position INTEGER NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    deleted_at TEXT
                );

                CREATE TABLE IF NOT EXISTS activities (
                    id TEXT PRIMARY KEY,
                    application_id TEXT NOT NULL REFERENCES applications(id) ON DELETE CASCADE,
                    type TEXT NOT NULL,
                    content TEXT,
                    data TEXT,
                    created_by_id TEXT NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                    application_id TEXT NOT NULL REFERENCES applications(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'OPEN',
                    due_at TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    deleted_at TEXT
                );

                CREATE TABLE IF NOT EXISTS files (
                    id TEXT PRIMARY KEY,
                    workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                    application_id TEXT NOT NULL REFERENCES applications(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    storage_key TEXT NOT NULL,
                    mime TEXT NOT NULL,
                    size INTEGER NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    deleted_at TEXT
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_stages_position
                    ON stages(pipeline_id, position)
                    WHERE deleted_at IS NULL AND position >= 0;
                CREATE UNIQUE INDEX IF NOT EXISTS idx_applications_position
                    ON applications(stage_id, position)
                    WHERE deleted_at IS NULL AND position >= 0;
                CREATE INDEX IF NOT EXISTS idx_applications_workspace ON applications(workspace_id);
                CREATE INDEX IF NOT EXISTS idx_pipelines_workspace ON pipelines(workspace_id);
                CREATE INDEX IF NOT EXISTS idx_activities_application ON activities(application_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_workspace ON tasks(workspace_id);
                CREATE INDEX IF NOT EXISTS idx_files_application ON files(application_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub fn create_user(&self, email: &str, name: Option<&str>) -> Result<User> {
        if self.find_user_by_email(email)?.is_some() {
            return Err(TrackerError::Conflict(format!("Email {} is already registered", email)).into());
        }
        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO users (id, email, name) VALUES (?1, ?2, ?3)",
                params![id, email, name],
            )
            .context("Failed to insert user")?;
        self.get_user(&id)?.context("User not found after insert")
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, email, name, created_at FROM users WHERE id = ?1",
                params![id],
                user_from_row,
            )
            .optional()
            .context("Failed to query user")
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, email, name, created_at FROM users WHERE email = ?1",
                params![email],
                user_from_row,
            )
            .optional()
            .context("Failed to query user by email")
    }

    // ── Workspaces & memberships ──────────────────────────────────────

    /// Create a workspace and its OWNER membership atomically.
    pub fn create_workspace(&self, owner_id: &str, name: &str) -> Result<Workspace> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let id = new_id();
        tx.execute(
            "INSERT INTO workspaces (id, name, owner_id) VALUES (?1, ?2, ?3)",
            params![id, name, owner_id],
        )
        .context("Failed to insert workspace")?;
        tx.execute(
            "INSERT INTO memberships (id, workspace_id, user_id, role) VALUES (?1, ?2, ?3, ?4)",
            params![new_id(), id, owner_id, WorkspaceRole::Owner.as_str()],
        )
        .context("Failed to insert owner membership")?;
        tx.commit().context("Failed to commit workspace creation")?;
        self.get_workspace(&id)?
            .context("Workspace not found after insert")
    }

    pub fn list_workspaces_for_user(&self, user_id: &str) -> Result<Vec<Workspace>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT w.id, w.name, w.owner_id, w.created_at, w.updated_at
                 FROM workspaces w
                 JOIN memberships m ON m.workspace_id = w.id
                 WHERE m.user_id = ?1 AND m.deleted_at IS NULL AND w.deleted_at IS NULL
                 ORDER BY w.created_at DESC, w.rowid DESC",
            )
            .context("Failed to prepare list_workspaces_for_user")?;
        let rows = stmt
            .query_map(params![user_id], workspace_from_row)
            .context("Failed to query workspaces")?;
        collect_rows(rows, "workspace")
    }

    pub fn get_workspace(&self, id: &str) -> Result<Option<Workspace>> {
        self.conn
            .query_row(
                "SELECT id, name, owner_id, created_at, updated_at
                 FROM workspaces WHERE id = ?1 AND deleted_at IS NULL",
                params![id],
                workspace_from_row,
            )
            .optional()
            .context("Failed to query workspace")
    }

    pub fn get_membership(&self, workspace_id: &str, user_id: &str) -> Result<Option<Membership>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, workspace_id, user_id, role, created_at FROM memberships
                 WHERE workspace_id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
                params![workspace_id, user_id],
                |row| {
                    Ok(MembershipRow {
                        id: row.get(0)?,
                        workspace_id: row.get(1)?,
                        user_id: row.get(2)?,
                        role: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .context("Failed to query membership")?;
        row.map(MembershipRow::into_membership).transpose()
    }

    pub fn add_member(
        &self,
        workspace_id: &str,
        user_id: &str,
        role: WorkspaceRole,
    ) -> Result<Membership> {
        if self.get_user(user_id)?.is_none() {
            return Err(TrackerError::not_found("User", user_id).into());
        }
        if self.get_membership(workspace_id, user_id)?.is_some() {
            return Err(TrackerError::Conflict(format!(
                "User {} is already a member of this workspace",
                user_id
            ))
            .into());
        }
        self.conn
            .execute(
                "INSERT INTO memberships (id, workspace_id, user_id, role) VALUES (?1, ?2, ?3, ?4)",
                params![new_id(), workspace_id, user_id, role.as_str()],
            )
            .context("Failed to insert membership")?;
        self.get_membership(workspace_id, user_id)?
            .context("Membership not found after insert")
    }

    // ── Pipelines ─────────────────────────────────────────────────────

    pub fn list_pipelines(&self, workspace_id: &str) -> Result<Vec<Pipeline>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, workspace_id, name, is_default, created_at, updated_at
                 FROM pipelines WHERE workspace_id = ?1 AND deleted_at IS NULL
                 ORDER BY is_default DESC, created_at ASC, rowid ASC",
            )
            .context("Failed to prepare list_pipelines")?;
        let rows = stmt
            .query_map(params![workspace_id], pipeline_from_row)
            .context("Failed to query pipelines")?;
        collect_rows(rows, "pipeline")
    }

    pub fn create_pipeline(
        &self,
        workspace_id: &str,
        name: &str,
        is_default: bool,
        create_default_stages: bool,
    ) -> Result<Pipeline> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if is_default {
            tx.execute(
                "UPDATE pipelines SET is_default = 0, updated_at = datetime('now')
                 WHERE workspace_id = ?1 AND deleted_at IS NULL AND is_default = 1",
                params![workspace_id],
            )
            .context("Failed to clear default pipeline")?;
        }
        let id = new_id();
        tx.execute(
            "INSERT INTO pipelines (id, workspace_id, name, is_default) VALUES (?1, ?2, ?3, ?4)",
            params![id, workspace_id, name, is_default],
        )
        .context("Failed to insert pipeline")?;
        if create_default_stages {
            for (idx, stage_name) in DEFAULT_STAGE_NAMES.iter().enumerate() {
                tx.execute(
                    "INSERT INTO stages (id, pipeline_id, name, position) VALUES (?1, ?2, ?3, ?4)",
                    params![new_id(), id, stage_name, idx as i64],
                )
                .context("Failed to insert default stage")?;
            }
        }
        tx.commit().context("Failed to commit pipeline creation")?;
        self.get_pipeline(&id)?
            .context("Pipeline not found after insert")
    }

    pub fn get_pipeline(&self, id: &str) -> Result<Option<Pipeline>> {
        fetch_pipeline(&self.conn, id)
    }

    pub fn update_pipeline(
        &self,
        id: &str,
        name: Option<&str>,
        is_default: Option<bool>,
    ) -> Result<Pipeline> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let existing =
            fetch_pipeline(&tx, id)?.ok_or_else(|| TrackerError::not_found("Pipeline", id))?;
        if is_default == Some(true) {
            tx.execute(
                "UPDATE pipelines SET is_default = 0, updated_at = datetime('now')
                 WHERE workspace_id = ?1 AND deleted_at IS NULL AND is_default = 1",
                params![existing.workspace_id],
            )
            .context("Failed to clear default pipeline")?;
        }
        tx.execute(
            "UPDATE pipelines SET name = COALESCE(?1, name), is_default = COALESCE(?2, is_default),
                 updated_at = datetime('now') WHERE id = ?3",
            params![name, is_default, id],
        )
        .context("Failed to update pipeline")?;
        tx.commit().context("Failed to commit pipeline update")?;
        self.get_pipeline(id)?
            .context("Pipeline not found after update")
    }

    // ── Stages ────────────────────────────────────────────────────────

    pub fn list_stages(&self, pipeline_id: &str) -> Result<Vec<Stage>> {
        fetch_stages(&self.conn, pipeline_id)
    }

    pub fn get_stage(&self, id: &str) -> Result<Option<Stage>> {
        fetch_stage(&self.conn, id)
    }

    /// Append a stage to the end of its pipeline.
    pub fn create_stage(&self, pipeline_id: &str, name: &str, color: Option<&str>) -> Result<Stage> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let position = positions::next_position(&tx, OrderedKind::Stage, pipeline_id)?;
        let id = new_id();
        tx.execute(
            "INSERT INTO stages (id, pipeline_id, name, color, position) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, pipeline_id, name, color, position],
        )
        .context("Failed to insert stage")?;
        tx.commit().context("Failed to commit stage creation")?;
        self.get_stage(&id)?.context("Stage not found after insert")
    }

    /// Rewrite the stage order of a pipeline. `items` carry 1-based ranks.
    pub fn reorder_stages(&self, pipeline_id: &str, items: &[RankedItem]) -> Result<Vec<Stage>> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if fetch_pipeline(&tx, pipeline_id)?.is_none() {
            return Err(TrackerError::not_found("Pipeline", pipeline_id).into());
        }
        positions::reorder_group(&tx, OrderedKind::Stage, pipeline_id, items)?;
        let stages = fetch_stages(&tx, pipeline_id)?;
        tx.commit().context("Failed to commit stage reorder")?;
        Ok(stages)
    }

    /// Move one stage within its pipeline.
    pub fn move_stage(&self, id: &str, position: Option<i64>) -> Result<(Stage, MoveOutcome)> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let outcome = positions::move_item(&tx, OrderedKind::Stage, id, None, position)?;
        tx.commit().context("Failed to commit stage move")?;
        let stage = self.get_stage(id)?.context("Stage not found after move")?;
        Ok((stage, outcome))
    }

    // ── Applications ──────────────────────────────────────────────────

    pub fn list_applications(
        &self,
        workspace_id: &str,
        filter: &ApplicationFilter,
    ) -> Result<Vec<Application>> {
        let mut sql = format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE workspace_id = ?1 AND deleted_at IS NULL"
        );
        let mut args: Vec<String> = vec![workspace_id.to_string()];
        if let Some(pipeline_id) = &filter.pipeline_id {
            args.push(pipeline_id.clone());
            sql.push_str(&format!(" AND pipeline_id = ?{}", args.len()));
        }
        if let Some(stage_id) = &filter.stage_id {
            args.push(stage_id.clone());
            sql.push_str(&format!(" AND stage_id = ?{}", args.len()));
        }
        if let Some(q) = filter.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            args.push(like_pattern(q));
            let n = args.len();
            sql.push_str(&format!(
                " AND (LOWER(company) LIKE ?{n} ESCAPE '\\' OR LOWER(role) LIKE ?{n} ESCAPE '\\')"
            ));
        }
        sql.push_str(" ORDER BY stage_id ASC, position ASC, created_at ASC");

        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_applications")?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), application_row)
            .context("Failed to query applications")?;
        let mut apps = Vec::new();
        for row in rows {
            apps.push(row.context("Failed to read application row")?.into_application()?);
        }
        Ok(apps)
    }

    pub fn get_application(&self, id: &str) -> Result<Option<Application>> {
        fetch_application(&self.conn, id)
    }

    /// Insert an application into its stage. Without a position it is
    /// appended; otherwise later siblings shift down to make room.
    pub fn create_application(&self, input: &NewApplication) -> Result<Application> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let pipeline = fetch_pipeline(&tx, &input.pipeline_id)?
            .filter(|p| p.workspace_id == input.workspace_id)
            .ok_or_else(|| TrackerError::validation("pipelineId is invalid for this workspace"))?;
        fetch_stage(&tx, &input.stage_id)?
            .filter(|s| s.pipeline_id == pipeline.id)
            .ok_or_else(|| TrackerError::validation("stageId is invalid for this pipeline"))?;

        let position =
            positions::insert_slot(&tx, OrderedKind::Application, &input.stage_id, input.position)?;
        let id = new_id();
        tx.execute(
            "INSERT INTO applications (id, workspace_id, pipeline_id, stage_id, company, role, link,
                 source, location, comp_min, comp_max, priority, status, position)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                id,
                input.workspace_id,
                input.pipeline_id,
                input.stage_id,
                input.company,
                input.role,
                input.link,
                input.source,
                input.location,
                input.comp_min,
                input.comp_max,
                input.priority.unwrap_or_default().as_str(),
                input.status.unwrap_or_default().as_str(),
                position,
            ],
        )
        .context("Failed to insert application")?;
        tx.commit().context("Failed to commit application creation")?;
        self.get_application(&id)?
            .context("Application not found after insert")
    }

    /// Apply field edits and, when `stage_id` or `position` is present, a
    /// move, all in one transaction.
    pub fn update_application(
        &self,
        id: &str,
        user_id: &str,
        patch: &ApplicationPatch,
    ) -> Result<(Application, Option<MoveOutcome>)> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let existing =
            fetch_application(&tx, id)?.ok_or_else(|| TrackerError::not_found("Application", id))?;

        if let (Some(min), Some(max)) = (
            patch.comp_min.or(existing.comp_min),
            patch.comp_max.or(existing.comp_max),
        ) {
            if min > max {
                return Err(TrackerError::validation("compMin must not exceed compMax").into());
            }
        }

        tx.execute(
            "UPDATE applications SET
                 company = COALESCE(?1, company),
                 role = COALESCE(?2, role),
                 link = COALESCE(?3, link),
                 source = COALESCE(?4, source),
                 location = COALESCE(?5, location),
                 comp_min = COALESCE(?6, comp_min),
                 comp_max = COALESCE(?7, comp_max),
                 priority = COALESCE(?8, priority),
                 status = COALESCE(?9, status),
                 updated_at = datetime('now')
             WHERE id = ?10",
            params![
                patch.company,
                patch.role,
                patch.link,
                patch.source,
                patch.location,
                patch.comp_min,
                patch.comp_max,
                patch.priority.map(|p| p.as_str()),
                patch.status.map(|s| s.as_str()),
                id,
            ],
        )
        .context("Failed to update application")?;

        let outcome = if patch.is_move() {
            Some(apply_application_move(
                &tx,
                &existing,
                patch.stage_id.as_deref(),
                patch.position,
                user_id,
            )?)
        } else {
            None
        };

        tx.commit().context("Failed to commit application update")?;
        let app = self
            .get_application(id)?
            .context("Application not found after update")?;
        Ok((app, outcome))
    }

    /// Move an application to another stage of its pipeline and/or to a new
    /// position. Records a STAGE_MOVED activity when the stage changes.
    pub fn move_application(
        &self,
        id: &str,
        user_id: &str,
        stage_id: Option<&str>,
        position: Option<i64>,
    ) -> Result<(Application, MoveOutcome)> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let existing =
            fetch_application(&tx, id)?.ok_or_else(|| TrackerError::not_found("Application", id))?;
        let outcome = apply_application_move(&tx, &existing, stage_id, position, user_id)?;
        tx.commit().context("Failed to commit application move")?;
        let app = self
            .get_application(id)?
            .context("Application not found after move")?;
        Ok((app, outcome))
    }

    /// Soft-delete an application and close the gap it leaves in its stage.
    /// Returns false when no active application has this id.
    pub fn delete_application(&self, id: &str) -> Result<bool> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let Some(existing) = fetch_application(&tx, id)? else {
            return Ok(false);
        };
        tx.execute(
            "UPDATE applications SET deleted_at = datetime('now'), updated_at = datetime('now') WHERE id = ?1",
            params![id],
        )
        .context("Failed to soft-delete application")?;
        positions::close_slot(
            &tx,
            OrderedKind::Application,
            &existing.stage_id,
            existing.position,
            id,
        )?;
        tx.commit().context("Failed to commit application delete")?;
        Ok(true)
    }

    // ── Board view ────────────────────────────────────────────────────

    pub fn get_board(&self, pipeline_id: &str) -> Result<BoardView> {
        let pipeline = self
            .get_pipeline(pipeline_id)?
            .ok_or_else(|| TrackerError::not_found("Pipeline", pipeline_id))?;
        let stages = self.list_stages(pipeline_id)?;
        let apps = self.list_applications(
            &pipeline.workspace_id,
            &ApplicationFilter {
                pipeline_id: Some(pipeline_id.to_string()),
                ..Default::default()
            },
        )?;

        let columns = stages
            .into_iter()
            .map(|stage| {
                let mut applications: Vec<Application> = apps
                    .iter()
                    .filter(|a| a.stage_id == stage.id)
                    .cloned()
                    .collect();
                applications.sort_by_key(|a| a.position);
                ColumnView {
                    stage,
                    applications,
                }
            })
            .collect();

        Ok(BoardView { pipeline, columns })
    }

    // ── Activities ────────────────────────────────────────────────────

    pub fn list_activities(&self, application_id: &str) -> Result<Vec<Activity>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, application_id, type, content, data, created_by_id, created_at
                 FROM activities WHERE application_id = ?1 ORDER BY created_at ASC, rowid ASC",
            )
            .context("Failed to prepare list_activities")?;
        let rows = stmt
            .query_map(params![application_id], activity_row)
            .context("Failed to query activities")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("Failed to read activity row")?.into_activity()?);
        }
        Ok(out)
    }

    pub fn create_note(&self, application_id: &str, user_id: &str, content: &str) -> Result<Activity> {
        let id = insert_activity(
            &self.conn,
            application_id,
            ActivityType::Note,
            Some(content),
            None,
            user_id,
        )?;
        fetch_activity(&self.conn, &id)?.context("Activity not found after insert")
    }

    // ── Tasks ─────────────────────────────────────────────────────────

    pub fn create_task(
        &self,
        workspace_id: &str,
        application_id: &str,
        title: &str,
        due_at: Option<&str>,
    ) -> Result<Task> {
        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO tasks (id, workspace_id, application_id, title, due_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, workspace_id, application_id, title, due_at],
            )
            .context("Failed to insert task")?;
        self.get_task(&id)?.context("Task not found after insert")
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1 AND deleted_at IS NULL"),
                params![id],
                task_row,
            )
            .optional()
            .context("Failed to query task")?;
        row.map(TaskRow::into_task).transpose()
    }

    /// Tasks of a workspace, soonest due first (undated last), newest first
    /// among equals. `due_before` is an RFC 3339 UTC timestamp.
    pub fn list_tasks_for_workspace(
        &self,
        workspace_id: &str,
        status: Option<TaskStatus>,
        due_before: Option<&str>,
    ) -> Result<Vec<Task>> {
        let mut sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE workspace_id = ?1 AND deleted_at IS NULL"
        );
        let mut args: Vec<String> = vec![workspace_id.to_string()];
        if let Some(status) = status {
            args.push(status.as_str().to_string());
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        if let Some(due_before) = due_before {
            args.push(due_before.to_string());
            sql.push_str(&format!(" AND due_at IS NOT NULL AND due_at <= ?{}", args.len()));
        }
        sql.push_str(" ORDER BY due_at IS NULL, due_at ASC, created_at DESC, rowid DESC");
        self.query_tasks(&sql, &args)
    }

    pub fn list_tasks_for_application(&self, application_id: &str) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE application_id = ?1 AND deleted_at IS NULL
             ORDER BY due_at IS NULL, due_at ASC, created_at DESC, rowid DESC"
        );
        self.query_tasks(&sql, &[application_id.to_string()])
    }

    fn query_tasks(&self, sql: &str, args: &[String]) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare task query")?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), task_row)
            .context("Failed to query tasks")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("Failed to read task row")?.into_task()?);
        }
        Ok(out)
    }

    pub fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Task> {
        if self.get_task(id)?.is_none() {
            return Err(TrackerError::not_found("Task", id).into());
        }
        self.conn
            .execute(
                "UPDATE tasks SET title = COALESCE(?1, title), status = COALESCE(?2, status),
                     due_at = COALESCE(?3, due_at), updated_at = datetime('now') WHERE id = ?4",
                params![
                    patch.title,
                    patch.status.map(|s| s.as_str()),
                    patch.due_at,
                    id
                ],
            )
            .context("Failed to update task")?;
        self.get_task(id)?.context("Task not found after update")
    }

    // ── Files ─────────────────────────────────────────────────────────

    /// Record metadata for an object already uploaded to storage. The key
    /// must live under the application's prefix.
    pub fn register_file(&self, application: &Application, input: &NewFile) -> Result<FileRecord> {
        let prefix = storage_prefix(&application.workspace_id, &application.id);
        if !input.storage_key.starts_with(&prefix) {
            return Err(
                TrackerError::validation("storageKey is not valid for this application").into(),
            );
        }
        let id = new_id();
        self.conn
            .execute(
                "INSERT INTO files (id, workspace_id, application_id, name, storage_key, mime, size)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    application.workspace_id,
                    application.id,
                    input.name,
                    input.storage_key,
                    input.mime,
                    input.size
                ],
            )
            .context("Failed to insert file")?;
        self.get_file(&id)?.context("File not found after insert")
    }

    pub fn get_file(&self, id: &str) -> Result<Option<FileRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1 AND deleted_at IS NULL"),
                params![id],
                file_from_row,
            )
            .optional()
            .context("Failed to query file")
    }

    pub fn list_files(&self, application_id: &str) -> Result<Vec<FileRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {FILE_COLUMNS} FROM files WHERE application_id = ?1 AND deleted_at IS NULL
                 ORDER BY created_at DESC, rowid DESC"
            ))
            .context("Failed to prepare list_files")?;
        let rows = stmt
            .query_map(params![application_id], file_from_row)
            .context("Failed to query files")?;
        collect_rows(rows, "file")
    }

    pub fn delete_file(&self, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "UPDATE files SET deleted_at = datetime('now') WHERE id = ?1 AND deleted_at IS NULL",
                params![id],
            )
            .context("Failed to soft-delete file")?;
        Ok(count > 0)
    }
}

/// Object-storage key prefix owned by one application.
pub fn storage_prefix(workspace_id: &str, application_id: &str) -> String {
    format!("workspaces/{}/applications/{}/", workspace_id, application_id)
}

fn like_pattern(q: &str) -> String {
    let escaped = q
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn apply_application_move(
    conn: &Connection,
    existing: &Application,
    stage_id: Option<&str>,
    position: Option<i64>,
    user_id: &str,
) -> Result<MoveOutcome> {
    if let Some(target) = stage_id {
        let stage = fetch_stage(conn, target)?
            .ok_or_else(|| TrackerError::validation("stageId is invalid"))?;
        if stage.pipeline_id != existing.pipeline_id {
            return Err(TrackerError::validation(
                "Cannot move application to a stage in a different pipeline",
            )
            .into());
        }
    }

    let outcome =
        positions::move_item(conn, OrderedKind::Application, &existing.id, stage_id, position)?;

    if outcome.changed_group() {
        let data = serde_json::json!({
            "fromStageId": outcome.from.group_id,
            "toStageId": outcome.to.group_id,
        });
        insert_activity(
            conn,
            &existing.id,
            ActivityType::StageMoved,
            None,
            Some(&data),
            user_id,
        )?;
    }
    Ok(outcome)
}

fn insert_activity(
    conn: &Connection,
    application_id: &str,
    activity_type: ActivityType,
    content: Option<&str>,
    data: Option<&serde_json::Value>,
    user_id: &str,
) -> Result<String> {
    let id = new_id();
    let data = data.map(|d| d.to_string());
    conn.execute(
        "INSERT INTO activities (id, application_id, type, content, data, created_by_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, application_id, activity_type.as_str(), content, data, user_id],
    )
    .context("Failed to insert activity")?;
    Ok(id)
}

// ── Internal row helpers ──────────────────────────────────────────────

const APPLICATION_COLUMNS: &str = "id, workspace_id, pipeline_id, stage_id, company, role, link, source, location, comp_min, comp_max, priority, status, position, created_at, updated_at";
const TASK_COLUMNS: &str =
    "id, workspace_id, application_id, title, status, due_at, created_at, updated_at";
const FILE_COLUMNS: &str =
    "id, workspace_id, application_id, name, storage_key, mime, size, created_at";

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    what: &str,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.with_context(|| format!("Failed to read {} row", what))?);
    }
    Ok(out)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn workspace_from_row(row: &Row<'_>) -> rusqlite::Result<Workspace> {
    Ok(Workspace {
        id: row.get(0)?,
        name: row.get(1)?,
        owner_id: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn pipeline_from_row(row: &Row<'_>) -> rusqlite::Result<Pipeline> {
    Ok(Pipeline {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        name: row.get(2)?,
        is_default: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn stage_from_row(row: &Row<'_>) -> rusqlite::Result<Stage> {
    Ok(Stage {
        id: row.get(0)?,
        pipeline_id: row.get(1)?,
        name: row.get(2)?,
        position: row.get(3)?,
        color: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        application_id: row.get(2)?,
        name: row.get(3)?,
        storage_key: row.get(4)?,
        mime: row.get(5)?,
        size: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn fetch_pipeline(conn: &Connection, id: &str) -> Result<Option<Pipeline>> {
    conn.query_row(
        "SELECT id, workspace_id, name, is_default, created_at, updated_at
         FROM pipelines WHERE id = ?1 AND deleted_at IS NULL",
        params![id],
        pipeline_from_row,
    )
    .optional()
    .context("Failed to query pipeline")
}

fn fetch_stage(conn: &Connection, id: &str) -> Result<Option<Stage>> {
    conn.query_row(
        "SELECT id, pipeline_id, name, position, color, created_at, updated_at
         FROM stages WHERE id = ?1 AND deleted_at IS NULL",
        params![id],
        stage_from_row,
    )
    .optional()
    .context("Failed to query stage")
}

fn fetch_stages(conn: &Connection, pipeline_id: &str) -> Result<Vec<Stage>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, pipeline_id, name, position, color, created_at, updated_at
             FROM stages WHERE pipeline_id = ?1 AND deleted_at IS NULL ORDER BY position ASC",
        )
        .context("Failed to prepare list_stages")?;
    let rows = stmt
        .query_map(params![pipeline_id], stage_from_row)
        .context("Failed to query stages")?;
    collect_rows(rows, "stage")
}

fn fetch_application(conn: &Connection, id: &str) -> Result<Option<Application>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = ?1 AND deleted_at IS NULL"
            ),
            params![id],
            application_row,
        )
        .optional()
        .context("Failed to query application")?;
    row.map(ApplicationRow::into_application).transpose()
}

fn fetch_activity(conn: &Connection, id: &str) -> Result<Option<Activity>> {
    let row = conn
        .query_row(
            "SELECT id, application_id, type, content, data, created_by_id, created_at
             FROM activities WHERE id = ?1",
            params![id],
            activity_row,
        )
        .optional()
        .context("Failed to query activity")?;
    row.map(ActivityRow::into_activity).transpose()
}

struct MembershipRow {
    id: String,
    workspace_id: String,
    user_id: String,
    role: String,
    created_at: String,
}

impl MembershipRow {
    fn into_membership(self) -> Result<Membership> {
        let role = WorkspaceRole::from_str(&self.role)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse membership role")?;
        Ok(Membership {
            id: self.id,
            workspace_id: self.workspace_id,
            user_id: self.user_id,
            role,
            created_at: self.created_at,
        })
    }
}

/// Intermediate row struct for reading applications from SQLite before
/// converting priority / status strings into typed values.
struct ApplicationRow {
    id: String,
    workspace_id: String,
    pipeline_id: String,
    stage_id: String,
    company: String,
    role: String,
    link: Option<String>,
    source: Option<String>,
    location: Option<String>,
    comp_min: Option<i64>,
    comp_max: Option<i64>,
    priority: String,
    status: String,
    position: i64,
    created_at: String,
    updated_at: String,
}

fn application_row(row: &Row<'_>) -> rusqlite::Result<ApplicationRow> {
    Ok(ApplicationRow {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        pipeline_id: row.get(2)?,
        stage_id: row.get(3)?,
        company: row.get(4)?,
        role: row.get(5)?,
        link: row.get(6)?,
        source: row.get(7)?,
        location: row.get(8)?,
        comp_min: row.get(9)?,
        comp_max: row.get(10)?,
        priority: row.get(11)?,
        status: row.get(12)?,
        position: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

impl ApplicationRow {
    fn into_application(self) -> Result<Application> {
        let priority = ApplicationPriority::from_str(&self.priority)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse application priority")?;
        let status = ApplicationStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse application status")?;
        Ok(Application {
            id: self.id,
            workspace_id: self.workspace_id,
            pipeline_id: self.pipeline_id,
            stage_id: self.stage_id,
            company: self.company,
            role: self.role,
            link: self.link,
            source: self.source,
            location: self.location,
            comp_min: self.comp_min,
            comp_max: self.comp_max,
            priority,
            status,
            position: self.position,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct ActivityRow {
    id: String,
    application_id: String,
    activity_type: String,
    content: Option<String>,
    data: Option<String>,
    created_by_id: String,
    created_at: String,
}

fn activity_row(row: &Row<'_>) -> rusqlite::Result<ActivityRow> {
    Ok(ActivityRow {
        id: row.get(0)?,
        application_id: row.get(1)?,
        activity_type: row.get(2)?,
        content: row.get(3)?,
        data: row.get(4)?,
        created_by_id: row.get(5)?,
        created_at: row.get(6)?,
    })
}

impl ActivityRow {
    fn into_activity(self) -> Result<Activity> {
        let activity_type = ActivityType::from_str(&self.activity_type)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse activity type")?;
        let data = self
            .data
            .map(|d| serde_json::from_str(&d))
            .transpose()
            .context("Failed to parse activity data JSON")?;
        Ok(Activity {
            id: self.id,
            application_id: self.application_id,
            activity_type,
            content: self.content,
            data,
            created_by_id: self.created_by_id,
            created_at: self.created_at,
        })
    }
}

struct TaskRow {
    id: String,
    workspace_id: String,
    application_id: String,
    title: String,
    status: String,
    due_at: Option<String>,
    created_at: String,
    updated_at: String,
}

fn task_row(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        application_id: row.get(2)?,
        title: row.get(3)?,
        status: row.get(4)?,
        due_at: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

impl TaskRow {
    fn into_task(self) -> Result<Task> {
        let status = TaskStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse task status")?;
        Ok(Task {
            id: self.id,
            workspace_id: self.workspace_id,
            application_id: self.application_id,
            title: self.title,
            status,
            due_at: self.due_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
