use crate::board::models::Application;
use crate::client::{BoardApi, ClientError};
use crate::errors::DragError;

use super::reducer::{DragReducer, DropTarget, MoveIntent};

/// How a drop resolved.
#[derive(Debug)]
pub enum DropOutcome {
    /// The card ended where it started; nothing was sent.
    Unchanged,
    /// The server accepted the move.
    Committed(Application),
    /// The server rejected the move and the board snapped back.
    RolledBack(ClientError),
}

/// One pipeline's board: a drag reducer over its applications wired to a
/// `BoardApi`.
pub struct BoardSession<A: BoardApi> {
    api: A,
    workspace_id: String,
    pipeline_id: String,
    reducer: DragReducer<Application>,
}

impl<A: BoardApi> BoardSession<A> {
    /// Fetch the pipeline's applications and start an idle session.
    pub async fn load(
        api: A,
        workspace_id: impl Into<String>,
        pipeline_id: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let workspace_id = workspace_id.into();
        let pipeline_id = pipeline_id.into();
        let items = api.list_applications(&workspace_id, &pipeline_id).await?;
        Ok(Self {
            api,
            workspace_id,
            pipeline_id,
            reducer: DragReducer::new(items),
        })
    }

    pub fn reducer(&self) -> &DragReducer<Application> {
        &self.reducer
    }

    pub fn drag_start(&mut self, application_id: &str) -> Result<u64, DragError> {
        self.reducer.drag_start(application_id)
    }

    pub fn drag_over(&mut self, target: DropTarget) -> Result<(), DragError> {
        self.reducer.drag_over(target)
    }

    pub fn on_animation_frame(&mut self) -> bool {
        self.reducer.on_animation_frame()
    }

    pub fn drag_cancel(&mut self) -> Result<(), DragError> {
        self.reducer.drag_cancel()
    }

    /// End the gesture and send the resulting move. A rejected move rolls
    /// the board back; an accepted one is followed by a canonical refetch.
    pub async fn drop_card(&mut self) -> Result<DropOutcome, DragError> {
        let Some(intent) = self.reducer.drag_end()? else {
            return Ok(DropOutcome::Unchanged);
        };
        Ok(self.commit(intent).await)
    }

    async fn commit(&mut self, intent: MoveIntent) -> DropOutcome {
        let result = self
            .api
            .move_application(&intent.item_id, &intent.to_group, intent.position)
            .await;
        match result {
            Ok(app) => {
                if self.reducer.move_succeeded(intent.gesture) {
                    self.refresh().await;
                }
                DropOutcome::Committed(app)
            }
            Err(e) => {
                tracing::warn!(
                    application_id = %intent.item_id,
                    error = %e,
                    "move rejected, restoring board"
                );
                self.reducer.move_failed(intent.gesture);
                DropOutcome::RolledBack(e)
            }
        }
    }

    /// Pull canonical state from the server. Skipped while a gesture is in
    /// progress; a failed fetch keeps the current state.
    pub async fn refresh(&mut self) -> bool {
        if self.reducer.is_busy() {
            return false;
        }
        match self
            .api
            .list_applications(&self.workspace_id, &self.pipeline_id)
            .await
        {
            Ok(items) => self.reducer.reconcile(items),
            Err(e) => {
                tracing::warn!(error = %e, "board refresh failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::board::db::{DbHandle, TrackerDb};
    use crate::board::models::*;
    use crate::errors::TrackerError;

    /// In-process `BoardApi` over a real database.
    struct DbApi {
        db: DbHandle,
        user_id: String,
        reject_moves: bool,
        moves: AtomicUsize,
    }

    fn to_client_error(err: anyhow::Error) -> ClientError {
        let status = match TrackerError::find(&err) {
            Some(TrackerError::NotFound { .. }) => 404,
            Some(TrackerError::Validation(_)) => 400,
            _ => 500,
        };
        ClientError::Api {
            status,
            message: err.to_string(),
        }
    }

    #[async_trait]
    impl BoardApi for DbApi {
        async fn move_application(
            &self,
            application_id: &str,
            stage_id: &str,
            position: i64,
        ) -> Result<Application, ClientError> {
            self.moves.fetch_add(1, Ordering::SeqCst);
            if self.reject_moves {
                return Err(ClientError::Api {
                    status: 500,
                    message: "database unavailable".into(),
                });
            }
            let (id, stage, user) = (
                application_id.to_string(),
                stage_id.to_string(),
                self.user_id.clone(),
            );
            self.db
                .call(move |db| db.move_application(&id, &user, Some(stage.as_str()), Some(position)))
                .await
                .map(|(app, _)| app)
                .map_err(to_client_error)
        }

        async fn list_applications(
            &self,
            workspace_id: &str,
            pipeline_id: &str,
        ) -> Result<Vec<Application>, ClientError> {
            let ws = workspace_id.to_string();
            let filter = ApplicationFilter {
                pipeline_id: Some(pipeline_id.to_string()),
                ..Default::default()
            };
            self.db
                .call(move |db| db.list_applications(&ws, &filter))
                .await
                .map_err(to_client_error)
        }

        async fn get_board(&self, pipeline_id: &str) -> Result<BoardView, ClientError> {
            let id = pipeline_id.to_string();
            self.db
                .call(move |db| db.get_board(&id))
                .await
                .map_err(to_client_error)
        }
    }

    struct Seeded {
        api: DbApi,
        workspace_id: String,
        pipeline_id: String,
        applied: String,
        interview: String,
        acme: String,
    }

    fn seeded(reject_moves: bool) -> Seeded {
        let db = TrackerDb::new_in_memory().unwrap();
        let user = db.create_user("seed@trackr.dev", None).unwrap();
        let ws = db.create_workspace(&user.id, "Personal").unwrap();
        let pipeline = db.create_pipeline(&ws.id, "Default", true, true).unwrap();
        let stages = db.list_stages(&pipeline.id).unwrap();
        let (applied, interview) = (stages[1].id.clone(), stages[2].id.clone());
        let mut acme = String::new();
        for company in ["ACME Corp", "Globex"] {
            let app = db
                .create_application(&NewApplication {
                    workspace_id: ws.id.clone(),
                    pipeline_id: pipeline.id.clone(),
                    stage_id: applied.clone(),
                    company: company.to_string(),
                    role: "Intern".to_string(),
                    ..Default::default()
                })
                .unwrap();
            if acme.is_empty() {
                acme = app.id;
            }
        }
        Seeded {
            api: DbApi {
                db: DbHandle::new(db),
                user_id: user.id,
                reject_moves,
                moves: AtomicUsize::new(0),
            },
            workspace_id: ws.id,
            pipeline_id: pipeline.id,
            applied,
            interview,
            acme,
        }
    }

    fn companies(session: &BoardSession<DbApi>, stage: &str) -> Vec<(String, i64)> {
        session
            .reducer()
            .group(stage)
            .into_iter()
            .map(|a| (a.company.clone(), a.position))
            .collect()
    }

    #[tokio::test]
    async fn test_drop_into_empty_stage_commits_and_refetches() {
        let s = seeded(false);
        let mut session = BoardSession::load(s.api, &s.workspace_id, &s.pipeline_id)
            .await
            .unwrap();

        session.drag_start(&s.acme).unwrap();
        session
            .drag_over(DropTarget::Group(s.interview.clone()))
            .unwrap();
        session.on_animation_frame();
        assert_eq!(companies(&session, &s.interview), vec![("ACME Corp".into(), 0)]);
        assert_eq!(companies(&session, &s.applied), vec![("Globex".into(), 0)]);

        match session.drop_card().await.unwrap() {
            DropOutcome::Committed(app) => {
                assert_eq!(app.stage_id, s.interview);
                assert_eq!(app.position, 0);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!session.reducer().is_busy());
        // Canonical state agrees with the optimistic projection.
        assert_eq!(companies(&session, &s.interview), vec![("ACME Corp".into(), 0)]);
        assert_eq!(companies(&session, &s.applied), vec![("Globex".into(), 0)]);
    }

    #[tokio::test]
    async fn test_rejected_drop_rolls_back() {
        let s = seeded(true);
        let mut session = BoardSession::load(s.api, &s.workspace_id, &s.pipeline_id)
            .await
            .unwrap();

        session.drag_start(&s.acme).unwrap();
        session
            .drag_over(DropTarget::Group(s.interview.clone()))
            .unwrap();
        let outcome = session.drop_card().await.unwrap();
        assert!(matches!(outcome, DropOutcome::RolledBack(ClientError::Api { status: 500, .. })));

        assert_eq!(
            companies(&session, &s.applied),
            vec![("ACME Corp".into(), 0), ("Globex".into(), 1)]
        );
        assert!(companies(&session, &s.interview).is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_drop_sends_nothing() {
        let s = seeded(false);
        let mut session = BoardSession::load(s.api, &s.workspace_id, &s.pipeline_id)
            .await
            .unwrap();
        session.drag_start(&s.acme).unwrap();
        session.drag_over(DropTarget::Item(s.acme.clone())).unwrap();
        assert!(matches!(session.drop_card().await.unwrap(), DropOutcome::Unchanged));
        assert_eq!(session.api.moves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_sends_nothing() {
        let s = seeded(false);
        let mut session = BoardSession::load(s.api, &s.workspace_id, &s.pipeline_id)
            .await
            .unwrap();
        session.drag_start(&s.acme).unwrap();
        session
            .drag_over(DropTarget::Group(s.interview.clone()))
            .unwrap();
        session.on_animation_frame();
        session.drag_cancel().unwrap();
        assert_eq!(
            companies(&session, &s.applied),
            vec![("ACME Corp".into(), 0), ("Globex".into(), 1)]
        );
        assert_eq!(session.api.moves.load(Ordering::SeqCst), 0);
        assert!(matches!(session.drop_card().await, Err(DragError::NotDragging)));
    }

    #[tokio::test]
    async fn test_refresh_skipped_mid_drag() {
        let s = seeded(false);
        let mut session = BoardSession::load(s.api, &s.workspace_id, &s.pipeline_id)
            .await
            .unwrap();
        session.drag_start(&s.acme).unwrap();
        assert!(!session.refresh().await);
        session.drag_cancel().unwrap();
        assert!(session.refresh().await);
    }
}
