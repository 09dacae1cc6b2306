//! Integration tests for trackr
//!
//! CLI behaviour through the built binary, and a full client → server round
//! trip over a real socket.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const ENV_KEYS: &[&str] = &[
    "TRACKR_HOST",
    "TRACKR_PORT",
    "TRACKR_DB_PATH",
    "TRACKR_LOG",
    "TRACKR_LOG_JSON",
    "RUST_LOG",
];

/// Helper to create a trackr Command isolated from the caller's environment
fn trackr(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("trackr");
    cmd.current_dir(dir.path());
    for key in ENV_KEYS {
        cmd.env_remove(key);
    }
    cmd
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_trackr_help() {
        let dir = TempDir::new().unwrap();
        trackr(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("seed"));
    }

    #[test]
    fn test_trackr_version() {
        let dir = TempDir::new().unwrap();
        trackr(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_serve_init_creates_database() {
        let dir = TempDir::new().unwrap();
        trackr(&dir)
            .args(["serve", "--init", "--db-path", "data/board.db"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Database initialized"));

        assert!(dir.path().join("data/board.db").exists());
    }
}

// =============================================================================
// Config Tests
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        trackr(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("using defaults"))
            .stdout(predicate::str::contains("port = 3141"));
    }

    #[test]
    fn test_config_show_file_and_env() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("trackr.toml"),
            "[server]\nport = 8080\n\n[database]\npath = \"board.db\"\n",
        )
        .unwrap();

        trackr(&dir)
            .env("TRACKR_PORT", "9090")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Config file: trackr.toml"))
            .stdout(predicate::str::contains("port = 9090"))
            .stdout(predicate::str::contains("path = \"board.db\""));
    }

    #[test]
    fn test_config_explicit_path() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("alt.toml"), "[server]\nport = 7000\n").unwrap();

        trackr(&dir)
            .args(["--config", "alt.toml", "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 7000"));
    }

    #[test]
    fn test_config_validate_no_config() {
        let dir = TempDir::new().unwrap();
        trackr(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("trackr.toml"),
            "[logging]\nlevel = \"chatty\"\n",
        )
        .unwrap();

        trackr(&dir)
            .args(["config", "validate"])
            .assert()
            .failure()
            .stdout(predicate::str::contains("chatty"));
    }

    #[test]
    fn test_config_malformed_file_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("trackr.toml"), "[server\n").unwrap();

        trackr(&dir)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to parse trackr.toml"));
    }
}

// =============================================================================
// Seed Tests
// =============================================================================

mod seed {
    use super::*;
    use trackr::board::db::TrackerDb;

    #[test]
    fn test_seed_creates_default_board() {
        let dir = TempDir::new().unwrap();
        trackr(&dir)
            .args(["seed", "--db-path", "seed.db"])
            .assert()
            .success()
            .stdout(predicate::str::contains("seed@trackr.dev"))
            .stdout(predicate::str::contains(
                "Interested, Applied, Interview, Offer, Rejected",
            ));

        let db = TrackerDb::new(&dir.path().join("seed.db")).unwrap();
        let user = db.find_user_by_email("seed@trackr.dev").unwrap().unwrap();
        let workspaces = db.list_workspaces_for_user(&user.id).unwrap();
        assert_eq!(workspaces.len(), 1);
        assert_eq!(workspaces[0].name, "Personal");
        let pipelines = db.list_pipelines(&workspaces[0].id).unwrap();
        assert_eq!(pipelines.len(), 1);
        assert!(pipelines[0].is_default);
    }

    #[test]
    fn test_seed_is_idempotent() {
        let dir = TempDir::new().unwrap();
        trackr(&dir).args(["seed", "--db-path", "seed.db"]).assert().success();
        trackr(&dir)
            .args(["seed", "--db-path", "seed.db"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Already seeded"));

        let db = TrackerDb::new(&dir.path().join("seed.db")).unwrap();
        let user = db.find_user_by_email("seed@trackr.dev").unwrap().unwrap();
        assert_eq!(db.list_workspaces_for_user(&user.id).unwrap().len(), 1);
    }

    #[test]
    fn test_seed_uses_env_db_path() {
        let dir = TempDir::new().unwrap();
        trackr(&dir)
            .env("TRACKR_DB_PATH", "from-env.db")
            .arg("seed")
            .assert()
            .success();
        assert!(dir.path().join("from-env.db").exists());
    }
}

// =============================================================================
// End-to-end: client → server over a socket
// =============================================================================

mod end_to_end {
    use tokio::sync::oneshot;

    use trackr::board::db::TrackerDb;
    use trackr::board::models::ActivityType;
    use trackr::board::server::{self, ServerConfig};
    use trackr::client::{BoardApi, ClientError, TrackrClient};
    use trackr::drag::{BoardSession, DropOutcome, DropTarget};

    struct Running {
        base_url: String,
        stop: oneshot::Sender<()>,
        handle: tokio::task::JoinHandle<anyhow::Result<()>>,
    }

    async fn start() -> Running {
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        let listener = server::bind(&config).await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let db = TrackerDb::new_in_memory().unwrap();
        let (stop, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            server::serve(listener, &config, db, async move {
                let _ = rx.await;
            })
            .await
        });
        Running {
            base_url,
            stop,
            handle,
        }
    }

    #[tokio::test]
    async fn test_drag_card_across_stages() {
        let running = start().await;
        let anon = TrackrClient::new(&running.base_url, "");
        assert_eq!(anon.health().await.unwrap()["status"], "ok");

        let user = anon.register_user("e2e@trackr.dev", Some("E2E")).await.unwrap();
        let client = anon.as_user(&user.id);
        let workspace = client.create_workspace("Job hunt").await.unwrap();
        let pipeline = client
            .create_pipeline(&workspace.id, "Summer", true)
            .await
            .unwrap();
        let stages = client.list_stages(&pipeline.id).await.unwrap();
        assert_eq!(stages.len(), 5);
        let (applied, interview) = (stages[1].id.clone(), stages[2].id.clone());

        let mut ids = Vec::new();
        for company in ["ACME Corp", "Globex", "Initech"] {
            let app = client
                .create_application(&workspace.id, &pipeline.id, &applied, company, "Intern")
                .await
                .unwrap();
            ids.push(app.id);
        }

        let mut session = BoardSession::load(client.clone(), &workspace.id, &pipeline.id)
            .await
            .unwrap();
        session.drag_start(&ids[1]).unwrap();
        session.drag_over(DropTarget::Group(interview.clone())).unwrap();
        session.on_animation_frame();

        match session.drop_card().await.unwrap() {
            DropOutcome::Committed(app) => {
                assert_eq!(app.stage_id, interview);
                assert_eq!(app.position, 0);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let board = client.get_board(&pipeline.id).await.unwrap();
        let column = |stage: &str| -> Vec<(String, i64)> {
            board
                .columns
                .iter()
                .find(|c| c.stage.id == stage)
                .unwrap()
                .applications
                .iter()
                .map(|a| (a.company.clone(), a.position))
                .collect()
        };
        assert_eq!(
            column(&applied),
            vec![("ACME Corp".to_string(), 0), ("Initech".to_string(), 1)]
        );
        assert_eq!(column(&interview), vec![("Globex".to_string(), 0)]);

        let activities = client.list_activities(&ids[1]).await.unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].activity_type, ActivityType::StageMoved);

        running.stop.send(()).unwrap();
        running.handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_outsider_cannot_move_cards() {
        let running = start().await;
        let anon = TrackrClient::new(&running.base_url, "");
        let owner = anon.register_user("owner@trackr.dev", None).await.unwrap();
        let outsider = anon.register_user("outsider@trackr.dev", None).await.unwrap();

        let client = anon.as_user(&owner.id);
        let workspace = client.create_workspace("Private").await.unwrap();
        let pipeline = client
            .create_pipeline(&workspace.id, "Default", true)
            .await
            .unwrap();
        let stages = client.list_stages(&pipeline.id).await.unwrap();
        let app = client
            .create_application(&workspace.id, &pipeline.id, &stages[0].id, "ACME Corp", "SWE")
            .await
            .unwrap();

        let err = anon
            .as_user(&outsider.id)
            .move_application(&app.id, &stages[1].id, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 403, .. }));

        let err = anon.list_stages(&pipeline.id).await.unwrap_err();
        assert_eq!(err.status(), Some(401));

        running.stop.send(()).unwrap();
        running.handle.await.unwrap().unwrap();
    }
}
