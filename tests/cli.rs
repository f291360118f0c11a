//! CLI tests for the `opshub` binary.

mod common;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use common::FakeBackend;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;

/// An `opshub` command isolated from the caller's config and environment.
fn opshub(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("opshub");
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path().join("xdg"))
        .env_remove("OPSHUB_API_URL")
        .env_remove("OPSHUB_SOCKET_URL")
        .env_remove("OPSHUB_TOKEN")
        .env_remove("SUPABASE_URL")
        .env_remove("SUPABASE_ANON_KEY")
        .env_remove("RUST_LOG");
    cmd
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        let dir = TempDir::new().unwrap();
        opshub(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("watch"))
            .stdout(predicate::str::contains("tasks"))
            .stdout(predicate::str::contains("upload"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        opshub(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_watch_requires_user() {
        let dir = TempDir::new().unwrap();
        opshub(&dir)
            .arg("watch")
            .assert()
            .failure()
            .stderr(predicate::str::contains("--user"));
    }

    #[test]
    fn test_watch_rejects_unknown_room_scope() {
        let dir = TempDir::new().unwrap();
        opshub(&dir)
            .args(["--user", "u1", "watch", "--room", "team:t1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid room scope 'team'"));
    }

    #[test]
    fn test_inbox_requires_org() {
        let dir = TempDir::new().unwrap();
        opshub(&dir)
            .args(["inbox", "--once"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--org"));
    }
}

mod config_commands {
    use super::*;

    #[test]
    fn test_config_init_then_show() {
        let dir = TempDir::new().unwrap();
        opshub(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created opshub.toml"));
        assert!(dir.path().join(".opshub/opshub.toml").exists());

        opshub(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        opshub(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("reconnection_attempts = 5"))
            .stdout(predicate::str::contains("http://localhost:5000/api"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".opshub")).unwrap();
        std::fs::write(
            dir.path().join(".opshub/opshub.toml"),
            "[api]\nurl = \"localhost:5000\"\n\n[socket]\nreconnection_attempts = 0\n",
        )
        .unwrap();

        opshub(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Invalid api.url"))
            .stdout(predicate::str::contains("reconnection_attempts is 0"));
    }

    #[test]
    fn test_env_overrides_show_up_in_config_show() {
        let dir = TempDir::new().unwrap();
        opshub(&dir)
            .env("OPSHUB_API_URL", "https://hub.example.com/api")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("https://hub.example.com/api"))
            .stdout(predicate::str::contains("url = \"https://hub.example.com\""));
    }

    #[test]
    fn test_broken_config_file_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".opshub")).unwrap();
        std::fs::write(dir.path().join(".opshub/opshub.toml"), "[socket\n").unwrap();
        opshub(&dir)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid config file"));
    }
}

mod upload_command {
    use super::*;

    #[test]
    fn test_upload_without_storage_credentials_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        opshub(&dir)
            .args(["upload", "a.txt"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("SUPABASE_URL"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_upload_prints_public_url() {
        let backend = FakeBackend::start().await;
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("my notes.txt"), "hello").unwrap();

        let mut cmd = opshub(&dir);
        cmd.env("SUPABASE_URL", backend.base_url())
            .env("SUPABASE_ANON_KEY", "anon")
            .args(["upload", "my notes.txt", "--bucket", "docs"]);
        tokio::task::spawn_blocking(move || {
            cmd.assert()
                .success()
                .stdout(predicate::str::contains("/storage/v1/object/public/docs/"))
                .stdout(predicate::str::contains("_my-notes.txt"));
        })
        .await
        .unwrap();
        assert_eq!(backend.uploads().len(), 1);
    }
}

mod tasks_command {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tasks_once_prints_snapshot() {
        let backend = FakeBackend::start().await;
        backend.seed_task(json!({
            "_id": "t1",
            "title": "Ship the release",
            "projectId": "p1",
            "priority": "HIGH",
            "status": "In Progress",
        }));
        let dir = TempDir::new().unwrap();

        let mut cmd = opshub(&dir);
        cmd.env("OPSHUB_API_URL", backend.api_url())
            .args(["--token", "tok", "tasks", "p1", "--once"]);
        tokio::task::spawn_blocking(move || {
            cmd.assert()
                .success()
                .stdout(predicate::str::contains("Ship the release"))
                .stdout(predicate::str::contains("1 task"));
        })
        .await
        .unwrap();

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].authorization.as_deref(), Some("Bearer tok"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tasks_against_unreachable_backend_fails() {
        let dir = TempDir::new().unwrap();
        let mut cmd = opshub(&dir);
        cmd.env("OPSHUB_API_URL", "http://127.0.0.1:9/api")
            .args(["tasks", "p1", "--once"]);
        tokio::task::spawn_blocking(move || {
            cmd.assert()
                .failure()
                .stderr(predicate::str::contains("Failed to load tasks for project p1"));
        })
        .await
        .unwrap();
    }
}
