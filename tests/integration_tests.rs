//! Integration tests for the journey-forge CLI
//!
//! These drive the real binary against scripted producers, so no claude
//! process is ever started.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Helper to create a journey-forge Command isolated from user config
fn journey(home: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("journey-forge");
    cmd.current_dir(home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env_remove("JOURNEY_DATA_DIR")
        .env_remove("JOURNEY_PORT")
        .env_remove("JOURNEY_CLAUDE_CMD")
        .env_remove("RUST_LOG");
    cmd
}

fn demo_script() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/research.yaml")
}

fn saved_sessions(data_dir: &Path) -> Vec<PathBuf> {
    let dir = data_dir.join("sessions");
    let mut files: Vec<PathBuf> = fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    files
}

fn run_demo(dir: &TempDir) -> PathBuf {
    let data_dir = dir.path().join(".journey");
    journey(dir.path())
        .args(["run", "--mode", "research", "--question", "How do tides work?", "--yes"])
        .arg("--script")
        .arg(demo_script())
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("reached complete"));
    data_dir
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        let dir = TempDir::new().unwrap();
        journey(dir.path())
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("sessions"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        journey(dir.path()).arg("--version").assert().success();
    }

    #[test]
    fn test_run_requires_mode_or_resume() {
        let dir = TempDir::new().unwrap();
        journey(dir.path())
            .args(["run", "--question", "Why?"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--mode"));
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let dir = TempDir::new().unwrap();
        journey(dir.path())
            .args(["run", "--mode", "teach", "--question", "Why?"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown mode"));
    }
}

// =============================================================================
// Agents
// =============================================================================

mod agents {
    use super::*;

    #[test]
    fn test_agents_lists_builtin_graphs() {
        let dir = TempDir::new().unwrap();
        journey(dir.path())
            .args(["agents", "--transitions"])
            .assert()
            .success()
            .stdout(predicate::str::contains("research"))
            .stdout(predicate::str::contains("understand"))
            .stdout(predicate::str::contains("build"))
            .stdout(predicate::str::contains("decompose_approval"))
            .stdout(predicate::str::contains("new_category_discovered"))
            .stdout(predicate::str::contains("3 agent(s) registered"));
    }
}

// =============================================================================
// Scripted runs
// =============================================================================

mod scripted_runs {
    use super::*;

    #[test]
    fn test_demo_script_runs_to_completion() {
        let dir = TempDir::new().unwrap();
        let data_dir = run_demo(&dir);

        let files = saved_sessions(&data_dir);
        assert_eq!(files.len(), 1);
        let record: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&files[0]).unwrap()).unwrap();
        assert_eq!(record["currentPhase"], "complete");
        assert_eq!(record["status"]["status"], "completed");

        // decompose -> answer -> decompose -> answer -> rise_above -> expand -> complete
        let history = record["snapshot"]["context"]["transitionHistory"].as_array().unwrap();
        assert_eq!(history.len(), 6);
        assert_eq!(history[1]["isBackward"], true);
        assert_eq!(history[1]["reason"], "new_category_discovered");
    }

    #[test]
    fn test_resume_of_finished_session_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let data_dir = run_demo(&dir);
        let file = saved_sessions(&data_dir).remove(0);

        journey(dir.path())
            .arg("run")
            .arg("--resume")
            .arg(&file)
            .arg("--data-dir")
            .arg(&data_dir)
            .assert()
            .success()
            .stdout(predicate::str::contains("nothing to do"));
    }

    #[test]
    fn test_permanent_producer_failure_exits_2() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("broken.yaml");
        fs::write(
            &script,
            "phases:\n  decompose:\n    - steps:\n        - step: fail\n          message: model unavailable\n          transient: false\n",
        )
        .unwrap();

        journey(dir.path())
            .args(["run", "--mode", "research", "--question", "Why?", "--yes"])
            .arg("--script")
            .arg(&script)
            .assert()
            .code(2)
            .stderr(predicate::str::contains("model unavailable"));

        // The session was saved and is still active.
        let files = saved_sessions(&dir.path().join(".journey"));
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_empty_script_pauses_cleanly() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("empty.yaml");
        fs::write(&script, "phases: {}\n").unwrap();

        journey(dir.path())
            .args(["run", "--mode", "understand", "--question", "What is entropy?", "--yes"])
            .arg("--script")
            .arg(&script)
            .assert()
            .success()
            .stdout(predicate::str::contains("paused in self_assess"));
    }
}

// =============================================================================
// Saved sessions
// =============================================================================

mod sessions {
    use super::*;

    #[test]
    fn test_list_with_no_sessions() {
        let dir = TempDir::new().unwrap();
        journey(dir.path())
            .args(["sessions", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No saved sessions"));
    }

    #[test]
    fn test_list_show_and_export() {
        let dir = TempDir::new().unwrap();
        let data_dir = run_demo(&dir);
        let file = saved_sessions(&data_dir).remove(0);
        let id = file.file_stem().unwrap().to_string_lossy().to_string();

        journey(dir.path())
            .args(["sessions", "list", "--data-dir"])
            .arg(&data_dir)
            .assert()
            .success()
            .stdout(predicate::str::contains(&id))
            .stdout(predicate::str::contains("completed"));

        journey(dir.path())
            .args(["sessions", "show", &id, "--data-dir"])
            .arg(&data_dir)
            .assert()
            .success()
            .stdout(predicate::str::contains("How do tides work?"))
            .stdout(predicate::str::contains("decompose_approval"));

        let out = dir.path().join("export.json");
        journey(dir.path())
            .args(["sessions", "export", &id, "--output"])
            .arg(&out)
            .arg("--data-dir")
            .arg(&data_dir)
            .assert()
            .success();
        let exported: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(exported["id"], id.as_str());
        assert_eq!(exported["mode"], "research");
    }

    #[test]
    fn test_show_unknown_session_fails() {
        let dir = TempDir::new().unwrap();
        journey(dir.path())
            .args(["sessions", "show", "6f1c2a9e-0000-4000-8000-000000000000"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to load session"));
    }
}
