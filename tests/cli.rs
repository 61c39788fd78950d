use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn stageflow(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("stageflow").unwrap();
    cmd.current_dir(home).env("HOME", home).env_remove("STAGEFLOW_CONFIG");
    cmd
}

fn write_config(dir: &Path, profiles: &str) -> std::path::PathBuf {
    let path = dir.join("stageflow.toml");
    let content = format!(
        r#"state_dir = "{}"

[tracker]
kind = "memory"

{}"#,
        dir.join("state").display(),
        profiles
    );
    std::fs::write(&path, content).unwrap();
    path
}

const PASSING: &str = r#"
[[profiles]]
name = "tiny"
description = "Build and check"
required_intents = ["feature"]

[[profiles.steps]]
name = "build"
command = "echo 'artifact: out.txt'; echo 'score: 0.9'"

[[profiles.steps]]
name = "check"
threshold = 0.5
"#;

const FAILING: &str = r#"
[[profiles]]
name = "doomed"
max_iterations = 1

[[profiles.steps]]
name = "build"
command = "exit 1"
"#;

#[test]
fn classify_detects_bug_fix() {
    let dir = TempDir::new().unwrap();
    stageflow(dir.path())
        .args(["classify", "Fix validation bug that reports 0/14 when files exist"])
        .assert()
        .success()
        .stdout(predicate::str::contains("intent: bug_fix"));
}

#[test]
fn classify_json_has_scores() {
    let dir = TempDir::new().unwrap();
    stageflow(dir.path())
        .args(["classify", "--json", "Add a new export command"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"intent\": \"feature\""))
        .stdout(predicate::str::contains("\"scores\""));
}

#[test]
fn profiles_lists_builtins() {
    let dir = TempDir::new().unwrap();
    stageflow(dir.path())
        .arg("profiles")
        .assert()
        .success()
        .stdout(predicate::str::contains("full-feature"))
        .stdout(predicate::str::contains("quick-fix"));
}

#[test]
fn validate_recommends_smaller_profile() {
    let dir = TempDir::new().unwrap();
    stageflow(dir.path())
        .args([
            "validate",
            "--profile",
            "full-feature",
            "Fix validation bug that reports 0/14 when files exist",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Consider 'quick-fix'"));
}

#[test]
fn validate_force_is_quiet() {
    let dir = TempDir::new().unwrap();
    stageflow(dir.path())
        .args([
            "validate",
            "--profile",
            "full-feature",
            "--force",
            "Fix validation bug that reports 0/14 when files exist",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Consider").not());
}

#[test]
fn init_creates_state_dir() {
    let dir = TempDir::new().unwrap();
    stageflow(dir.path()).arg("init").assert().success();

    let state = dir.path().join(".stageflow");
    assert!(state.join("config.toml").exists());
    assert!(state.join("checkpoints").is_dir());
    assert!(state.join("sessions").is_dir());
}

#[test]
fn run_completes_and_checkpoints() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), PASSING);

    stageflow(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["run", "--profile", "tiny", "Add a CSV export command"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tiny completed"))
        .stdout(predicate::str::contains("Consider").not());

    let checkpoints: Vec<_> = std::fs::read_dir(dir.path().join("state/checkpoints"))
        .unwrap()
        .filter(|e| e.as_ref().unwrap().path().extension() == Some("yaml".as_ref()))
        .collect();
    assert_eq!(checkpoints.len(), 1);

    stageflow(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("| tiny | completed |"));

    stageflow(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["list", "--resumable"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn run_aborts_after_loopback_budget() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), FAILING);

    stageflow(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["run", "--profile", "doomed", "--force", "Add something"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("doomed aborted"))
        .stdout(predicate::str::contains("1 loopbacks"));
}

#[test]
fn run_unknown_profile_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), PASSING);

    stageflow(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["run", "--profile", "nope", "Add something"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn resume_of_unknown_workflow_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), PASSING);

    stageflow(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["resume", "wf-missing"])
        .assert()
        .failure();
}

#[test]
fn session_start_with_memory_tracker() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), PASSING);

    stageflow(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["session", "start"])
        .assert()
        .success();

    let sessions: Vec<_> = std::fs::read_dir(dir.path().join("state/sessions"))
        .unwrap()
        .collect();
    assert_eq!(sessions.len(), 1);
}

#[test]
fn hooks_fire_rejects_unknown_event() {
    let dir = TempDir::new().unwrap();
    stageflow(dir.path())
        .args(["hooks", "fire", "NotAnEvent"])
        .assert()
        .failure();
}

#[test]
fn hooks_fire_merges_prompt_output() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    std::fs::create_dir_all(&state).unwrap();
    std::fs::write(
        state.join("hooks.toml"),
        r#"
[[UserPromptSubmit]]
name = "context"
command = "echo remember the changelog"
enabled = true
"#,
    )
    .unwrap();
    let config = write_config(dir.path(), "");

    stageflow(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["hooks", "fire", "UserPromptSubmit", "--prompt", "ship it"])
        .assert()
        .success()
        .stdout(predicate::str::contains("remember the changelog"));
}
