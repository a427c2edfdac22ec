//! Integration tests for the CLI interface

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn patchpilot(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("patchpilot").unwrap();
    cmd.env("PATCHPILOT_CHECKPOINT_DIR", dir.path().join("checkpoints"));
    cmd
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    patchpilot(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("resume"))
        .stdout(predicate::str::contains("checkpoints"));
}

#[test]
fn test_checkpoints_on_empty_directory() {
    let dir = TempDir::new().unwrap();
    patchpilot(&dir)
        .arg("checkpoints")
        .assert()
        .success()
        .stdout(predicate::str::contains("No checkpoints"));
}

#[test]
fn test_run_rejects_blank_prompt_with_validation_exit_code() {
    let dir = TempDir::new().unwrap();
    patchpilot(&dir)
        .args(["run", "--prompt", "  ", "--repo", "https://github.com/acme/widgets"])
        .assert()
        .code(8)
        .stderr(predicate::str::contains("prompt is required"));
}

#[test]
fn test_missing_config_file_is_reported() {
    let dir = TempDir::new().unwrap();
    patchpilot(&dir)
        .args(["-c"])
        .arg(dir.path().join("absent.toml"))
        .arg("checkpoints")
        .assert()
        .code(2);
}

#[test]
fn test_resume_unknown_run_fails() {
    let dir = TempDir::new().unwrap();
    patchpilot(&dir)
        .args(["resume", "run_missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No checkpoint found"));
}
