//! Smoke tests for the outrider CLI binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn cli_bin() -> Command {
    Command::cargo_bin("outrider").expect("binary should build")
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn prints_help() {
    let mut cmd = cli_bin();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("run-all"));
}

#[test]
fn prints_version() {
    let mut cmd = cli_bin();
    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("outrider"));
}

#[test]
fn rejects_unknown_command() {
    let mut cmd = cli_bin();
    cmd.arg("not-a-real-command");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn shows_config_without_passphrase() {
    let config = config_file("[ssh]\npassphrase = \"hunter2\"\n\n[engine]\nstaging_dir = \"/var/tmp\"\n");
    let mut cmd = cli_bin();
    cmd.arg("config").arg("--config").arg(config.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("staging_dir = \"/var/tmp\""))
        .stdout(predicate::str::contains("hunter2").not());
}

#[test]
fn run_with_missing_task_file_fails() {
    let logs = tempfile::tempdir().unwrap();
    let config = config_file(&format!(
        "[tasks]\nfile = \"/nonexistent/outrider/tasks.toml\"\n\n[logs]\ndirectory = \"{}\"\n",
        logs.path().display()
    ));
    let mut cmd = cli_bin();
    cmd.arg("run").arg("site").arg("--config").arg(config.path());
    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("cannot read task file"));
}
