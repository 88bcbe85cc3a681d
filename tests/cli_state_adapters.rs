//! CLI-level coverage of the `state show` / `state rm` command adapters.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn state_show_on_missing_file_reports_absence() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("builder-state.json");

    Command::cargo_bin("forgestate")
        .unwrap()
        .args(["state", "show", "--state"])
        .arg(&state)
        .assert()
        .success()
        .stdout(predicate::str::contains("no state at"));
}

#[test]
fn state_rm_on_absent_build_fails_with_no_such_build() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("builder-state.json");
    std::fs::write(
        &state,
        r#"{"version":1,"serial":1,"lineage":"l","builder_version":"1.0.0","engine_version":"","template":{"path":"","hash":"","variables":{},"files":{}},"builds":{}}"#,
    )
    .unwrap();

    Command::cargo_bin("forgestate")
        .unwrap()
        .args(["state", "rm", "--state"])
        .arg(&state)
        .args(["--build", "nonexistent"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no such build"));
}

#[test]
fn state_rm_removes_an_existing_build() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("builder-state.json");
    std::fs::write(
        &state,
        r#"{"version":1,"serial":1,"lineage":"l","builder_version":"1.0.0","engine_version":"","template":{"path":"","hash":"","variables":{},"files":{}},"builds":{"web":{"name":"web","type":"qemu","status":"complete","provisioners":[],"post_processors":[],"artifacts":[]}}}"#,
    )
    .unwrap();

    Command::cargo_bin("forgestate")
        .unwrap()
        .args(["state", "rm", "--state"])
        .arg(&state)
        .args(["--build", "web"])
        .assert()
        .success()
        .stdout(predicate::str::contains("removed build web"));

    Command::cargo_bin("forgestate")
        .unwrap()
        .args(["state", "show", "--state"])
        .arg(&state)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"builds\": {}"));
}
