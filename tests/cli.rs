// End-to-end tests for the baasctl binary

use assert_cmd::cargo::cargo_bin_cmd;
use httpmock::prelude::*;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use tempfile::{TempDir, tempdir};

fn baasctl(config_dir: &TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("baasctl");
    cmd.current_dir(config_dir.path())
        .env("BAASCTL_CONFIG_DIR", config_dir.path().join("config"))
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG");
    cmd
}

fn api_args(server: &MockServer) -> Vec<String> {
    vec![
        "--endpoint".to_string(),
        format!("{}/v1", server.base_url()),
        "--project".to_string(),
        "proj-1".to_string(),
    ]
}

#[test]
fn help_lists_commands() {
    let dir = tempdir().unwrap();
    baasctl(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("functions"))
        .stdout(predicate::str::contains("--json"));
}

#[test]
fn json_output_matches_response() {
    let server = MockServer::start();
    let body = json!({
        "total": 1,
        "executions": [{
            "$id": "65ae12345",
            "status": "completed",
            "duration": 0.123,
            "scheduledAt": null,
            "trigger": "database"
        }]
    });
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/functions/fn1/executions")
            .query_param("queries[0]", "limit(1)")
            .header("X-Project-Id", "proj-1");
        then.status(200).json_body(body.clone());
    });

    let dir = tempdir().unwrap();
    let output = baasctl(&dir)
        .args(api_args(&server))
        .args(["--json", "functions", "list-executions", "fn1"])
        .args(["--queries", "limit(1)"])
        .output()
        .unwrap();

    mock.assert();
    assert!(output.status.success());
    let printed: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(printed, body);
}

#[test]
fn table_output_fills_missing_cells() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v1/users");
        then.status(200).body(
            r#"{"total":2,"users":[{"$id":"u1","name":"Ada","size":9223372036854775807},{"$id":"u2"}]}"#,
        );
    });

    let dir = tempdir().unwrap();
    baasctl(&dir)
        .args(api_args(&server))
        .args(["users", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("total : 2"))
        .stdout(predicate::str::contains("u1   Ada   9223372036854775807"))
        .stdout(predicate::str::contains("u2   -     -"));
}

#[test]
fn api_errors_exit_non_zero() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v1/users/nope");
        then.status(404).json_body(json!({
            "message": "User with the requested ID could not be found.",
            "code": 404,
            "type": "user_not_found"
        }));
    });

    let dir = tempdir().unwrap();
    baasctl(&dir)
        .args(api_args(&server))
        .args(["users", "get", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Error: User with the requested ID could not be found. (HTTP 404, user_not_found)",
        ));
}

#[test]
fn missing_project_is_reported() {
    let dir = tempdir().unwrap();
    baasctl(&dir)
        .args(["health", "get"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("project ID is required"));
}

#[test]
fn configure_persists_and_show_masks_key() {
    let dir = tempdir().unwrap();
    baasctl(&dir)
        .args(["configure", "--scope", "local", "--project", "p1", "--key", "secret"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Saved configuration to"));

    let written = fs::read_to_string(dir.path().join(".baasctl.yaml")).unwrap();
    assert!(written.contains("project: p1"));
    assert!(written.contains("key: secret"));

    baasctl(&dir)
        .arg("config-show")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"project\": \"p1\""))
        .stdout(predicate::str::contains("*****"))
        .stdout(predicate::str::contains("secret").not());

    baasctl(&dir)
        .args(["configure", "--scope", "local", "--reset", "--project", "p2"])
        .assert()
        .success();
    let written = fs::read_to_string(dir.path().join(".baasctl.yaml")).unwrap();
    assert_eq!(written.trim(), "project: p2");
}

#[test]
fn call_uploads_file_with_multipart() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path("/v1/storage/buckets/b1/files");
        then.status(201).json_body(json!({"$id": "f1", "chunksTotal": 1}));
    });

    let dir = tempdir().unwrap();
    let upload = dir.path().join("notes.txt");
    fs::write(&upload, "hello").unwrap();

    baasctl(&dir)
        .args(api_args(&server))
        .args(["call", "post", "/storage/buckets/b1/files"])
        .args(["--param", "fileId=f1"])
        .arg("--param")
        .arg(format!("file=@{}", upload.display()))
        .assert()
        .success()
        .stdout(predicate::str::contains("$id : f1"));

    mock.assert();
}
