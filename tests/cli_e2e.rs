//! End-to-end CLI tests for the harvester binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn harvester(dest: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.current_dir(dest.path())
        .env_remove("RUST_LOG")
        .env("XDG_CONFIG_HOME", dest.path().join("no-config"))
        .arg("-o")
        .arg(dest.path());
    cmd
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Persist media"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("harvester"));
}

/// Test that invalid flags cause non-zero exit.
#[test]
fn test_binary_invalid_flag_returns_error() {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

/// Empty stdin is an empty run, not an error.
#[test]
fn test_binary_empty_stdin_prints_zero_summary() {
    let dest = TempDir::new().unwrap();
    harvester(&dest)
        .write_stdin("")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "found 0 | downloaded 0 | skipped 0 | errors 0",
        ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_downloads_from_stdin_with_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/cat.jpg"))
        .and(header("Cookie", "sid=abc"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "image/jpeg")
                .set_body_bytes(b"meow".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;
    let dest = TempDir::new().unwrap();

    harvester(&dest)
        .args(["--no-metadata", "--header", "Cookie: sid=abc"])
        .write_stdin(format!("{}/img/cat.jpg\n", server.uri()))
        .assert()
        .success()
        .stdout(predicate::str::contains("downloaded 1"));

    assert_eq!(std::fs::read(dest.path().join("cat.jpg")).unwrap(), b"meow");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_permanent_failure_exits_one() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let dest = TempDir::new().unwrap();

    harvester(&dest)
        .args(["-r", "0", "--no-metadata"])
        .arg(format!("{}/broken.mp4", server.uri()))
        .assert()
        .code(1)
        .stdout(predicate::str::contains("errors 1"));
}

#[test]
fn test_binary_unusable_destination_exits_two() {
    let dest = TempDir::new().unwrap();
    let blocker = dest.path().join("blocker");
    std::fs::write(&blocker, b"x").unwrap();

    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.env("XDG_CONFIG_HOME", dest.path().join("no-config"))
        .arg("-o")
        .arg(blocker.join("out"))
        .arg("https://example.invalid/a.jpg")
        .assert()
        .code(2);
}

#[test]
fn test_binary_invalid_config_file_exits_two() {
    let dest = TempDir::new().unwrap();
    let config = dest.path().join("harvester.toml");
    std::fs::write(&config, "high_watermark = 4\nlow_watermark = 9\n").unwrap();

    harvester(&dest)
        .arg("--config")
        .arg(&config)
        .arg("https://example.invalid/a.jpg")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("low_watermark"));
}

#[test]
fn test_binary_missing_input_file_exits_two() {
    let dest = TempDir::new().unwrap();
    harvester(&dest)
        .arg("--input")
        .arg(dest.path().join("missing.txt"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cannot open input file"));
}
