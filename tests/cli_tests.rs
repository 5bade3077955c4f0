//! CLI integration tests
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Runs from an empty directory so no `.env` file is picked up.
fn cmd(workdir: &TempDir) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("article_tweet");
    cmd.current_dir(workdir.path())
        .env_remove("HF_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

fn workdir() -> TempDir {
    tempfile::tempdir().unwrap()
}

#[test]
fn test_cli_no_args_prints_help() {
    cmd(&workdir()).assert().failure().stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_invalid_url() {
    cmd(&workdir())
        .args(["get", "--url", "not-a-url"])
        .assert()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Invalid URL"));
}

#[test]
fn test_cli_create_without_token() {
    cmd(&workdir())
        .args(["create", "--url", "https://example.com/post"])
        .assert()
        .code(7)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("HF_TOKEN"));
}

#[test]
fn test_cli_bad_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.yaml");
    std::fs::write(&config, "not_a_key: 1\n").unwrap();

    cmd(&dir)
        .args(["--config", config.to_str().unwrap(), "get", "--url", "https://example.com"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_cli_compat_flags_warn_before_failing() {
    // the token check fails, but only after the ignored flags were reported
    cmd(&workdir())
        .args(["create", "--url", "https://example.com", "--quantization", "q8", "--local"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("ignoring it for the remote backend"))
        .stderr(predicate::str::contains("ignoring --local"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_get_warns_when_clean_budget_runs_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<html><body><p>a        b</p></body></html>",
            "text/html",
        ))
        .mount(&server)
        .await;

    let url = format!("{}/post", server.uri());
    let assert = tokio::task::spawn_blocking(move || {
        let dir = workdir();
        cmd(&dir).args(["get", "--url", &url, "--limit-clean", "1"]).assert()
    })
    .await
    .unwrap();

    assert
        .success()
        .stdout("a    b\n")
        .stderr(predicate::str::contains("could not be cleaned within the pass limit"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_get_prints_only_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/post"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<html><body><p>Hello   crab</p><script>nope()</script></body></html>",
            "text/html",
        ))
        .mount(&server)
        .await;

    let url = format!("{}/post", server.uri());
    let assert = tokio::task::spawn_blocking(move || {
        let dir = workdir();
        cmd(&dir).args(["--log-level", "debug", "get", "--url", &url]).assert()
    })
    .await
    .unwrap();

    assert.success().stdout("Hello crab\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_get_404_exits_with_fetch_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = format!("{}/missing", server.uri());
    let assert = tokio::task::spawn_blocking(move || {
        let dir = workdir();
        cmd(&dir).args(["get", "--url", &url]).assert()
    })
    .await
    .unwrap();

    assert
        .code(3)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("HTTP 404"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_create_ignores_local_flag_and_prints_summary() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/post"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<html><body><h1>Crab news</h1><p>Ferris won the race.</p></body></html>",
            "text/html",
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/models/org/model"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
            "generated_text": "\"the race result\", \"text_summary\": \"Ferris wins the race!\"}```"
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.yaml");
    std::fs::write(
        &config,
        format!("inference_endpoint: {}/models\nmax_retries: 0\n", server.uri()),
    )
    .unwrap();

    let url = format!("{}/post", server.uri());
    let config_arg = config.to_str().unwrap().to_string();
    let assert = tokio::task::spawn_blocking(move || {
        cmd(&dir)
            .args([
                "--config",
                &config_arg,
                "--hf-token",
                "test-token",
                "create",
                "--url",
                &url,
                "--model-id",
                "org/model",
                "--local",
            ])
            .assert()
    })
    .await
    .unwrap();

    assert
        .success()
        .stdout("Ferris wins the race!\n")
        .stderr(predicate::str::contains("ignoring --local"));
}
