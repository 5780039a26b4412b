use anyhow::Result;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CREDENTIAL_VARS: &[&str] = &["OPENAI_API_KEY", "ANTHROPIC_API_KEY", "GOOGLE_AI_API_KEY"];

/// Builds a forgor invocation isolated in `home`.
fn forgor(home: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_forgor"));
    cmd.args(args)
        .env("FORGOR_CONFIG_HOME", home.join("config"))
        .env("HOME", home)
        .env("SHELL", "/bin/bash")
        .env_remove("RUST_LOG")
        .env_remove("FORGOR_VERBOSE")
        .env_remove("HISTFILE")
        .stdin(Stdio::null());
    for var in CREDENTIAL_VARS {
        cmd.env_remove(var);
    }
    cmd
}

/// Helper to run forgor commands and capture output
fn run_forgor(home: &Path, args: &[&str]) -> Result<Output> {
    Ok(forgor(home, args).output()?)
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_version_banner() -> Result<()> {
    let home = TempDir::new()?;
    let output = run_forgor(home.path(), &["version"])?;

    assert!(output.status.success());
    assert!(stdout(&output).starts_with(&format!("forgor {}", env!("CARGO_PKG_VERSION"))));
    Ok(())
}

#[test]
fn test_config_init_show_and_set_default() -> Result<()> {
    let home = TempDir::new()?;

    let init = run_forgor(home.path(), &["config", "init"])?;
    assert!(init.status.success(), "init failed: {}", stderr(&init));
    assert!(home.path().join("config").join("config.yaml").exists());

    let again = run_forgor(home.path(), &["config", "init"])?;
    assert!(!again.status.success());
    assert!(stderr(&again).contains("--force"));

    let forced = run_forgor(home.path(), &["config", "init", "--force"])?;
    assert!(forced.status.success());

    let show = run_forgor(home.path(), &["config", "show"])?;
    let text = stdout(&show);
    assert!(text.contains("default_profile: openai"));
    assert!(text.contains("${ANTHROPIC_API_KEY}"));

    let set = run_forgor(home.path(), &["config", "set-default", "anthropic"])?;
    assert!(set.status.success(), "set-default failed: {}", stderr(&set));
    let show = run_forgor(home.path(), &["config", "show"])?;
    assert!(stdout(&show).contains("default_profile: anthropic"));

    let missing = run_forgor(home.path(), &["config", "set-default", "nope"])?;
    assert!(!missing.status.success());
    assert!(stderr(&missing).starts_with("Error:"));
    Ok(())
}

#[test]
fn test_list_providers_reports_missing_credentials() -> Result<()> {
    let home = TempDir::new()?;
    run_forgor(home.path(), &["config", "init"])?;

    let mut cmd = forgor(home.path(), &["config", "list-providers"]);
    cmd.env("OPENAI_API_KEY", "sk-test");
    let output = cmd.output()?;

    assert!(output.status.success());
    let text = stdout(&output);
    let openai = text.lines().find(|l| l.contains("openai")).unwrap();
    assert!(openai.starts_with('*'));
    assert!(openai.contains('✅'));
    let anthropic = text.lines().find(|l| l.contains("anthropic")).unwrap();
    assert!(anthropic.contains('❌'));
    assert!(anthropic.contains("ANTHROPIC_API_KEY"));
    Ok(())
}

#[test]
fn test_custom_tools_lifecycle() -> Result<()> {
    let home = TempDir::new()?;
    run_forgor(home.path(), &["config", "init"])?;

    let add = run_forgor(home.path(), &["config", "tools", "add", "cloud", "aws, gcloud,aws"])?;
    assert!(add.status.success(), "add failed: {}", stderr(&add));
    assert!(stdout(&add).contains("aws, gcloud"));

    let list = run_forgor(home.path(), &["config", "tools", "list"])?;
    assert!(stdout(&list).contains("cloud_tools: aws, gcloud"));

    let remove = run_forgor(home.path(), &["config", "tools", "remove", "cloud", "aws"])?;
    assert!(remove.status.success());
    let list = run_forgor(home.path(), &["config", "tools", "list", "cloud"])?;
    assert!(stdout(&list).contains("cloud_tools: gcloud"));

    let clear = run_forgor(home.path(), &["config", "tools", "clear", "all"])?;
    assert!(clear.status.success());
    let list = run_forgor(home.path(), &["config", "tools", "list"])?;
    assert!(stdout(&list).contains("No custom tools configured"));

    let bad = run_forgor(home.path(), &["config", "tools", "add", "spaceships", "x"])?;
    assert!(!bad.status.success());
    assert!(stderr(&bad).contains("unknown tool category"));
    Ok(())
}

#[test]
fn test_tools_add_leaves_malformed_config_alone() -> Result<()> {
    let home = TempDir::new()?;
    let dir = home.path().join("config");
    std::fs::create_dir_all(&dir)?;
    let broken = "default_profile: work\nprofiles:\n  work:\n    provider: openai\n    api_key: sk-literal\n     model: gpt-4o\n";
    std::fs::write(dir.join("config.yaml"), broken)?;

    let output = run_forgor(home.path(), &["config", "tools", "add", "other", "mytool"])?;
    assert!(!output.status.success());
    assert!(stderr(&output).starts_with("Error:"));
    assert_eq!(std::fs::read_to_string(dir.join("config.yaml"))?, broken);
    Ok(())
}

#[test]
fn test_tool_categories_are_listed() -> Result<()> {
    let home = TempDir::new()?;
    let output = run_forgor(home.path(), &["config", "tools", "categories"])?;
    let text = stdout(&output);
    assert_eq!(text.lines().count(), 9);
    assert!(text.contains("package_managers"));
    assert!(text.contains("network_tools"));
    Ok(())
}

#[test]
fn test_cache_location_and_empty_status() -> Result<()> {
    let home = TempDir::new()?;

    let location = run_forgor(home.path(), &["config", "cache", "location"])?;
    let printed = stdout(&location);
    assert!(printed.trim().ends_with("context_cache.json"));
    assert!(printed.contains(home.path().to_string_lossy().as_ref()));

    let status = run_forgor(home.path(), &["config", "cache", "status"])?;
    assert!(status.status.success());
    assert!(stdout(&status).contains("No usable cache"));

    let clear = run_forgor(home.path(), &["config", "cache", "clear"])?;
    assert!(clear.status.success());
    assert!(stdout(&clear).contains("No context cache to clear"));
    Ok(())
}

#[test]
fn test_local_only_is_refused() -> Result<()> {
    let home = TempDir::new()?;
    let output = run_forgor(home.path(), &["--local-only", "list files"])?;

    assert!(!output.status.success());
    assert!(stderr(&output).contains("--local-only"));
    Ok(())
}

#[test]
fn test_missing_credential_fails_with_one_line() -> Result<()> {
    let home = TempDir::new()?;
    let output = run_forgor(home.path(), &["list", "files"])?;

    assert!(!output.status.success());
    let err = stderr(&output);
    let error_lines: Vec<&str> = err.lines().filter(|l| l.starts_with("Error:")).collect();
    assert_eq!(error_lines.len(), 1);
    assert!(error_lines[0].contains("OPENAI_API_KEY"));
    Ok(())
}

#[test]
fn test_run_without_history_fails() -> Result<()> {
    let home = TempDir::new()?;
    let output = run_forgor(home.path(), &["run"])?;

    assert!(!output.status.success());
    assert!(stderr(&output).contains("No command has been generated yet"));
    Ok(())
}

fn write_local_profile(home: &Path, endpoint: &str) -> Result<()> {
    let dir = home.join("config");
    std::fs::create_dir_all(&dir)?;
    std::fs::write(
        dir.join("config.yaml"),
        format!(
            "default_profile: box\nprofiles:\n  box:\n    provider: local\n    model: llama3.1:8b\n    endpoint: {endpoint}\n"
        ),
    )?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_generate_against_local_server_then_run_declines() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "chatcmpl-1",
            "model": "llama3.1:8b",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": "ls -la || lists every file" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 50, "completion_tokens": 6, "total_tokens": 56 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let home = TempDir::new()?;
    write_local_profile(home.path(), &format!("{}/v1", server.uri()))?;

    let output = tokio::process::Command::from(forgor(home.path(), &["-f", "json", "list", "all", "files"]))
        .output()
        .await?;
    assert!(output.status.success(), "generate failed: {}", stderr(&output));

    let value: serde_json::Value = serde_json::from_str(&stdout(&output))?;
    assert_eq!(value["command"], "ls -la");
    assert_eq!(value["danger"]["level"], "safe");
    assert_eq!(value["profile"], "box");
    assert_eq!(value["usage"]["total"], 56);

    assert!(home.path().join("config").join("last_command.json").exists());
    assert!(home.path().join("config").join("context_cache.json").exists());

    // No terminal answer, so the prompt declines and nothing runs.
    let run = tokio::process::Command::from(forgor(home.path(), &["run"])).output().await?;
    assert!(run.status.success(), "run failed: {}", stderr(&run));
    assert!(stdout(&run).contains("ls -la"));
    assert!(stderr(&run).contains("Cancelled"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_vendor_rate_limit_exits_non_zero() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_string(r#"{"error":{"type":"rate_limit_error","message":"slow down"}}"#),
        )
        .mount(&server)
        .await;

    let home = TempDir::new()?;
    write_local_profile(home.path(), &format!("{}/v1", server.uri()))?;

    let output = tokio::process::Command::from(forgor(home.path(), &["list", "files"]))
        .output()
        .await?;
    assert!(!output.status.success());
    assert!(stderr(&output).contains("slow down"));
    Ok(())
}
