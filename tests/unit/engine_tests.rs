use std::path::Path;

use agent_harness::config::GlobalConfig;
use agent_harness::engine::Engine;
use agent_harness::AppError;
use serde_json::json;

fn test_config() -> GlobalConfig {
    GlobalConfig::from_toml_str(
        r#"
[engines.codex]
image = "harness-codex:latest"
cmd = "codex"
exec_args = ["exec", "--json"]

[engines.codex.env]
CODEX_HOME = "/home/agent/.codex"
"#,
    )
    .expect("valid config")
}

#[test]
fn engine_ids_resolve() {
    assert_eq!(Engine::from_id("codex").expect("codex").id(), "codex");
    assert_eq!(Engine::from_id("claude").expect("claude").id(), "claude");
    assert!(matches!(Engine::from_id("gemini"), Err(AppError::Config(_))));
}

#[test]
fn container_spec_assembles_command_env_and_mounts() {
    let config = test_config();
    let engine_config = config.engine("codex").expect("configured");
    let spec = Engine::Codex.container_spec(
        engine_config,
        &config.container,
        "fix the tests",
        Path::new("/srv/harness/bus/s1"),
        Some(Path::new("/srv/work/repo")),
    );

    assert_eq!(spec.image, "harness-codex:latest");
    assert_eq!(spec.agent_command, vec!["codex", "exec", "--json", "fix the tests"]);
    assert_eq!(spec.env.get("HARNESS_BUS_ROOT").map(String::as_str), Some("/harness-bus"));
    assert_eq!(spec.env.get("HARNESS_ENGINE").map(String::as_str), Some("codex"));
    assert_eq!(spec.env.get("CODEX_HOME").map(String::as_str), Some("/home/agent/.codex"));
    assert!(spec
        .mounts
        .iter()
        .any(|(host, target)| host == Path::new("/srv/harness/bus/s1") && target == "/harness-bus"));
    assert!(spec
        .mounts
        .iter()
        .any(|(host, target)| host == Path::new("/srv/work/repo") && target == "/workspace"));
}

#[test]
fn codex_results_parse_by_status() {
    let ok = Engine::Codex
        .parse_result(&json!({ "status": "ok", "summary": "done" }))
        .expect("ok result");
    assert!(ok.success);
    assert_eq!(ok.summary, "done");

    let failed = Engine::Codex
        .parse_result(&json!({ "status": "failed", "summary": "tests broke" }))
        .expect("failed result");
    assert!(!failed.success);

    assert!(matches!(
        Engine::Codex.parse_result(&json!({ "status": "maybe" })),
        Err(AppError::Protocol(_))
    ));
    assert!(matches!(
        Engine::Codex.parse_result(&json!({ "summary": "no status" })),
        Err(AppError::Protocol(_))
    ));
}

#[test]
fn claude_results_parse_by_error_flag() {
    let ok = Engine::Claude
        .parse_result(&json!({ "is_error": false, "result": "all green" }))
        .expect("ok result");
    assert!(ok.success);
    assert_eq!(ok.summary, "all green");

    let failed = Engine::Claude
        .parse_result(&json!({ "is_error": true, "result": "stuck" }))
        .expect("failed result");
    assert!(!failed.success);

    assert!(matches!(
        Engine::Claude.parse_result(&json!({ "result": "missing flag" })),
        Err(AppError::Protocol(_))
    ));
}
