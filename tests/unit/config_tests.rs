use agent_harness::config::GlobalConfig;
use agent_harness::AppError;

#[test]
fn minimal_config_gets_documented_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("empty config is valid");

    assert_eq!(config.harness_root.to_string_lossy(), ".harness");
    assert_eq!(config.max_concurrent_sessions, 3);
    assert_eq!(config.max_depth, 12);
    assert_eq!(config.ipc_name, "agent-harness");
    assert_eq!(config.bus.poll_interval_ms, 500);
    assert_eq!(config.timeouts.startup_seconds, 120);
    assert_eq!(config.timeouts.idle_seconds, 900);
    assert_eq!(config.timeouts.wait_seconds, 1200);
    assert_eq!(config.timeouts.cancel_grace_seconds, 5);
    assert_eq!(config.retry.start_attempts, 3);
    assert_eq!(config.retry.start_backoff_ms, 500);
    assert_eq!(config.container.binary, "docker");
    assert_eq!(config.container.network_mode, "bridge");
}

#[test]
fn engine_tables_parse() {
    let config = GlobalConfig::from_toml_str(
        r#"
[engines.codex]
image = "harness-codex:latest"
cmd = "codex"
exec_args = ["exec", "--json"]

[engines.claude]
cmd = "claude"
"#,
    )
    .expect("engine tables parse");

    let codex = config.engine("codex").expect("codex configured");
    assert_eq!(codex.image, "harness-codex:latest");
    assert_eq!(codex.exec_args, vec!["exec", "--json"]);

    let claude = config.engine("claude").expect("claude configured");
    assert_eq!(claude.image, "harness-agent:latest");
}

#[test]
fn unknown_engine_lookup_fails() {
    let config = GlobalConfig::from_toml_str("").expect("valid");
    assert!(matches!(config.engine("gemini"), Err(AppError::Config(_))));
}

#[test]
fn zero_poll_interval_is_rejected() {
    let result = GlobalConfig::from_toml_str("[bus]\npoll_interval_ms = 0\n");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn zero_start_attempts_is_rejected() {
    let result = GlobalConfig::from_toml_str("[retry]\nstart_attempts = 0\n");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn engine_without_cmd_is_rejected() {
    let result = GlobalConfig::from_toml_str("[engines.codex]\ncmd = \"\"\n");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn derived_paths_follow_the_root() {
    let config = GlobalConfig::from_toml_str("harness_root = \"/var/lib/harness\"\n").expect("valid");
    assert_eq!(
        config.db_path().to_string_lossy(),
        "/var/lib/harness/state.sqlite3"
    );
    assert_eq!(
        config.bus_root("s1").to_string_lossy(),
        "/var/lib/harness/bus/s1"
    );
    assert_eq!(
        config.session_run_dir("t1", "s1").to_string_lossy(),
        "/var/lib/harness/runs/t1/sessions/s1"
    );
}
