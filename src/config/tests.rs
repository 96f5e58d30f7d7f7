use crate::config::{
    AppConfig, CliOverrides, DEFAULT_MAX_GENERATE_ATTEMPTS, FileConfig, LlmConfig,
    PartialLlmConfig, load_project_config,
};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| map.get(key).cloned()
}

#[test]
fn test_load_project_config() {
    let temp_dir = TempDir::new().unwrap();
    let project_root = temp_dir.path();

    // Create .typed-llm directory and config file
    let cfg_dir = project_root.join(".typed-llm");
    fs::create_dir_all(&cfg_dir).unwrap();

    let config_content = r#"
model = "gpt-4o"
log_verbose = true
max_generate_attempts = 5

[llm]
request_timeout_ms = 1500
"#;

    fs::write(cfg_dir.join("config.toml"), config_content).unwrap();

    let project_cfg = load_project_config(project_root).unwrap();

    assert_eq!(project_cfg.model, Some("gpt-4o".to_string()));
    assert_eq!(project_cfg.log_verbose, Some(true));
    assert_eq!(project_cfg.max_generate_attempts, Some(5));

    let llm_cfg = project_cfg.llm.unwrap();
    assert_eq!(llm_cfg.request_timeout_ms, Some(1500));
    assert_eq!(llm_cfg.timeout_ms, None);
}

#[test]
fn test_load_project_config_not_exists() {
    let temp_dir = TempDir::new().unwrap();

    let project_cfg = load_project_config(temp_dir.path()).unwrap();

    assert_eq!(project_cfg, FileConfig::default());
}

#[test]
fn test_invalid_project_config_falls_back_to_default() {
    let temp_dir = TempDir::new().unwrap();
    let cfg_dir = temp_dir.path().join(".typed-llm");
    fs::create_dir_all(&cfg_dir).unwrap();
    fs::write(cfg_dir.join("config.toml"), "model = [not toml").unwrap();

    let project_cfg = load_project_config(temp_dir.path()).unwrap();
    assert_eq!(project_cfg, FileConfig::default());
}

#[test]
fn test_defaults_when_nothing_is_set() {
    let cfg = AppConfig::merge(
        CliOverrides::default(),
        env_of(&[]),
        FileConfig::default(),
        FileConfig::default(),
        PathBuf::from("."),
    );
    assert_eq!(cfg.base_url, "https://api.openai.com/v1");
    assert_eq!(cfg.model, "gpt-4o-mini");
    assert!(cfg.api_key.is_none());
    assert!(!cfg.log_verbose);
    assert_eq!(cfg.max_generate_attempts, DEFAULT_MAX_GENERATE_ATTEMPTS);
    assert_eq!(cfg.llm, LlmConfig::default());
}

#[test]
fn test_precedence_cli_env_project_global() {
    let project = FileConfig {
        model: Some("project-model".into()),
        base_url: Some("http://project".into()),
        api_key: Some("project-key".into()),
        max_generate_attempts: Some(7),
        llm: Some(PartialLlmConfig {
            connect_timeout_ms: Some(1),
            ..Default::default()
        }),
        ..Default::default()
    };
    let global = FileConfig {
        model: Some("global-model".into()),
        log_verbose: Some(true),
        llm: Some(PartialLlmConfig {
            connect_timeout_ms: Some(2),
            timeout_ms: Some(3),
            ..Default::default()
        }),
        ..Default::default()
    };
    let cli = CliOverrides {
        model: Some("cli-model".into()),
        ..Default::default()
    };
    let cfg = AppConfig::merge(
        cli,
        env_of(&[("OPENAI_BASE_URL", "http://env"), ("OPENAI_MODEL", "env-model")]),
        project,
        global,
        PathBuf::from("."),
    );

    assert_eq!(cfg.model, "cli-model");
    assert_eq!(cfg.base_url, "http://env");
    assert_eq!(cfg.api_key.as_deref(), Some("project-key"));
    assert!(cfg.log_verbose);
    assert_eq!(cfg.max_generate_attempts, 7);
    assert_eq!(cfg.llm.connect_timeout_ms, 1);
    assert_eq!(cfg.llm.timeout_ms, 3);
    assert_eq!(cfg.llm.request_timeout_ms, LlmConfig::default().request_timeout_ms);
}

#[test]
fn test_env_flags_are_parsed() {
    let cfg = AppConfig::merge(
        CliOverrides::default(),
        env_of(&[
            ("TYPED_LLM_LOG_VERBOSE", "yes"),
            ("TYPED_LLM_MAX_GENERATE_ATTEMPTS", "0"),
        ]),
        FileConfig {
            log_verbose: Some(false),
            ..Default::default()
        },
        FileConfig::default(),
        PathBuf::from("."),
    );
    assert!(cfg.log_verbose);
    // zero attempts could never succeed, so it falls back to the default
    assert_eq!(cfg.max_generate_attempts, DEFAULT_MAX_GENERATE_ATTEMPTS);
}
