use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_MAX_GENERATE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub project_root: PathBuf,
    pub llm: LlmConfig,
    // Log every request and response payload at debug level
    pub log_verbose: bool,
    pub max_generate_attempts: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            project_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            llm: LlmConfig::default(),
            log_verbose: false,
            max_generate_attempts: DEFAULT_MAX_GENERATE_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LlmConfig {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            request_timeout_ms: 60_000,
            timeout_ms: 600_000, // 10 minutes
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub llm: Option<PartialLlmConfig>,
    pub log_verbose: Option<bool>,
    pub max_generate_attempts: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PartialLlmConfig {
    pub connect_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
}

/// Values given on the command line. They win over every other source.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub log_verbose: bool,
    pub max_generate_attempts: Option<usize>,
}

impl AppConfig {
    /// Resolve from the environment and config files, rooted at the current directory.
    pub fn from_env() -> Result<Self> {
        Self::resolve(CliOverrides::default())
    }

    pub fn resolve(cli: CliOverrides) -> Result<Self> {
        let project_root = std::env::current_dir().context("resolve current dir")?;

        // Load project-specific configuration first (highest priority after CLI args and env vars)
        let project_cfg = load_project_config(&project_root).unwrap_or_default();

        // Load global configuration
        let file_cfg = load_file_config().unwrap_or_default();

        Ok(Self::merge(
            cli,
            |key| std::env::var(key).ok(),
            project_cfg,
            file_cfg,
            project_root,
        ))
    }

    /// Combine every source: CLI, then `env`, then the project file, then the global file.
    pub fn merge(
        cli: CliOverrides,
        env: impl Fn(&str) -> Option<String>,
        project_cfg: FileConfig,
        file_cfg: FileConfig,
        project_root: PathBuf,
    ) -> Self {
        let api_key = cli
            .api_key
            .or_else(|| env("OPENAI_API_KEY"))
            .or(project_cfg.api_key)
            .or(file_cfg.api_key);
        let base_url = cli
            .base_url
            .or_else(|| env("OPENAI_BASE_URL"))
            .or(project_cfg.base_url)
            .or(file_cfg.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = cli
            .model
            .or_else(|| env("OPENAI_MODEL"))
            .or(project_cfg.model)
            .or(file_cfg.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let log_verbose = cli.log_verbose
            || env("TYPED_LLM_LOG_VERBOSE")
                .and_then(|v| parse_flag(&v))
                .or(project_cfg.log_verbose)
                .or(file_cfg.log_verbose)
                .unwrap_or(false);

        let max_generate_attempts = cli
            .max_generate_attempts
            .or_else(|| {
                env("TYPED_LLM_MAX_GENERATE_ATTEMPTS").and_then(|v| v.trim().parse().ok())
            })
            .or(project_cfg.max_generate_attempts)
            .or(file_cfg.max_generate_attempts)
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_GENERATE_ATTEMPTS);

        // project_cfg takes precedence over file_cfg, field by field
        let llm_defaults = LlmConfig::default();
        let project_llm = project_cfg.llm.unwrap_or_default();
        let file_llm = file_cfg.llm.unwrap_or_default();
        let llm = LlmConfig {
            connect_timeout_ms: project_llm
                .connect_timeout_ms
                .or(file_llm.connect_timeout_ms)
                .unwrap_or(llm_defaults.connect_timeout_ms),
            request_timeout_ms: project_llm
                .request_timeout_ms
                .or(file_llm.request_timeout_ms)
                .unwrap_or(llm_defaults.request_timeout_ms),
            timeout_ms: project_llm
                .timeout_ms
                .or(file_llm.timeout_ms)
                .unwrap_or(llm_defaults.timeout_ms),
        };

        Self {
            base_url,
            model,
            api_key,
            project_root,
            llm,
            log_verbose,
            max_generate_attempts,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

pub fn load_file_config() -> Result<FileConfig> {
    use std::env;

    fn candidate_paths() -> Vec<PathBuf> {
        let mut v = Vec::new();
        if let Ok(p) = env::var("TYPED_LLM_CONFIG") {
            v.push(PathBuf::from(p));
        }
        if let Ok(xdg_home) = env::var("XDG_CONFIG_HOME") {
            v.push(Path::new(&xdg_home).join("typed-llm/config.toml"));
        } else if let Ok(home) = env::var("HOME") {
            v.push(Path::new(&home).join(".config/typed-llm/config.toml"));
        }
        if let Ok(dirs) = env::var("XDG_CONFIG_DIRS") {
            for d in dirs.split(':') {
                if !d.is_empty() {
                    v.push(Path::new(d).join("typed-llm/config.toml"));
                }
            }
        }
        v
    }

    for p in candidate_paths() {
        if p.exists() {
            let s = fs::read_to_string(&p)
                .with_context(|| format!("read config file: {}", p.display()))?;
            match toml::from_str::<FileConfig>(&s) {
                Ok(cfg) => {
                    info!(path=%p.display(), "loaded config file");
                    return Ok(cfg);
                }
                Err(e) => {
                    warn!(path=%p.display(), error=%e.to_string(), "parse config failed");
                    continue;
                }
            }
        }
    }
    Ok(FileConfig::default())
}

/// Load project-specific configuration from .typed-llm/config.toml
pub fn load_project_config(project_root: &Path) -> Result<FileConfig> {
    let project_config_path = project_root.join(".typed-llm").join("config.toml");

    if !project_config_path.exists() {
        return Ok(FileConfig::default());
    }
    let s = fs::read_to_string(&project_config_path).with_context(|| {
        format!(
            "read project config file: {}",
            project_config_path.display()
        )
    })?;
    match toml::from_str::<FileConfig>(&s) {
        Ok(cfg) => {
            info!(path=%project_config_path.display(), "loaded project config file");
            Ok(cfg)
        }
        Err(e) => {
            warn!(
                path = %project_config_path.display(),
                error = %e,
                "parse project config failed"
            );
            Ok(FileConfig::default())
        }
    }
}

#[cfg(test)]
mod tests;
