//! Configuration types and loading
//!
//! YAML file (explicit `--config` path or the default user config dir),
//! serde defaults for everything, `QL_*` environment overrides applied
//! last. `validate()` runs before any orchestration starts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agent::AgentConfig;
use crate::executor::{ExecutorConfig, default_workers};
use crate::hitl::HitlGateConfig;

/// LLM backend selection and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "openai-compatible" or "scripted"
    pub provider: String,
    pub model: String,
    pub embed_model: String,
    pub base_url: String,
    /// Name of the env var holding the API key
    pub api_key_env: String,
    pub timeout_ms: u64,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai-compatible".to_string(),
            model: "gpt-4o".to_string(),
            embed_model: "text-embedding-3-small".to_string(),
            base_url: "https://api.openai.com".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_ms: 60_000,
            max_tokens: 8192,
        }
    }
}

/// Executor pool and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    pub workers: usize,
    pub max_retries: u32,
    pub llm_timeout_secs: u64,
    pub validation_timeout_secs: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_retries: 0,
            llm_timeout_secs: 60,
            validation_timeout_secs: 30,
        }
    }
}

/// Sandbox backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// "container", "process" or "stub"
    pub backend: String,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            backend: "process".to_string(),
        }
    }
}

/// HITL gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HitlSettings {
    pub enabled: bool,
    pub reviewer_timeout_secs: u64,
    /// External reviewer endpoint; reviewers attach programmatically, a
    /// configured endpoint with none attached is reported at startup
    pub reviewer_endpoint: Option<String>,
}

impl Default for HitlSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            reviewer_timeout_secs: 600,
            reviewer_endpoint: None,
        }
    }
}

/// Output and archive settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub dir: PathBuf,
    pub reproducible: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./out"),
            reproducible: false,
        }
    }
}

/// Persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// "sqlite" or "memory"
    pub backend: String,
    pub path: Option<PathBuf>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            path: None,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub executor: ExecutorSettings,
    pub sandbox: SandboxSettings,
    pub hitl: HitlSettings,
    pub output: OutputSettings,
    pub store: StoreSettings,
}

impl Config {
    /// Load from an explicit path, or the default location, or defaults;
    /// then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                debug!(?path, "Config::load: explicit path");
                Self::from_file(path)?
            }
            None => {
                let default_path = Self::default_path();
                if default_path.exists() {
                    debug!(?default_path, "Config::load: default path");
                    Self::from_file(&default_path)?
                } else {
                    debug!("Config::load: using built-in defaults");
                    Self::default()
                }
            }
        };
        config.apply_env();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let body = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config at {}", path.display()))?;
        serde_yaml::from_str(&body).wrap_err_with(|| format!("Invalid config at {}", path.display()))
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quantumlayer")
            .join("config.yml")
    }

    /// `QL_*` environment overrides, applied after file loading
    pub fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("QL_WORKERS")
            && let Ok(workers) = value.parse()
        {
            self.executor.workers = workers;
        }
        if let Ok(value) = std::env::var("QL_MAX_RETRIES")
            && let Ok(retries) = value.parse()
        {
            self.executor.max_retries = retries;
        }
        if let Ok(value) = std::env::var("QL_HITL") {
            self.hitl.enabled = matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on" | "yes");
        }
        if let Ok(value) = std::env::var("QL_REVIEWER_ENDPOINT") {
            self.hitl.reviewer_endpoint = Some(value);
        }
        if let Ok(value) = std::env::var("QL_OUTPUT_DIR") {
            self.output.dir = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("QL_SANDBOX_BACKEND") {
            self.sandbox.backend = value;
        }
        if let Ok(value) = std::env::var("QL_LLM_PROVIDER") {
            self.llm.provider = value;
        }
    }

    /// Reject configurations that cannot run
    pub fn validate(&self) -> Result<()> {
        if self.executor.workers == 0 {
            bail!("executor.workers must be at least 1");
        }
        if !matches!(self.sandbox.backend.as_str(), "container" | "process" | "stub") {
            bail!(
                "unknown sandbox backend '{}' (expected container, process or stub)",
                self.sandbox.backend
            );
        }
        match self.llm.provider.as_str() {
            "openai-compatible" => {
                if std::env::var(&self.llm.api_key_env).is_err() {
                    bail!("LLM provider needs an API key in ${}", self.llm.api_key_env);
                }
            }
            "scripted" => {}
            other => bail!("unknown LLM provider '{}' (expected openai-compatible or scripted)", other),
        }
        if self.hitl.reviewer_endpoint.is_some() {
            warn!("hitl.reviewer_endpoint is set but no reviewer transport is attached; default rules will apply");
        }
        Ok(())
    }

    /// Executor config assembled from the settings
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            workers: self.executor.workers.clamp(1, crate::executor::MAX_WORKERS),
            max_retries: self.executor.max_retries,
            agent: AgentConfig {
                llm_timeout: Duration::from_secs(self.executor.llm_timeout_secs),
                validation_timeout: Duration::from_secs(self.executor.validation_timeout_secs),
                max_tokens: self.llm.max_tokens,
            },
            ..Default::default()
        }
    }

    /// HITL gate config assembled from the settings
    pub fn hitl_config(&self) -> HitlGateConfig {
        HitlGateConfig {
            enabled: self.hitl.enabled,
            reviewer_timeout: Duration::from_secs(self.hitl.reviewer_timeout_secs),
        }
    }
}
