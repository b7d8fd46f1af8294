// src/config/validator.rs
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{env, fs};

pub const DEFAULT_CONFIG_PATH: &str = "config/validator.toml";
pub const ENV_CONFIG_PATH: &str = "VALIDATOR_CONFIG_PATH";

fn default_repository_host() -> String {
    "github.com".to_string()
}
fn default_raw_base() -> String {
    "https://raw.githubusercontent.com".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    4
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_retention_secs() -> u64 {
    3600
}
fn default_provider() -> String {
    "workers-ai".to_string()
}
fn default_model() -> String {
    "@cf/meta/llama-3.3-70b-instruct-fp8-fast".to_string()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_true() -> bool {
    true
}

/// Root of `config/validator.toml`. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorConfig {
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Host accepted in repository URLs (`www.` prefix is tolerated).
    #[serde(default = "default_repository_host")]
    pub repository_host: String,
    /// Scheme + host that serves raw file contents.
    #[serde(default = "default_raw_base")]
    pub raw_base: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            repository_host: default_repository_host(),
            raw_base: default_raw_base(),
            connect_timeout_secs: default_connect_timeout_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Finished fetch workflows older than this are pruned.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// "workers-ai" | "openai" | "mock" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Total attempts to open a stream, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// "ENV" means: read from CLOUDFLARE_API_TOKEN / OPENAI_API_KEY (by provider)
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// Workers AI account id; falls back to CLOUDFLARE_ACCOUNT_ID.
    #[serde(default)]
    pub account_id: Option<String>,
    /// Override for the provider's API base URL.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: default_provider(),
            default_model: default_model(),
            max_attempts: default_max_attempts(),
            api_key: default_api_key(),
            account_id: None,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON file holding conversations. In-memory store when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl ValidatorConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path.as_ref())?;
        let mut cfg: ValidatorConfig = toml::from_str(&data)?;
        cfg.finalize()?;
        Ok(cfg)
    }

    /// Load using env var + fallback:
    /// 1) $VALIDATOR_CONFIG_PATH (must exist)
    /// 2) config/validator.toml
    /// 3) built-in defaults
    pub fn load_default() -> anyhow::Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                anyhow::bail!("{ENV_CONFIG_PATH} points to non-existent path");
            }
            return Self::load_from_file(&pb);
        }
        let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            return Self::load_from_file(&default_path);
        }
        let mut cfg = Self::default();
        cfg.finalize()?;
        Ok(cfg)
    }

    /// Normalize values and resolve env-provided settings.
    fn finalize(&mut self) -> anyhow::Result<()> {
        let m = &mut self.model;
        m.provider = m.provider.trim().to_lowercase();

        if env::var("AI_TEST_MODE").map(|v| v == "mock").unwrap_or(false) {
            m.provider = "mock".to_string();
        }
        if m.max_attempts == 0 {
            m.max_attempts = default_max_attempts();
        }
        if m.account_id.is_none() {
            m.account_id = env::var("CLOUDFLARE_ACCOUNT_ID").ok();
        }

        // Resolve api key if "ENV"
        if m.enabled && m.api_key.trim().eq_ignore_ascii_case("env") {
            m.api_key = match m.provider.as_str() {
                "workers-ai" => env::var("CLOUDFLARE_API_TOKEN")
                    .map_err(|_| anyhow::anyhow!("Missing CLOUDFLARE_API_TOKEN env var"))?,
                "openai" => env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?,
                "mock" => String::new(),
                other => anyhow::bail!("Unsupported provider in config: {other}"),
            };
        }

        let f = &mut self.fetcher;
        f.repository_host = f.repository_host.trim().to_ascii_lowercase();
        while f.raw_base.ends_with('/') {
            f.raw_base.pop();
        }
        Ok(())
    }
}
