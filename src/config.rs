use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// SQLite file backing the local fast cache.
    pub path: PathBuf,
    /// Repository directory holding record files.
    #[serde(default = "default_root")]
    pub root: String,
}

fn default_root() -> String {
    "data/predictions/".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    /// `owner/name` of the content repository.
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            repo: None,
            token: None,
            branch: default_branch(),
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
            fetch_concurrency: default_fetch_concurrency(),
            max_conflict_retries: default_max_conflict_retries(),
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}
fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_fetch_concurrency() -> usize {
    16
}
fn default_max_conflict_retries() -> u32 {
    3
}

impl RemoteConfig {
    /// Token from config, else `CAPSULE_REMOTE_TOKEN`.
    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var("CAPSULE_REMOTE_TOKEN").ok())
            .filter(|t| !t.is_empty())
    }

    /// Both a repository and a token are present.
    pub fn is_enabled(&self) -> bool {
        self.repo.as_deref().is_some_and(|r| !r.is_empty()) && self.resolved_token().is_some()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_hot_size")]
    pub hot_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            hot_size: default_hot_size(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    3600
}
fn default_hot_size() -> usize {
    100
}

/// How derived indices are kept current after a write.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    #[default]
    Rebuild,
    Incremental,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IndexConfig {
    #[serde(default)]
    pub mode: IndexMode,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Local-only configuration rooted at `db_path`.
    pub fn local(db_path: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig {
                path: db_path.into(),
                root: default_root(),
            },
            remote: None,
            cache: CacheConfig::default(),
            index: IndexConfig::default(),
            log: LogConfig::default(),
        }
    }

    pub fn remote_enabled(&self) -> bool {
        self.remote.as_ref().is_some_and(RemoteConfig::is_enabled)
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.store.root.trim().is_empty() {
        anyhow::bail!("store.root must not be empty");
    }

    if config.cache.hot_size == 0 {
        anyhow::bail!("cache.hot_size must be >= 1");
    }

    if config.cache.ttl_secs == 0 {
        anyhow::bail!("cache.ttl_secs must be >= 1");
    }

    if let Some(remote) = &config.remote {
        if remote.fetch_concurrency == 0 {
            anyhow::bail!("remote.fetch_concurrency must be >= 1");
        }
        if !remote.api_base.starts_with("http://") && !remote.api_base.starts_with("https://") {
            anyhow::bail!(
                "remote.api_base must be an http(s) URL, got '{}'",
                remote.api_base
            );
        }
    }

    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}
