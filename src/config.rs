use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::models::EntityKind;

/// Largest page the catalog search endpoint will serve.
pub const MAX_PAGE_SIZE: u32 = 50;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub offline: OfflineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    #[serde(default = "default_input_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            root: default_input_root(),
            include_globs: default_include_globs(),
        }
    }
}

fn default_input_root() -> PathBuf {
    PathBuf::from("./data/tags")
}
fn default_include_globs() -> Vec<String> {
    vec!["*.json".to_string(), "*.jsonl".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            market: None,
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_pages: default_max_pages(),
            token_env: default_token_env(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.spotify.com/v1".to_string()
}
fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_request_delay_ms() -> u64 {
    500
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_max_backoff_ms() -> u64 {
    32_000
}
fn default_max_pages() -> u32 {
    20
}
fn default_token_env() -> String {
    "CATALOG_ACCESS_TOKEN".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Characters replaced by a space before comparison and search.
    #[serde(default = "default_strip_chars")]
    pub strip_chars: String,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            strip_chars: default_strip_chars(),
        }
    }
}

fn default_threshold() -> f64 {
    70.0
}
fn default_strip_chars() -> String {
    "!\"#$%&'()*+,./;<=>?@[\\]^_`{|}~".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_consecutive_failures: default_max_consecutive_failures(),
            timeout_secs: None,
        }
    }
}

fn default_max_concurrency() -> usize {
    1
}
fn default_max_consecutive_failures() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DiagnosticsConfig {
    /// Directory for near-miss dumps. Disabled when unset.
    #[serde(default)]
    pub dump_dir: Option<PathBuf>,
}

/// Known identifiers served by the offline catalog, keyed by display name.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct OfflineConfig {
    #[serde(default)]
    pub artists: BTreeMap<String, String>,
    #[serde(default)]
    pub albums: BTreeMap<String, String>,
    #[serde(default)]
    pub tracks: BTreeMap<String, String>,
}

impl OfflineConfig {
    pub fn table(&self, kind: EntityKind) -> &BTreeMap<String, String> {
        match kind {
            EntityKind::Artist => &self.artists,
            EntityKind::Album => &self.albums,
            EntityKind::Track => &self.tracks,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate catalog
    let catalog = &config.catalog;
    if catalog.page_size == 0 || catalog.page_size > MAX_PAGE_SIZE {
        anyhow::bail!("catalog.page_size must be in [1, {}]", MAX_PAGE_SIZE);
    }
    if catalog.timeout_secs == 0 {
        anyhow::bail!("catalog.timeout_secs must be > 0");
    }
    if catalog.max_retries > 10 {
        anyhow::bail!("catalog.max_retries must be <= 10");
    }
    if catalog.max_pages == 0 {
        anyhow::bail!("catalog.max_pages must be >= 1");
    }
    if catalog.max_backoff_ms < catalog.backoff_base_ms {
        anyhow::bail!("catalog.max_backoff_ms must be >= catalog.backoff_base_ms");
    }

    // Validate matching
    if !(0.0..=100.0).contains(&config.matching.threshold) {
        anyhow::bail!("matching.threshold must be in [0.0, 100.0]");
    }
    if let Some(c) = config
        .matching
        .strip_chars
        .chars()
        .find(|c| c.is_alphanumeric() || c.is_whitespace())
    {
        anyhow::bail!(
            "matching.strip_chars may only contain punctuation, found '{}'",
            c
        );
    }

    // Validate run
    if config.run.max_concurrency == 0 {
        anyhow::bail!("run.max_concurrency must be >= 1");
    }
    if config.run.max_consecutive_failures == 0 {
        anyhow::bail!("run.max_consecutive_failures must be >= 1");
    }
    if config.run.timeout_secs == Some(0) {
        anyhow::bail!("run.timeout_secs must be > 0 when set");
    }

    Ok(())
}
