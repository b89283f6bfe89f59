//! Application configuration for the harvester.
//!
//! User config lives at `~/.hearings/hearings.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "hearings.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".hearings";

// ---------------------------------------------------------------------------
// Config structs (matching hearings.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote committees API.
    #[serde(default)]
    pub api: ApiConfig,

    /// Harvest run defaults.
    #[serde(default)]
    pub harvest: HarvestDefaults,

    /// Backoff policy for transient request failures.
    #[serde(default)]
    pub retry: RetryConfig,

    /// External topic-model bridge.
    #[serde(default)]
    pub topics: TopicsConfig,
}

/// `[api]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the committees API (no trailing slash needed).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Committee whose oral evidence is harvested.
    #[serde(default = "default_committee_id")]
    pub committee_id: i64,

    /// Sessions requested per catalog page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// User-Agent header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            committee_id: default_committee_id(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_base_url() -> String {
    "https://committees-api.parliament.uk/api".into()
}
fn default_committee_id() -> i64 {
    158
}
fn default_page_size() -> u32 {
    50
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_user_agent() -> String {
    concat!("hearings/", env!("CARGO_PKG_VERSION")).into()
}

/// `[harvest]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestDefaults {
    /// Corpus root directory (transcripts, ledger, manifest).
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Documents fetched in parallel. 1 keeps the run strictly sequential.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Pause before each document request, in ms.
    #[serde(default = "default_request_delay")]
    pub request_delay_ms: u64,

    /// Pause between catalog page requests, in ms.
    #[serde(default = "default_page_delay")]
    pub page_delay_ms: u64,
}

impl Default for HarvestDefaults {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            concurrency: default_concurrency(),
            request_delay_ms: default_request_delay(),
            page_delay_ms: default_page_delay(),
        }
    }
}

fn default_output_dir() -> String {
    "hearings-data".into()
}
fn default_concurrency() -> u32 {
    1
}
fn default_request_delay() -> u64 {
    400
}
fn default_page_delay() -> u64 {
    300
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per request, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in ms. Doubles on each further retry.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound for a single backoff delay, in ms.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    1_000
}
fn default_max_delay() -> u64 {
    30_000
}

/// `[topics]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsConfig {
    /// Program that runs the topic-model bridge.
    #[serde(default = "default_bridge_cmd")]
    pub bridge_cmd: String,

    /// Arguments passed to `bridge_cmd` (typically the bridge script path).
    #[serde(default = "default_bridge_args")]
    pub bridge_args: Vec<String>,

    /// Transcripts shorter than this are not handed to the modeller.
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,

    /// Topics kept by name in the per-year prevalence table.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            bridge_cmd: default_bridge_cmd(),
            bridge_args: default_bridge_args(),
            min_chars: default_min_chars(),
            top_n: default_top_n(),
        }
    }
}

fn default_bridge_cmd() -> String {
    "python3".into()
}
fn default_bridge_args() -> Vec<String> {
    vec!["scripts/topic_bridge.py".into()]
}
fn default_min_chars() -> usize {
    500
}
fn default_top_n() -> usize {
    10
}

// ---------------------------------------------------------------------------
// Runtime config (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Bounded exponential backoff: `base * 2^retry`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first. Never below 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that never sleeps; used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Runtime harvest configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Base URL of the committees API.
    pub base_url: String,
    /// Committee (collection) being harvested.
    pub committee_id: i64,
    /// Sessions per catalog page.
    pub page_size: u32,
    /// Per-request timeout.
    pub timeout: Duration,
    /// User-Agent header.
    pub user_agent: String,
    /// Corpus root directory.
    pub output_dir: PathBuf,
    /// Maximum documents in flight.
    pub concurrency: u32,
    /// Pause before each document request.
    pub request_delay: Duration,
    /// Pause between catalog pages.
    pub page_delay: Duration,
    /// Backoff for transient failures.
    pub retry: RetryPolicy,
    /// Re-attempt sessions previously recorded as having no document.
    pub retry_no_document: bool,
    /// Stop after this many sessions have been attempted.
    pub limit: Option<usize>,
}

impl From<&AppConfig> for HarvestConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            base_url: config.api.base_url.trim_end_matches('/').to_string(),
            committee_id: config.api.committee_id,
            page_size: config.api.page_size,
            timeout: Duration::from_secs(config.api.timeout_secs),
            user_agent: config.api.user_agent.clone(),
            output_dir: PathBuf::from(&config.harvest.output_dir),
            concurrency: config.harvest.concurrency,
            request_delay: Duration::from_millis(config.harvest.request_delay_ms),
            page_delay: Duration::from_millis(config.harvest.page_delay_ms),
            retry: RetryPolicy::from(&config.retry),
            retry_no_document: false,
            limit: None,
        }
    }
}

impl HarvestConfig {
    /// Reject settings that would make a run meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.committee_id <= 0 {
            return Err(HarvestError::config("committee_id must be positive"));
        }
        if self.page_size == 0 {
            return Err(HarvestError::config("page_size must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(HarvestError::config("concurrency must be at least 1"));
        }
        url::Url::parse(&self.base_url).map_err(|e| {
            HarvestError::config(format!("invalid base_url '{}': {e}", self.base_url))
        })?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.hearings/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| HarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.hearings/hearings.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| HarvestError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| HarvestError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    init_config_at(&config_file_path()?)
}

/// Write a default config file at `path`, creating parent directories.
/// An existing file is left untouched.
pub fn init_config_at(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        tracing::info!(?path, "config file already exists, leaving it unchanged");
        return Ok(path.to_path_buf());
    }

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| HarvestError::io(dir, e))?;
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| HarvestError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| HarvestError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path.to_path_buf())
}
