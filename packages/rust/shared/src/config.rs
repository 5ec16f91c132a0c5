//! Application configuration for affilscan.
//!
//! User config lives at `~/.affilscan/affilscan.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AffilscanError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "affilscan.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".affilscan";

// ---------------------------------------------------------------------------
// Config structs (matching affilscan.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Durable output locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// HTTP fetch policies.
    #[serde(default)]
    pub fetch: FetchPoliciesConfig,
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root under which extracted source is archived, one directory per record.
    #[serde(default = "default_failed_source_dir")]
    pub failed_source_dir: String,

    /// Append-only diagnostic log.
    #[serde(default = "default_error_log")]
    pub error_log: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            failed_source_dir: default_failed_source_dir(),
            error_log: default_error_log(),
        }
    }
}

fn default_failed_source_dir() -> String {
    "data/log/failed_tex".into()
}
fn default_error_log() -> String {
    "data/log/LaTeX_error_log.txt".into()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchPoliciesConfig {
    /// Ceiling for a whole request, headers through last byte.
    #[serde(default = "default_total_timeout")]
    pub total_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Ceiling between two socket reads.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Idle keep-alive connections retained per host.
    #[serde(default = "default_pool_idle")]
    pub pool_max_idle_per_host: usize,

    /// Lower bound of the randomized pre-request delay.
    #[serde(default = "default_delay_min")]
    pub delay_min_ms: u64,

    /// Upper bound (exclusive) of the randomized pre-request delay.
    #[serde(default = "default_delay_max")]
    pub delay_max_ms: u64,
}

impl Default for FetchPoliciesConfig {
    fn default() -> Self {
        Self {
            total_timeout_secs: default_total_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            pool_max_idle_per_host: default_pool_idle(),
            delay_min_ms: default_delay_min(),
            delay_max_ms: default_delay_max(),
        }
    }
}

fn default_total_timeout() -> u64 {
    300
}
fn default_connect_timeout() -> u64 {
    15
}
fn default_read_timeout() -> u64 {
    90
}
fn default_pool_idle() -> usize {
    50
}
fn default_delay_min() -> u64 {
    200
}
fn default_delay_max() -> u64 {
    1300
}

// ---------------------------------------------------------------------------
// Fetch config (runtime, merged from config file)
// ---------------------------------------------------------------------------

/// Runtime fetch configuration shared by every request of a batch.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub total_timeout: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    /// Randomized pre-request delay range, `min..max`.
    pub delay_min: Duration,
    pub delay_max: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl FetchConfig {
    /// Same timeouts, no pre-request delay. Used by tests against mock servers.
    pub fn without_delay(mut self) -> Self {
        self.delay_min = Duration::ZERO;
        self.delay_max = Duration::ZERO;
        self
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        let fetch = &config.fetch;
        Self {
            total_timeout: Duration::from_secs(fetch.total_timeout_secs),
            connect_timeout: Duration::from_secs(fetch.connect_timeout_secs),
            read_timeout: Duration::from_secs(fetch.read_timeout_secs),
            pool_max_idle_per_host: fetch.pool_max_idle_per_host,
            delay_min: Duration::from_millis(fetch.delay_min_ms),
            delay_max: Duration::from_millis(fetch.delay_max_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.affilscan/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| AffilscanError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.affilscan/affilscan.toml`).
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

/// Load and validate the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| AffilscanError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        AffilscanError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| AffilscanError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| AffilscanError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| AffilscanError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject configurations the fetcher cannot honour.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let fetch = &config.fetch;
    let timeouts = [
        ("total_timeout_secs", fetch.total_timeout_secs),
        ("connect_timeout_secs", fetch.connect_timeout_secs),
        ("read_timeout_secs", fetch.read_timeout_secs),
    ];
    for (name, secs) in timeouts {
        if secs == 0 {
            return Err(AffilscanError::config(format!("fetch.{name} must be > 0")));
        }
    }
    if fetch.delay_min_ms > fetch.delay_max_ms {
        return Err(AffilscanError::config(format!(
            "fetch.delay_min_ms ({}) exceeds fetch.delay_max_ms ({})",
            fetch.delay_min_ms, fetch.delay_max_ms
        )));
    }
    Ok(())
}
