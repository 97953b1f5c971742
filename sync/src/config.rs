//! Configuration for the sync layer.
//!
//! Every chunk size, cache bound, and interval the engine and sync code
//! depend on is tunable here, with environment overrides for deployment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Sync layer configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the alignment server
    pub base_url: String,
    /// Entries per POST when transmitting journal pages
    pub server_chunk_size: usize,
    /// Links per bulk-insert chunk in the engine store
    pub bulk_chunk_size: usize,
    /// Tokens per formatting chunk when building per-corpus word lists
    pub ui_chunk_size: usize,
    /// Journal entries per page read
    pub db_page_size: usize,
    /// Read cache time-to-live
    pub cache_ttl: Duration,
    /// Read cache entry bound
    pub cache_max_entries: u64,
    /// Cross-process revision polling interval
    pub revision_poll_interval: Duration,
    /// Delay before a terminal sync status resets to idle
    pub status_reset_delay: Duration,
    /// Directory for bulk journal payload files
    pub payload_dir: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            server_chunk_size: 1000,
            bulk_chunk_size: 2000,
            ui_chunk_size: 250,
            db_page_size: 5000,
            cache_ttl: Duration::from_secs(10),
            cache_max_entries: 1000,
            revision_poll_interval: Duration::from_millis(500),
            status_reset_delay: Duration::from_secs(5),
            payload_dir: env::temp_dir().join("concord-payloads"),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(url) = env::var("CONCORD_SERVER_URL") {
            config.base_url = url;
        }
        if let Ok(dir) = env::var("CONCORD_PAYLOAD_DIR") {
            config.payload_dir = PathBuf::from(dir);
        }

        config.server_chunk_size =
            parse_env("CONCORD_SERVER_CHUNK_SIZE", config.server_chunk_size)?;
        config.bulk_chunk_size = parse_env("CONCORD_BULK_CHUNK_SIZE", config.bulk_chunk_size)?;
        config.ui_chunk_size = parse_env("CONCORD_UI_CHUNK_SIZE", config.ui_chunk_size)?;
        config.db_page_size = parse_env("CONCORD_DB_PAGE_SIZE", config.db_page_size)?;
        config.cache_max_entries =
            parse_env("CONCORD_CACHE_MAX_ENTRIES", config.cache_max_entries)?;

        if let Some(ms) = parse_env_opt::<u64>("CONCORD_CACHE_TTL_MS")? {
            config.cache_ttl = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env_opt::<u64>("CONCORD_REVISION_POLL_MS")? {
            config.revision_poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env_opt::<u64>("CONCORD_STATUS_RESET_MS")? {
            config.status_reset_delay = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    Ok(parse_env_opt(name)?.unwrap_or(default))
}

fn parse_env_opt<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}")]
    InvalidValue(&'static str),
}
