//! Application configuration.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::entities::TargetSize;

use crate::infrastructure::image::disk_cache::{
    DEFAULT_MAX_CACHE_SIZE, DEFAULT_WRITE_CONCURRENCY, DEFAULT_WRITE_QUEUE, DiskCacheOptions,
};
use crate::infrastructure::image::downsampler::{
    DEFAULT_DISPLAY_SCALE, DEFAULT_THRESHOLD, Downsampler,
};
use crate::infrastructure::image::http_transport::{DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT};
use crate::infrastructure::image::memory_cache::{DEFAULT_COST_LIMIT, DEFAULT_COUNT_LIMIT};
use crate::infrastructure::image::prefetcher::DEFAULT_PREFETCH_CONCURRENCY;

pub(super) const APP_NAME: &str = "photocache";
pub(super) const APP_QUALIFIER: &str = "com";
pub(super) const APP_ORGANIZATION: &str = "photocache";

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Top-level configuration file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Log file path. Logs go to stderr when unset.
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Image cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
}

impl AppConfig {
    /// Returns the log file path, if file logging is enabled.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone()
    }
}

/// Image cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum decoded images held in memory.
    #[serde(default = "default_memory_count_limit")]
    pub memory_count_limit: usize,

    /// Maximum summed decoded size in bytes held in memory.
    #[serde(default = "default_memory_cost_limit")]
    pub memory_cost_limit: u64,

    /// Disk cache directory. Defaults to the OS cache directory.
    #[serde(default)]
    pub disk_dir: Option<PathBuf>,

    /// Age in days after which a disk entry is swept.
    #[serde(default = "default_disk_ttl_days")]
    pub disk_ttl_days: u64,

    /// Disk size cap in bytes.
    #[serde(default = "default_disk_max_size")]
    pub disk_max_size: u64,

    /// Seconds between periodic sweeps; 0 disables them.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Concurrent background disk writes.
    #[serde(default = "default_disk_write_concurrency")]
    pub disk_write_concurrency: usize,

    /// Queued background disk writes.
    #[serde(default = "default_disk_write_queue")]
    pub disk_write_queue: usize,

    /// Display density factor applied to target sizes.
    #[serde(default = "default_display_scale")]
    pub display_scale: f32,

    /// How many times larger than the target a source must be to be reduced.
    #[serde(default = "default_downsample_threshold")]
    pub downsample_threshold: f32,

    /// Concurrent prefetch loads.
    #[serde(default = "default_prefetch_concurrency")]
    pub prefetch_concurrency: usize,

    /// Display size prefetched images are decoded for. Native size when unset.
    #[serde(default)]
    pub prefetch_target: Option<TargetSize>,

    /// Network request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// User agent for image requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_count_limit: default_memory_count_limit(),
            memory_cost_limit: default_memory_cost_limit(),
            disk_dir: None,
            disk_ttl_days: default_disk_ttl_days(),
            disk_max_size: default_disk_max_size(),
            sweep_interval_secs: default_sweep_interval_secs(),
            disk_write_concurrency: default_disk_write_concurrency(),
            disk_write_queue: default_disk_write_queue(),
            display_scale: default_display_scale(),
            downsample_threshold: default_downsample_threshold(),
            prefetch_concurrency: default_prefetch_concurrency(),
            prefetch_target: None,
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl CacheConfig {
    /// Returns the disk cache directory, resolving the OS default.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.disk_dir.clone().unwrap_or_else(default_cache_dir)
    }

    /// Returns the disk entry time-to-live.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.disk_ttl_days.saturating_mul(SECS_PER_DAY))
    }

    /// Returns the periodic sweep interval, if enabled.
    #[must_use]
    pub const fn sweep_interval(&self) -> Option<Duration> {
        if self.sweep_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.sweep_interval_secs))
        }
    }

    /// Returns the network request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Builds disk cache options.
    #[must_use]
    pub const fn disk_options(&self) -> DiskCacheOptions {
        DiskCacheOptions {
            max_size: self.disk_max_size,
            write_concurrency: self.disk_write_concurrency,
            write_queue: self.disk_write_queue,
        }
    }

    /// Builds the downsampler.
    #[must_use]
    pub const fn downsampler(&self) -> Downsampler {
        Downsampler::new(self.display_scale, self.downsample_threshold)
    }
}

/// Returns the default disk cache directory (`<os cache dir>/images`).
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME).map_or_else(
        || std::env::temp_dir().join(APP_NAME).join("cache").join("images"),
        |dirs| dirs.cache_dir().join("images"),
    )
}

const fn default_memory_count_limit() -> usize {
    DEFAULT_COUNT_LIMIT
}

const fn default_memory_cost_limit() -> u64 {
    DEFAULT_COST_LIMIT
}

const fn default_disk_ttl_days() -> u64 {
    7
}

const fn default_disk_max_size() -> u64 {
    DEFAULT_MAX_CACHE_SIZE
}

const fn default_sweep_interval_secs() -> u64 {
    60 * 60
}

const fn default_disk_write_concurrency() -> usize {
    DEFAULT_WRITE_CONCURRENCY
}

const fn default_disk_write_queue() -> usize {
    DEFAULT_WRITE_QUEUE
}

const fn default_display_scale() -> f32 {
    DEFAULT_DISPLAY_SCALE
}

const fn default_downsample_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

const fn default_prefetch_concurrency() -> usize {
    DEFAULT_PREFETCH_CONCURRENCY
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

use super::args::CliArgs;

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.cache.disk_dir = Some(cache_dir.clone());
        }
        if let Some(ttl_days) = args.ttl_days {
            self.cache.disk_ttl_days = ttl_days;
        }
        if let Some(cost_limit) = args.memory_cost_limit {
            self.cache.memory_cost_limit = cost_limit;
        }
        if let Some(display_scale) = args.display_scale {
            self.cache.display_scale = display_scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.memory_count_limit, 150);
        assert_eq!(config.memory_cost_limit, 150 * 1024 * 1024);
        assert_eq!(config.ttl(), Duration::from_secs(7 * 24 * 60 * 60));
        assert_eq!(config.sweep_interval(), Some(Duration::from_secs(3600)));
        assert!(config.cache_dir().ends_with("images"));
        assert_eq!(config.prefetch_target, None);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            log_level = "debug"

            [cache]
            disk_ttl_days = 3
            sweep_interval_secs = 0

            [cache.prefetch_target]
            width = 120
            height = 80
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.cache.ttl(), Duration::from_secs(3 * 24 * 60 * 60));
        assert_eq!(config.cache.sweep_interval(), None);
        assert_eq!(config.cache.memory_count_limit, DEFAULT_COUNT_LIMIT);
        assert_eq!(config.cache.prefetch_target, Some(TargetSize::new(120, 80)));
    }

    #[test]
    fn test_merge_with_args() {
        let args = CliArgs::parse_from([
            "photocache",
            "--log-level",
            "trace",
            "--cache-dir",
            "/tmp/pc",
            "--ttl-days",
            "1",
            "--display-scale",
            "2",
            "stats",
        ]);
        let mut config = AppConfig::default();
        config.merge_with_args(&args);

        assert_eq!(config.log_level, LogLevel::Trace);
        assert_eq!(config.cache.cache_dir(), PathBuf::from("/tmp/pc"));
        assert_eq!(config.cache.disk_ttl_days, 1);
        assert!((config.cache.display_scale - 2.0).abs() < f32::EPSILON);
    }
}
