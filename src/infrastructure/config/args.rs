use super::app_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "photocache",
    version,
    about = "Tiered image cache for media-heavy feeds",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// Disk cache directory.
    #[arg(long, value_name = "PATH", env = "PHOTOCACHE_DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Disk entry time-to-live in days.
    #[arg(long, global = true)]
    pub ttl_days: Option<u64>,

    /// Memory budget in decoded bytes.
    #[arg(long, global = true)]
    pub memory_cost_limit: Option<u64>,

    /// Display density factor.
    #[arg(long, global = true)]
    pub display_scale: Option<f32>,

    /// Command to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Cache operations.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch images through the cache and report where each came from.
    Fetch {
        /// Image URLs.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Target width in points.
        #[arg(long, requires = "height")]
        width: Option<u32>,

        /// Target height in points.
        #[arg(long, requires = "width")]
        height: Option<u32>,

        /// Save the first decoded image as PNG.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Warm the caches for a batch of images.
    Prefetch {
        /// Image URLs.
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Remove expired entries from the disk cache.
    Sweep,
    /// Delete every cached image.
    Clear,
    /// Show cache usage.
    Stats {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
}
