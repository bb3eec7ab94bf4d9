use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use photocache::domain::entities::{LoadedImage, TargetSize};
use photocache::infrastructure::{
    AppConfig, CliArgs, Command, HttpTransport, ImageCacheService, StorageManager,
};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let storage = StorageManager::new()?;
    let mut config = storage.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

fn save_png(loaded: &LoadedImage, path: &Path) -> Result<()> {
    loaded
        .image
        .save_with_format(path, image::ImageFormat::Png)
        .wrap_err_with(|| format!("failed to write {}", path.display()))
}

async fn run(service: &ImageCacheService, command: Command) -> Result<()> {
    match command {
        Command::Fetch {
            urls,
            width,
            height,
            output,
        } => {
            let target = width.zip(height).map(|(w, h)| TargetSize::new(w, h));
            let mut output = output;
            for url in &urls {
                match service.request(url, target).await {
                    Ok(loaded) => {
                        let (w, h) = loaded.dimensions();
                        println!("{url}\t{}\t{w}x{h}\t{}", loaded.source, loaded.key);
                        if let Some(path) = output.take() {
                            save_png(&loaded, &path)?;
                        }
                    }
                    Err(e) => println!("{url}\tunavailable\t{e}"),
                }
            }
        }
        Command::Prefetch { urls } => {
            let count = urls.len();
            service.prefetch(urls);
            service.wait_for_prefetch().await;
            println!("prefetched {count} images");
        }
        Command::Sweep => {
            let stats = service.sweep().await;
            println!(
                "expired {} trimmed {} freed {} bytes, {} retained",
                stats.expired, stats.trimmed, stats.freed_bytes, stats.retained
            );
        }
        Command::Clear => {
            service.clear().await;
            println!("cache cleared");
        }
        Command::Stats { json } => {
            let stats = service.stats().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("memory: {}", stats.memory);
                println!("disk: {} files, {} bytes", stats.disk.files, stats.disk.bytes);
                println!(
                    "network fetches: {}, coalesced: {}",
                    stats.coordinator.network_fetches, stats.coordinator.coalesced
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;

    init_logging(&config)?;

    info!(version = photocache::VERSION, "Starting photocache");

    let transport = Arc::new(HttpTransport::new(
        config.cache.request_timeout(),
        &config.cache.user_agent,
    )?);
    let service = ImageCacheService::new(&config.cache, transport).await?;

    let result = run(&service, args.command).await;

    service.shutdown().await;

    result
}
