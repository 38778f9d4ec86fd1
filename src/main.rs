//! Kagami Uploadr - upload-and-dispatch front end for media similarity search

use anyhow::Context;
use clap::{Parser, ValueEnum};
use kagami_uploadr::{config::Config, metrics::server::MetricsServer, server::Server};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

/// Kagami Uploadr - classify, store and dispatch media uploads
#[derive(Parser, Debug)]
#[command(name = "kagami-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value = "json")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);
    match args.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    }
    .map_err(|e| anyhow::anyhow!(e))?;

    info!("Starting Kagami Uploadr v{}", kagami_uploadr::VERSION);

    // Load configuration
    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    info!("Loaded configuration from {:?}", args.config);

    let mut metrics_server = MetricsServer::from_config(&config.metrics);
    if let Some(server) = metrics_server.as_mut() {
        server.start().await?;
    }

    // Start server
    let server = Server::new(config)?;
    server.run().await?;

    if let Some(mut server) = metrics_server {
        server.shutdown().await;
    }

    Ok(())
}
