use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use m3u8_recorder::{
    config::Config,
    database::Database,
    scheduler::{capture::FfmpegCapture, create_shutdown_channel, RecordingScheduler},
    web::WebServer,
};

#[derive(Parser)]
#[command(name = "m3u8-recorder")]
#[command(version = "0.1.0")]
#[command(about = "Self-hosted IPTV recording server with scheduled m3u8 stream capture")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("m3u8_recorder={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting m3u8-recorder v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration from specified file
    std::env::set_var("CONFIG_FILE", &cli.config);
    let mut config = Config::load()?;
    info!("Configuration loaded from: {}", cli.config);

    // Override config with CLI arguments
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }

    info!("Using database: {}", config.database.url);

    let database = Database::new(&config.database).await?;
    database.migrate().await?;
    info!("Database connection established and migrations applied");

    tokio::fs::create_dir_all(&config.storage.recordings_path).await?;

    let scheduler = RecordingScheduler::new(
        database.clone(),
        Arc::new(FfmpegCapture::new(config.scheduler.ffmpeg_command.clone())),
        &config.storage,
        &config.scheduler,
    );

    // Rows left in the recording state by a previous run have no live child
    // process behind them; settle them before the loop starts.
    scheduler.recover_orphaned_recordings().await?;

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let scheduler_task = tokio::spawn(scheduler.clone().run(shutdown_rx));
    info!("Recording scheduler initialized");

    let web_server = WebServer::new(config, database)?;
    info!(
        "Starting web server on {}:{}",
        web_server.host(),
        web_server.port()
    );

    web_server
        .serve_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    // Stop the scheduler and every capture process before exiting.
    let _ = shutdown_tx.send(());
    let _ = scheduler_task.await;

    Ok(())
}
