//! Intake pipeline server binary
//!
//! Run with: cargo run -p intake-pipeline --bin intake-pipeline-server

use intake_pipeline::{config::AppConfig, server::IntakeServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "intake_pipeline=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Default provider: {}", config.providers.default_provider);
    tracing::info!(
        "  - Providers: {}",
        config.providers.entries.keys().cloned().collect::<Vec<_>>().join(", ")
    );
    tracing::info!("  - Sink: {:?}", config.sink.backend);
    tracing::info!("  - Staging: {}", config.media.work_dir.display());
    tracing::info!(
        "  - Chunking: {} chars, {} overlap",
        config.chunking.chunk_size,
        config.chunking.overlap
    );

    let media = intake_pipeline::media::MediaToolkit::new(config.media.clone());
    if let Err(e) = media.check_available() {
        tracing::warn!("Video workflows will fail until ffmpeg is installed: {}", e);
    }

    let server = IntakeServer::new(config)?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  API Info: http://{}/api/info", server.address());
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
