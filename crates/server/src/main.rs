use anyhow::{Context, Result};
use clap::Parser;
use color_eyre::config::HookBuilder;
use s3gate::logging::init_tracing;
use s3gate::{router, AppState};
use s3gate_core::{load_config, validate_config, FileGateway, Profile, StorageBackend, StorageClient};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// s3gate - HTTP gateway for encrypted uploads to S3-compatible storage
#[derive(Parser, Debug)]
#[command(name = "s3gate")]
#[command(version)]
#[command(about = "HTTP gateway for encrypted, size-adaptive transfers to S3-compatible storage", long_about = None)]
struct Cli {
    /// Directory holding `<environment>-config.toml`
    #[arg(short, long, default_value = "./config")]
    config_dir: PathBuf,

    /// Deployment profile: dev, stage or prod
    #[arg(short, long, env = "SERVER_ENVIRONMENT")]
    environment: String,

    /// Draw a progress bar for every upload
    #[arg(short, long)]
    progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup error handling
    if let Err(e) = HookBuilder::default().install() {
        eprintln!("Warning: Failed to install error handler: {}", e);
    }

    let cli = Cli::parse();

    let profile: Profile = cli.environment.parse()?;
    let config = load_config(&cli.config_dir, profile)
        .with_context(|| format!("failed to load the {} configuration", profile))?;
    validate_config(&config, profile).context("invalid configuration")?;

    init_tracing(&config.logging.clone().unwrap_or_default())?;
    info!(
        profile = %profile,
        endpoint = %config.storage.endpoint_url(),
        bucket = %config.storage.bucket,
        multipart = config.storage.enable_multipart_upload,
        chunk_size_mib = config.storage.file_chunk_size,
        "starting s3gate"
    );

    let backend: Arc<dyn StorageBackend> =
        Arc::new(StorageClient::new(&config.storage, &config.advanced));
    let gateway = FileGateway::new(&config, backend);

    // Halt early when the store cannot be reached
    let bucket = gateway.default_bucket().to_string();
    let bucket_exists = gateway
        .buckets()
        .exists(&bucket)
        .await
        .context("object store is unreachable")?;

    if !bucket_exists {
        warn!(bucket = %bucket, "configured bucket does not exist");
    } else if config.advanced.default_bucket_encryption {
        gateway
            .buckets()
            .enable_default_encryption(&bucket)
            .await
            .context("failed to enable default bucket encryption")?;
    }

    let state = Arc::new(AppState {
        gateway,
        show_progress: cli.progress,
    });
    let app = router(state, &config.server);

    let listener = TcpListener::bind(config.server.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_address()))?;
    info!(
        address = %listener.local_addr()?,
        protocol = %config.server.protocol,
        base_path = %config.server.base_path(),
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for the shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal, draining connections");
}
