//! Pipeline binary: runs the workers and the sync scheduler, plus small
//! operator commands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::JobScheduler;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keepsake_core::common::RawItemId;
use keepsake_core::config::Config;
use keepsake_core::domains::accounts::TokenManager;
use keepsake_core::domains::ingest::extractors::ExtractorRegistry;
use keepsake_core::domains::ingest::{ExtractionWorker, RawItem};
use keepsake_core::domains::media::MediaWorker;
use keepsake_core::domains::posts::normalizers::NormalizerRegistry;
use keepsake_core::domains::posts::NormalizationWorker;
use keepsake_core::domains::sync::{SyncConfig, SyncScheduler};
use keepsake_core::kernel::{
    run_worker, FsObjectStorage, HttpMediaFetcher, HttpOAuthClient, HttpPlatformGateway, Kernel,
    PassthroughCipher, WorkerConfig,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "pipeline")]
#[command(about = "Keepsake ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run migrations, then all workers and the sync scheduler
    Run,

    /// Run database migrations and exit
    Migrate,

    /// Requeue a dead-lettered raw item for reprocessing
    Requeue { item_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,keepsake_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    match cli.command {
        Commands::Migrate => {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;
            tracing::info!("Migrations complete");
            Ok(())
        }
        Commands::Requeue { item_id } => {
            let item_id: RawItemId = item_id.parse().context("Invalid raw item id")?;
            match RawItem::requeue_dead_letter(item_id, &pool).await? {
                Some(new_id) => {
                    tracing::info!(%item_id, %new_id, "requeued dead-lettered item");
                    Ok(())
                }
                None => anyhow::bail!("item {item_id} is not dead-lettered"),
            }
        }
        Commands::Run => run(config, pool).await,
    }
}

async fn run(config: Config, pool: sqlx::PgPool) -> Result<()> {
    tracing::info!("Starting Keepsake ingestion pipeline");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let kernel = Arc::new(Kernel::new(
        pool,
        Arc::new(HttpPlatformGateway::new(HTTP_TIMEOUT)?),
        Arc::new(HttpOAuthClient::new(
            HTTP_TIMEOUT,
            config.strava_client_id.clone(),
            config.strava_client_secret.clone(),
        )?),
        Arc::new(HttpMediaFetcher::new(HTTP_TIMEOUT)?),
        Arc::new(FsObjectStorage::new(config.media_root.clone())),
        Arc::new(PassthroughCipher),
    ));
    let tokens = Arc::new(TokenManager::new(kernel.clone()));

    let shutdown = CancellationToken::new();

    // Workers
    let extraction = Arc::new(ExtractionWorker::new(
        kernel.clone(),
        Arc::new(ExtractorRegistry::with_defaults(
            kernel.clone(),
            tokens.clone(),
        )),
    ));
    let normalization = Arc::new(NormalizationWorker::new(
        kernel.clone(),
        Arc::new(NormalizerRegistry::with_defaults()),
    ));
    let media = Arc::new(MediaWorker::new(kernel.clone()));

    let mut handles = Vec::new();
    handles.push(tokio::spawn(run_worker(
        extraction,
        WorkerConfig::with_worker_id("extraction-1"),
        shutdown.clone(),
    )));
    handles.push(tokio::spawn(run_worker(
        normalization,
        WorkerConfig::with_worker_id("normalization-1"),
        shutdown.clone(),
    )));
    handles.push(tokio::spawn(run_worker(
        media,
        WorkerConfig::with_worker_id("media-1"),
        shutdown.clone(),
    )));

    // Sync scheduler
    let sync = Arc::new(SyncScheduler::new(
        kernel.clone(),
        tokens.clone(),
        SyncConfig {
            sync_interval: chrono::Duration::hours(config.sync_interval_hours),
            max_pages_per_sync: config.max_pages_per_sync,
            cron: config.sync_cron.clone(),
        },
    ));
    let scheduler = JobScheduler::new()
        .await
        .context("Failed to build job scheduler")?;
    sync.register(&scheduler).await?;
    scheduler
        .start()
        .await
        .context("Failed to start job scheduler")?;

    tracing::info!("Pipeline running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutting down");
    shutdown.cancel();
    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}
