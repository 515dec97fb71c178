//! CLI entry point for inkstore-admin: project blob maintenance tasks.
//!
//! Exit code 0 on full completion, 1 on unrecoverable error or when a
//! batch exhausts its retry ceiling.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use inkstore::config::load_config;
use inkstore::hash::hash_from_stream;
use inkstore::maintenance::{run_batches, BatchOptions, BatchStats};
use inkstore::storage::persistor::GetOptions;
use inkstore::store::BlobStoreServices;
use inkstore::Blob;

#[derive(Parser)]
#[command(name = "inkstore-admin", about = "Inkstore blob maintenance tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy every blob of one project into another
    CopyProjectBlobs {
        #[arg(long, default_value = "inkstore.yaml")]
        config: PathBuf,
        /// Source project id
        #[arg(long)]
        source: String,
        /// Target project id (may live in the other backend)
        #[arg(long)]
        target: String,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Delete all blob metadata and objects for a project
    DeleteProjectBlobs {
        #[arg(long, default_value = "inkstore.yaml")]
        config: PathBuf,
        #[arg(long)]
        project: String,
    },
    /// Re-hash stored blobs across a numeric project id range and fail
    /// on any metadata/storage disagreement
    VerifyBlobs {
        #[arg(long, default_value = "inkstore.yaml")]
        config: PathBuf,
        /// First project id in the range (inclusive)
        #[arg(long)]
        start: i64,
        /// Last project id in the range (inclusive)
        #[arg(long)]
        end: i64,
        #[arg(long)]
        batch_size: Option<u32>,
        #[arg(long)]
        concurrency: Option<usize>,
        /// Record the last completed batch boundary here for resumption
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let rc = match run(cli.command).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {err:#}");
            1
        }
    };
    std::process::exit(rc);
}

async fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::CopyProjectBlobs {
            config,
            source,
            target,
            concurrency,
        } => {
            let config = load_config(&config)?;
            let concurrency = concurrency.unwrap_or(config.batch.concurrency);
            let retry_limit = config.batch.retry_limit;
            let retry_delay = std::time::Duration::from_millis(config.batch.retry_delay_ms);
            let services = BlobStoreServices::open(&config)?;
            copy_project_blobs(services, &source, &target, concurrency, retry_limit, retry_delay)
                .await
        }
        Commands::DeleteProjectBlobs { config, project } => {
            let config = load_config(&config)?;
            let services = BlobStoreServices::open(&config)?;
            services.blob_store(&project)?.delete_blobs().await?;
            info!("deleted all blobs for project {}", project);
            Ok(())
        }
        Commands::VerifyBlobs {
            config,
            start,
            end,
            batch_size,
            concurrency,
            checkpoint,
        } => {
            let config = load_config(&config)?;
            let mut opts = BatchOptions::from_config(&config.batch);
            if let Some(batch_size) = batch_size {
                opts.batch_size = batch_size;
            }
            if let Some(concurrency) = concurrency {
                opts.concurrency = concurrency;
            }
            opts.checkpoint_path = checkpoint;
            let services = BlobStoreServices::open(&config)?;
            let stats = verify_blobs(services, start, end, &opts).await?;
            println!("{}", serde_json::to_string(&stats)?);
            Ok(())
        }
    }
}

/// Copy all of `source`'s blobs into `target` with bounded concurrency.
/// Each blob is retried individually up to the retry ceiling before the
/// whole task fails.
async fn copy_project_blobs(
    services: Arc<BlobStoreServices>,
    source: &str,
    target: &str,
    concurrency: usize,
    retry_limit: u32,
    retry_delay: std::time::Duration,
) -> anyhow::Result<()> {
    let store = services.blob_store(source)?;
    let blobs = store.get_project_blobs().await?;
    let total = blobs.len();
    info!("copying {} blobs from {} to {}", total, source, target);

    let mut join_set: JoinSet<anyhow::Result<()>> = JoinSet::new();
    for blob in blobs {
        while join_set.len() >= concurrency.max(1) {
            join_set
                .join_next()
                .await
                .expect("join set not empty")??;
        }
        let services = services.clone();
        let source = source.to_string();
        let target = target.to_string();
        join_set.spawn(async move {
            copy_one_blob(&services, &source, &target, &blob, retry_limit, retry_delay).await
        });
    }
    while let Some(joined) = join_set.join_next().await {
        joined??;
    }

    info!("copied {} blobs from {} to {}", total, source, target);
    Ok(())
}

async fn copy_one_blob(
    services: &Arc<BlobStoreServices>,
    source: &str,
    target: &str,
    blob: &Blob,
    retry_limit: u32,
    retry_delay: std::time::Duration,
) -> anyhow::Result<()> {
    let store = services.blob_store(source)?;
    for attempt in 0..retry_limit {
        match store.copy_blob(blob, target).await {
            Ok(()) => return Ok(()),
            // A missing source object will not appear on retry.
            Err(err) if err.is_not_found() => return Err(err.into()),
            Err(err) => {
                warn!(
                    "failed to copy blob {} (attempt {}/{}): {err:#}",
                    blob.hash(),
                    attempt + 1,
                    retry_limit
                );
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
    store.copy_blob(blob, target).await?;
    Ok(())
}

/// Verify that stored bytes still match recorded metadata for every
/// blob of every project in `start..=end`.
async fn verify_blobs(
    services: Arc<BlobStoreServices>,
    start: i64,
    end: i64,
    opts: &BatchOptions,
) -> anyhow::Result<BatchStats> {
    run_batches(start, end, opts, move |project_id| {
        let services = services.clone();
        async move {
            let store = services.blob_store(&project_id.to_string())?;
            for blob in store.get_project_blobs().await? {
                let stream = store.get_stream(blob.hash(), GetOptions::default()).await?;
                let rehashed = hash_from_stream(blob.byte_length(), stream).await?;
                if rehashed != blob.hash() {
                    // Never silently corrected; halt this unit with full
                    // identifying context for manual follow-up.
                    error!(
                        "blob content mismatch: project={} hash={} rehashed={}",
                        project_id,
                        blob.hash(),
                        rehashed
                    );
                    anyhow::bail!(
                        "blob content mismatch in project {} for hash {}",
                        project_id,
                        blob.hash()
                    );
                }
            }
            Ok(())
        }
    })
    .await
}
