use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use docflow::config::Config;
use docflow::db::{open_store, Store};
use docflow::ingestion::{BatchIngester, DocumentIngestionService};
use docflow::models::TaskType;
use docflow::queue::{EnqueueOptions, QueueWorker, TaskQueue, TextExtractionHandler};
use docflow::storage::open_storage;

#[derive(Parser)]
#[command(name = "docflow", version, about = "Document storage and text extraction pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the queue worker until Ctrl-C
    Worker,
    /// Create the entity store schema
    Migrate,
    /// Queue text extraction for a stored document
    Enqueue {
        document_id: i64,
        #[arg(long, default_value_t = 5)]
        priority: i32,
    },
    /// Print queue statistics
    Stats,
    /// Re-queue items whose worker stopped responding
    Recover,
    /// Delete finished queue items older than the given number of days
    Purge {
        #[arg(long, default_value_t = 7)]
        days: u64,
    },
    /// Import every file under a directory for one owner
    Ingest {
        directory: PathBuf,
        #[arg(long, short = 'u')]
        user: String,
        /// Process queued extraction right away instead of leaving it for a worker
        #[arg(long)]
        process: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,docflow=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let store = open_store(&config).await?;
    store.migrate().await.context("failed to initialise entity store schema")?;

    let result = run(cli.command, &config, &store).await;
    store.shutdown().await;
    result
}

async fn run(command: Command, config: &Config, store: &Store) -> Result<()> {
    let queue = TaskQueue::from_config(store.clone(), config);

    match command {
        Command::Migrate => {
            info!("Schema is up to date for {} backend", store.backend_name());
        }
        Command::Enqueue { document_id, priority } => {
            let item = queue
                .enqueue(
                    document_id,
                    TaskType::ExtractText,
                    EnqueueOptions::default().with_priority(priority),
                )
                .await?;
            println!("Queued item {} for document {}", item.id, document_id);
        }
        Command::Stats => {
            let stats = queue.stats().await?;
            println!("Ready:      {}", stats.ready_count);
            println!("Scheduled:  {}", stats.scheduled_count);
            println!("Processing: {}", stats.processing_count);
            println!("Done:       {}", stats.done_count);
            println!("Failed:     {}", stats.failed_count);
            println!("Total:      {}", stats.total());
        }
        Command::Recover => {
            let recovered = queue.recover_stale_claims(config.stale_claim_age()).await?;
            println!("Recovered {} stale items", recovered);
        }
        Command::Purge { days } => {
            let purged = queue.purge_done(Duration::from_secs(days.saturating_mul(24 * 60 * 60))).await?;
            println!("Purged {} finished items", purged);
        }
        Command::Worker => {
            let storage = open_storage(config).await?;
            let handler = Arc::new(TextExtractionHandler::new(store.clone(), storage.clone()));
            let worker = Arc::new(QueueWorker::from_config(queue, handler, config));

            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => info!("Shutdown requested"),
                    Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
                }
                signal_token.cancel();
            });

            worker.run(shutdown).await?;
            storage.shutdown();
        }
        Command::Ingest {
            directory,
            user,
            process,
        } => {
            let storage = open_storage(config).await?;
            let service = DocumentIngestionService::new(store.clone(), storage.clone(), queue.clone())
                .with_max_file_size(config.max_file_size_bytes());

            let summary = BatchIngester::new(service).ingest_directory(&directory, &user).await?;
            println!(
                "Discovered {}, created {}, skipped {}, failed {}",
                summary.discovered, summary.created, summary.skipped, summary.failed
            );

            if process {
                let handler = Arc::new(TextExtractionHandler::new(store.clone(), storage.clone()));
                let processed = QueueWorker::from_config(queue, handler, config).drain().await?;
                println!("Processed {} queue items", processed);
            }
            storage.shutdown();
        }
    }

    Ok(())
}
