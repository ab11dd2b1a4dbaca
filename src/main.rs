use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ragingest::{
    api, config,
    dispatch::{Dispatcher, Submission},
    logging,
    processing::{IngestApi, IngestService, IngestionPipeline, ProcessingOptions},
    tasks::{SqliteTaskStore, TaskManager},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(name = "ragingest", about = "Document ingestion pipeline for retrieval")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP upload service.
    Serve,
    /// Upload and index one local file inline.
    Ingest {
        path: PathBuf,
        #[arg(long)]
        user: String,
        #[arg(long)]
        structured_json: bool,
    },
    /// Fail tasks stuck in `processing`.
    Sweep {
        /// Age threshold; defaults to TASK_STALE_AFTER_SECS.
        #[arg(long)]
        older_than_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::init_config().context("Failed to load configuration")?;
    logging::init_tracing("info");

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Ingest {
            path,
            user,
            structured_json,
        } => ingest(config, path, &user, structured_json).await,
        Command::Sweep { older_than_secs } => sweep(config, older_than_secs).await,
    }
}

async fn serve(config: &'static config::Config) -> Result<()> {
    let service = IngestService::from_config(config)
        .await
        .context("Failed to initialise ingestion pipeline")?;
    let app = api::create_router(Arc::new(service), config.file_size_limit);

    let (listener, port) = bind_listener(config.server_port)
        .await
        .context("Failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

async fn ingest(
    config: &config::Config,
    path: PathBuf,
    user: &str,
    structured_json: bool,
) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("{} has no file name", path.display()))?
        .to_string();
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let pipeline = Arc::new(IngestionPipeline::from_config(config).await?);
    let service = IngestService::new(Arc::clone(&pipeline), Dispatcher::Inline(pipeline));
    let options = ProcessingOptions { structured_json };

    let receipt = service.upload(user, &file_name, bytes, options).await?;
    if let Submission::Completed(outcome) = receipt.submission {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }
    Ok(())
}

async fn sweep(config: &config::Config, older_than_secs: Option<u64>) -> Result<()> {
    let max_age = match older_than_secs {
        Some(secs) => Duration::from_secs(secs),
        None => match config.task_stale_after {
            Some(max_age) => max_age,
            None => bail!("pass --older-than-secs or set TASK_STALE_AFTER_SECS"),
        },
    };
    let store = SqliteTaskStore::open(&config.database_path)?;
    let swept = TaskManager::new(Arc::new(store)).sweep_stale(max_age).await?;
    println!("failed {} stale task(s)", swept.len());
    Ok(())
}

async fn bind_listener(configured: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = configured {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}
