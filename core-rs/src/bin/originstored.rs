//! originstored - Origin storage coordinator CLI
//!
//! `serve` runs the coordinator with stdin/stdout as a single client
//! connection (one JSON request per line in, one JSON reply per line out).
//! The other subcommands issue one request, print the reply and exit.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use originstore_core::config::{ServiceConfig, DEFAULT_LOG_LEVEL};
use originstore_core::{CoordinatorService, Operation, RawRequest, ReplyPayload, SecurityOrigin, DEFAULT_STORAGE_DIRECTORY};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "originstored")]
#[command(version)]
#[command(about = "Per-origin database storage coordinator", long_about = None)]
struct Cli {
    /// YAML config file
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Storage directory (overrides the config file)
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (overrides the config file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Seconds to wait for a reply
    #[arg(long, default_value_t = 30, global = true)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator, reading JSON requests from stdin
    Serve,
    /// List origins with stored databases
    Origins,
    /// Delete every database of one origin
    DeleteOrigin {
        /// Origin URL, e.g. https://example.com
        origin: String,
    },
    /// Delete databases last modified within [start, end]
    DeleteBetween {
        /// RFC 3339 timestamp
        start: DateTime<Utc>,
        /// RFC 3339 timestamp
        end: DateTime<Utc>,
    },
    /// Delete every database
    DeleteAll,
    /// Create a directory below the storage directory
    EnsurePath {
        /// Path relative to the storage directory
        path: PathBuf,
    },
    /// Print the effective configuration as YAML
    ShowConfig,
}

fn load_config(cli: &Cli) -> Result<ServiceConfig> {
    let mut config = match &cli.config {
        Some(path) => ServiceConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => ServiceConfig::new(DEFAULT_STORAGE_DIRECTORY),
    };
    if let Some(dir) = &cli.storage_dir {
        config.storage_directory = dir.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Send one operation on a fresh connection and wait for its reply.
async fn request(service: &CoordinatorService, operation: Operation, timeout: Duration) -> Result<ReplyPayload> {
    let mut client = service.attach();
    service.on_request_arrived(client.id(), operation.to_request(1))?;

    let reply = tokio::time::timeout(timeout, client.next_reply())
        .await
        .map_err(|_| anyhow!("no reply within {}s", timeout.as_secs()))?
        .ok_or_else(|| anyhow!("connection closed before a reply arrived"))?;

    service.on_connection_closed(client.id());
    Ok(reply.payload)
}

fn print_payload(payload: &ReplyPayload) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(payload)?);
    if let ReplyPayload::Failed { message } = payload {
        bail!("request failed: {}", message);
    }
    Ok(())
}

/// Single stdin/stdout connection until EOF.
async fn serve(service: &CoordinatorService) -> Result<()> {
    let mut client = service.attach();
    let connection = client.id();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(reply) = client.next_reply().await {
            let mut line = match serde_json::to_vec(&reply) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "failed to encode reply");
                    continue;
                }
            };
            line.push(b'\n');
            if stdout.write_all(&line).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    info!(%connection, "serving requests from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: RawRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!(%connection, error = %e, "malformed request line; closing connection");
                break;
            }
        };
        if let Err(e) = service.on_request_arrived(connection, request) {
            if e.is_protocol_violation() {
                warn!(%connection, error = %e, "protocol violation; closing connection");
                break;
            }
            warn!(%connection, error = %e, "request not accepted");
        }
    }

    // Let queued requests answer before tearing the connection down
    service.flushed().await?;
    service.on_connection_closed(connection);
    if let Err(e) = writer.await {
        warn!(error = %e, "reply writer failed");
    }
    debug!("stdin closed");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config.logging.level);

    if let Commands::ShowConfig = cli.command {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let timeout = Duration::from_secs(cli.timeout);
    let service = CoordinatorService::start(config)?;

    let outcome = match cli.command {
        Commands::Serve => serve(&service).await,
        Commands::Origins => request(&service, Operation::EnumerateOrigins, timeout)
            .await
            .and_then(|payload| print_payload(&payload)),
        Commands::DeleteOrigin { origin } => {
            let origin = SecurityOrigin::parse(&origin)?;
            request(&service, Operation::DeleteForOrigin { origin }, timeout)
                .await
                .and_then(|payload| print_payload(&payload))
        }
        Commands::DeleteBetween { start, end } => {
            if start > end {
                bail!("start {} is after end {}", start, end);
            }
            request(&service, Operation::DeleteModifiedBetween { start, end }, timeout)
                .await
                .and_then(|payload| print_payload(&payload))
        }
        Commands::DeleteAll => request(&service, Operation::DeleteAll, timeout)
            .await
            .and_then(|payload| print_payload(&payload)),
        Commands::EnsurePath { path } => {
            service.ensure_relative_path_exists(&path)?;
            service.flushed().await?;
            println!("{}", service.absolute_path(&path)?.display());
            Ok(())
        }
        Commands::ShowConfig => Ok(()),
    };

    service.shutdown()?;
    outcome
}
