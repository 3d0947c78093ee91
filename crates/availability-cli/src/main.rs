//! `avail` CLI — manage availability blocks stored in a local JSON file.
//!
//! ## Usage
//!
//! ```sh
//! # Preview the occurrences a recurring request would produce
//! avail expand -i weekly.json
//!
//! # Create a block (or series) from a request on stdin
//! echo '{"userId":1,"startDate":"2025-01-06T09:00:00Z","endDate":"2025-01-06T17:00:00Z"}' | avail create
//!
//! # Move a block
//! avail update --id 3 -i patch.json
//!
//! # Delete one occurrence, or its whole series
//! avail delete --id 3
//! avail delete --id 3 --series
//!
//! # Probe for conflicts before submitting
//! avail check --user 1 --start 2025-01-06T12:00:00Z --end 2025-01-06T13:00:00Z
//!
//! # List a user's blocks
//! avail --store team.json list --user 1
//! ```
//!
//! Every command prints a `{"success": ..., "data"|"error": ...}` document and
//! exits with status 1 when `success` is false.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use availability_engine::mapping::BlockRow;
use availability_engine::{
    AvailabilityBlock, AvailabilityService, BlockId, BlockPatch, CreateBlockRequest, EngineConfig,
    InMemoryRepository, ServiceResponse, TracingPublisher, UserId,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "avail", version, about = "Availability block scheduling CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON file holding the stored blocks (created on first write)
    #[arg(long, global = true, default_value = "availability.json")]
    store: PathBuf,

    /// TOML settings file (defaults to ./availability.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the occurrences a create request would produce, without storing them
    Expand {
        /// Request file (reads from stdin if omitted)
        #[arg(short, long)]
        input: Option<String>,
    },
    /// Create a block or recurring series
    Create {
        /// Request file (reads from stdin if omitted)
        #[arg(short, long)]
        input: Option<String>,
    },
    /// Update a single block
    Update {
        #[arg(long)]
        id: i64,
        /// Patch file (reads from stdin if omitted)
        #[arg(short, long)]
        input: Option<String>,
    },
    /// Delete a block
    Delete {
        #[arg(long)]
        id: i64,
        /// Delete every block in the same recurring series
        #[arg(long)]
        series: bool,
    },
    /// Report blocks that would collide with an interval
    Check {
        #[arg(long)]
        user: i64,
        /// RFC 3339 start instant
        #[arg(long)]
        start: DateTime<Utc>,
        /// RFC 3339 end instant
        #[arg(long)]
        end: DateTime<Utc>,
        /// Block id to ignore (the block being edited)
        #[arg(long)]
        exclude: Option<i64>,
    },
    /// List a user's blocks
    List {
        #[arg(long)]
        user: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config =
        EngineConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.log_level);

    let repo = Arc::new(load_store(&cli.store)?);
    let service = AvailabilityService::new(repo.clone(), Arc::new(TracingPublisher), config)
        .context("Failed to start availability service")?;

    let (success, writes) = match cli.command {
        Commands::Expand { input } => {
            let request: CreateBlockRequest = parse_input(input.as_deref())?;
            (emit(ServiceResponse::from(service.preview_occurrences(&request)))?, false)
        }
        Commands::Create { input } => {
            let request: CreateBlockRequest = parse_input(input.as_deref())?;
            (emit(ServiceResponse::from(service.create_availability_block(request).await))?, true)
        }
        Commands::Update { id, input } => {
            let patch: BlockPatch = parse_input(input.as_deref())?;
            (
                emit(ServiceResponse::from(
                    service.update_availability_block(BlockId(id), patch).await,
                ))?,
                true,
            )
        }
        Commands::Delete { id, series } => (
            emit(ServiceResponse::from(
                service.delete_availability_block(BlockId(id), series).await,
            ))?,
            true,
        ),
        Commands::Check {
            user,
            start,
            end,
            exclude,
        } => (
            emit(ServiceResponse::from(
                service
                    .check_for_conflicts(UserId(user), start, end, exclude.map(BlockId))
                    .await,
            ))?,
            false,
        ),
        Commands::List { user } => (
            emit(ServiceResponse::from(
                service.list_availability_blocks(UserId(user)).await,
            ))?,
            false,
        ),
    };

    if success && writes {
        save_store(&cli.store, repo.snapshot().await)?;
    }
    if !success {
        process::exit(1);
    }
    Ok(())
}

/// `RUST_LOG` wins over the configured level. Logs go to stderr so stdout
/// stays machine-readable.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Print a response as pretty JSON and report whether it succeeded.
fn emit<T: Serialize>(response: ServiceResponse<T>) -> Result<bool> {
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(response.success)
}

fn load_store(path: &Path) -> Result<InMemoryRepository> {
    if !path.exists() {
        tracing::debug!(store = %path.display(), "Store does not exist yet, starting empty");
        return Ok(InMemoryRepository::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read store: {}", path.display()))?;
    let rows: Vec<BlockRow> = serde_json::from_str(&raw)
        .with_context(|| format!("Store is not valid JSON: {}", path.display()))?;
    let blocks = rows
        .into_iter()
        .map(AvailabilityBlock::try_from)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Store contains an invalid block: {}", path.display()))?;
    Ok(InMemoryRepository::from_blocks(blocks))
}

fn save_store(path: &Path, blocks: Vec<AvailabilityBlock>) -> Result<()> {
    let rows: Vec<BlockRow> = blocks.into_iter().map(BlockRow::from).collect();
    let json = serde_json::to_string_pretty(&rows)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write store: {}", path.display()))
}

fn parse_input<T: serde::de::DeserializeOwned>(path: Option<&str>) -> Result<T> {
    let raw = read_input(path)?;
    serde_json::from_str(&raw).context("Input is not a valid request document")
}

fn read_input(path: Option<&str>) -> Result<String> {
    match path {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path))
        }
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read from stdin")?;
            Ok(buf)
        }
    }
}
