//! kurier-agent - telemetry delivery agent
//!
//! Reads telemetry records from a JSONL spool file and delivers them in
//! batches to the configured collection endpoint, with retry backoff and
//! an offline store that carries undelivered records across runs.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Offline store: $XDG_DATA_HOME/kurier/offline.db (~/.local/share/kurier/offline.db)
//! - Logs: $XDG_STATE_HOME/kurier/kurier.log (~/.local/state/kurier/kurier.log)
//! - Config: $XDG_CONFIG_HOME/kurier/config.toml (~/.config/kurier/config.toml)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kurier_core::offline::{OfflineStore, OFFLINE_KEY};
use kurier_core::storage::{SqliteStore, StorageBackend};
use kurier_core::transport::{HttpPostTransport, RequestTransport};
use kurier_core::types::{FlushTrigger, LifecycleSignal, TelemetryRecord};
use kurier_core::{Config, DeliveryManager, TelemetrySender};

#[derive(Parser)]
#[command(name = "kurier-agent")]
#[command(about = "Deliver telemetry records to a collection endpoint")]
#[command(version)]
struct Args {
    /// Config file path (defaults to the XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show agent configuration and offline store status
    Status,

    /// Deliver records from a JSONL spool file
    Run {
        /// Spool file with one JSON record per line
        spool: PathBuf,

        /// Keep polling the spool for new records instead of one-shot
        #[arg(short, long)]
        follow: bool,

        /// Poll interval in milliseconds (only with --follow)
        #[arg(long, default_value = "1000")]
        poll: u64,
    },

    /// Attempt delivery of records left in the offline store
    Flush,

    /// Check whether the collection endpoint is reachable
    Check,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::load_from(path).context("failed to load configuration")?,
        None => Config::load().context("failed to load configuration")?,
    };

    // Initialize logging
    let _log_guard =
        kurier_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("kurier-agent starting");

    match args.command {
        Command::Status => cmd_status(&config),
        Command::Run { spool, follow, poll } => cmd_run(&config, &spool, follow, poll),
        Command::Flush => cmd_flush(&config),
        Command::Check => cmd_check(&config),
    }
}

/// Build the sender stack: SQLite offline store plus the HTTP transport.
///
/// The agent registers no beacon transport; teardown flushes fall through
/// to the offline store and return on the next run.
fn build_sender(config: &Config) -> Result<TelemetrySender> {
    let db_path = config.offline_db_path();
    tracing::info!(path = %db_path.display(), "Opening offline store");

    let store = SqliteStore::open(&db_path).context("failed to open offline store")?;
    store.migrate().context("failed to run store migrations")?;

    let http: Option<Box<dyn RequestTransport>> = match config.agent.endpoint_url.as_deref() {
        Some(endpoint) => {
            let transport = HttpPostTransport::new(
                endpoint,
                Duration::from_secs(config.delivery.request_timeout_secs),
            )
            .context("failed to create transport")?;
            Some(Box::new(transport))
        }
        None => None,
    };

    let app_id = config.agent.app_id.clone().unwrap_or_default();
    let delivery = DeliveryManager::new(&config.delivery, app_id, None, http);
    let offline = OfflineStore::new(Box::new(store), config.offline.max_records);

    Ok(TelemetrySender::new(config, delivery, offline))
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("Kurier Agent Configuration");
    println!("==========================");
    println!();

    let agent = &config.agent;
    println!(
        "App ID:          {}",
        agent.app_id.as_deref().unwrap_or("<not set>")
    );
    println!(
        "Endpoint:        {}",
        agent.endpoint_url.as_deref().unwrap_or("<not set>")
    );

    let delivery = &config.delivery;
    println!("Batch Size:      {}", delivery.batch_size);
    println!("Batch Timeout:   {}ms", delivery.batch_timeout_ms);
    println!("Max Retries:     {}", delivery.max_retries);
    println!("Base Delay:      {}ms", delivery.base_retry_delay_ms);
    println!("Compression:     {}", delivery.compress);
    println!("Offline Cap:     {} records", config.offline.max_records);

    println!();
    if agent.is_ready() {
        println!("Status: Ready to deliver");
    } else {
        println!("Status: Not ready (missing app_id or endpoint)");
        println!();
        println!("Configure the agent in config.toml:");
        println!();
        println!("  [agent]");
        println!("  app_id = \"my-app\"");
        println!("  endpoint_url = \"https://collect.example.com/ingest\"");
    }

    let db_path = config.offline_db_path();
    if db_path.exists() {
        let store = SqliteStore::open(&db_path).context("failed to open offline store")?;
        store.migrate().context("failed to run store migrations")?;

        let pending = match store.read(OFFLINE_KEY)? {
            Some(bytes) => serde_json::from_slice::<Vec<TelemetryRecord>>(&bytes)
                .map(|records| records.len())
                .unwrap_or(0),
            None => 0,
        };

        println!();
        println!("Offline store:   {}", db_path.display());
        println!("Pending:         {} record(s)", pending);
    }

    Ok(())
}

fn cmd_run(config: &Config, spool: &Path, follow: bool, poll_ms: u64) -> Result<()> {
    if !config.agent.is_ready() {
        println!("Agent is not configured. Run 'status' for details.");
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    runtime.block_on(run_agent(config, spool, follow, poll_ms))
}

async fn run_agent(config: &Config, spool: &Path, follow: bool, poll_ms: u64) -> Result<()> {
    let sender = build_sender(config)?;
    let (handle, worker) = kurier_core::worker::channel(sender);
    let worker_task = tokio::spawn(worker.run());

    // Set up signal handler for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    println!("Spool: {}", spool.display());
    if follow {
        println!(
            "Follow mode active (poll every {}ms). Press Ctrl+C to stop.",
            poll_ms
        );
    }

    let mut offset = 0u64;
    let mut total = 0u64;

    loop {
        // In follow mode a writer may be mid-line; leave incomplete
        // trailing lines for the next poll.
        let (records, new_offset) = read_spool_from(spool, offset, follow)?;
        offset = new_offset;

        let read = records.len() as u64;
        for record in records {
            handle.record(record).await;
        }

        if read > 0 {
            total += read;
            if follow {
                let timestamp = chrono::Local::now().format("%H:%M:%S");
                println!("[{}] Read {} record(s) from spool", timestamp, read);
            }
        }

        if !follow || !running.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(poll_ms)).await;
    }

    // Teardown flush; anything undeliverable lands in the offline store
    handle.shutdown().await;
    worker_task.await.ok();

    println!("Spool read complete: {} record(s)", total);
    tracing::info!(records = total, "kurier-agent run complete");

    Ok(())
}

/// Read records appended to the spool file since `offset`.
///
/// Malformed lines are skipped with a warning. A shrunken file is treated
/// as rotation and read from the start.
fn read_spool_from(
    path: &Path,
    offset: u64,
    require_newline: bool,
) -> Result<(Vec<TelemetryRecord>, u64)> {
    use std::io::{BufRead, BufReader, Seek, SeekFrom};

    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), offset)),
        Err(e) => return Err(e).context("failed to open spool file"),
    };

    let len = file.metadata().context("failed to stat spool file")?.len();
    let mut offset = if len < offset { 0 } else { offset };
    if len == offset {
        return Ok((Vec::new(), offset));
    }

    let mut reader = BufReader::new(file);
    reader
        .seek(SeekFrom::Start(offset))
        .context("failed to seek spool file")?;

    let mut records = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .context("failed to read spool file")?;
        if read == 0 {
            break;
        }
        if require_newline && !line.ends_with('\n') {
            break;
        }
        offset += read as u64;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<TelemetryRecord>(trimmed) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed spool line");
            }
        }
    }

    Ok((records, offset))
}

fn cmd_flush(config: &Config) -> Result<()> {
    if !config.agent.is_ready() {
        println!("Agent is not configured. Run 'status' for details.");
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    runtime.block_on(flush_offline(config))
}

async fn flush_offline(config: &Config) -> Result<()> {
    let mut sender = build_sender(config)?;

    let restored = sender.restore_on_startup().await;
    if restored == 0 && sender.queued() == 0 {
        println!("No offline records to flush.");
        return Ok(());
    }

    println!("Flushing {} stored record(s)...", restored);
    sender.flush(FlushTrigger::Manual).await;

    // park anything undelivered back in the store
    if sender.queued() > 0 {
        sender.handle_signal(LifecycleSignal::Teardown).await;
    }

    let stats = sender.stats();
    if stats.delivered_records > 0 {
        println!("Delivered {} record(s)", stats.delivered_records);
    }
    let pending = sender.offline_pending();
    if pending > 0 {
        println!("{} record(s) still pending delivery", pending);
    }

    Ok(())
}

fn cmd_check(config: &Config) -> Result<()> {
    let Some(endpoint) = config.agent.endpoint_url.as_deref() else {
        println!("No endpoint configured. Run 'status' for details.");
        return Ok(());
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    let transport = HttpPostTransport::new(
        endpoint,
        Duration::from_secs(config.delivery.request_timeout_secs),
    )
    .context("failed to create transport")?;

    let reachable = runtime.block_on(transport.health_check())?;
    if reachable {
        println!("Endpoint is reachable: {}", endpoint);
    } else {
        println!("Endpoint is not reachable: {}", endpoint);
    }

    Ok(())
}
