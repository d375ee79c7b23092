//! partwise - resumable multipart uploads to an object store

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use partwise::config::{retention_window, Config, ConfigOptions};
use partwise::ledger::{FileLedgerStore, UploadIdentity, UploadLedger, DEFAULT_RETENTION_DAYS};
use partwise::orchestrator::{UploadOrchestrator, UploadOutcome, UploadRequest};
use partwise::progress::{ProgressTracker, TransferEvent, TransferStatus};
use partwise::source::{guess_content_type, FileSource};
use partwise::store::HttpObjectStore;
use partwise::utils::state_dir::get_ledger_file_path;
use partwise::UploadError;

#[derive(Parser, Debug)]
#[command(name = "partwise")]
#[command(about = "Resumable multipart uploads to an object store")]
struct Args {
    /// API base URL for the object-store gateway
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Authentication token
    #[arg(long, global = true)]
    token: Option<String>,

    /// Path of the upload ledger (default: .partwise/uploads.json)
    #[arg(long, global = true)]
    ledger: Option<PathBuf>,

    /// Days before an unfinished upload is forgotten
    #[arg(long, global = true)]
    retention_days: Option<i64>,

    /// Part size in bytes
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Attempts per part
    #[arg(long)]
    part_max_attempts: Option<u32>,

    /// Attempts for create/abort calls
    #[arg(long)]
    max_attempts: Option<u32>,

    /// First retry delay in milliseconds
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Upper bound on the retry delay in milliseconds
    #[arg(long)]
    max_retry_delay_ms: Option<u64>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload files, resuming any interrupted uploads
    Upload {
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Target bucket
        #[arg(long)]
        bucket: String,

        /// Key prefix prepended to each file name
        #[arg(long, default_value = "")]
        prefix: String,

        /// Files uploaded at the same time
        #[arg(long, default_value_t = 2)]
        concurrency: usize,
    },
    /// List unfinished uploads that can be resumed
    Pending,
    /// Forget unfinished uploads older than the retention window
    Sweep,
    /// Forget one unfinished upload
    Forget {
        #[arg(long)]
        bucket: String,

        #[arg(long)]
        key: String,

        /// File size in bytes
        #[arg(long)]
        size: u64,

        /// Abort the session on the object store as well
        #[arg(long)]
        abort: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays clean for listings
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let result = match &args.command {
        Command::Upload {
            files,
            bucket,
            prefix,
            concurrency,
        } => run_upload(&args, files, bucket, prefix, *concurrency).await,
        Command::Pending => run_pending(&args),
        Command::Sweep => run_sweep(&args),
        Command::Forget {
            bucket,
            key,
            size,
            abort,
        } => run_forget(&args, UploadIdentity::new(bucket, key, *size), *abort).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn build_config(args: &Args) -> Result<Arc<Config>> {
    let base_url = args
        .base_url
        .clone()
        .ok_or_else(|| anyhow!("--base-url is required"))?;
    let token = args
        .token
        .clone()
        .ok_or_else(|| anyhow!("--token is required"))?;

    Config::new(
        base_url,
        token,
        ConfigOptions {
            chunk_size: args.chunk_size,
            part_max_attempts: args.part_max_attempts,
            max_attempts: args.max_attempts,
            initial_delay_ms: args.retry_delay_ms,
            max_delay_ms: args.max_retry_delay_ms,
            backoff_factor: None,
            retention_days: args.retention_days,
            request_timeout_secs: args.timeout_secs,
            ledger_path: Some(ledger_path(args)?),
        },
    )
}

fn ledger_path(args: &Args) -> Result<PathBuf> {
    match &args.ledger {
        Some(path) => Ok(path.clone()),
        None => Ok(get_ledger_file_path(&std::env::current_dir()?)),
    }
}

fn open_ledger(path: &Path, retention: chrono::Duration) -> Arc<UploadLedger> {
    let store = Arc::new(FileLedgerStore::new(path));
    Arc::new(UploadLedger::open(store, retention))
}

/// Ledger for the commands that never talk to the server
fn open_local_ledger(args: &Args) -> Result<Arc<UploadLedger>> {
    let retention = retention_window(args.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS))?;
    Ok(open_ledger(&ledger_path(args)?, retention))
}

fn build_orchestrator(config: &Config) -> Result<UploadOrchestrator> {
    let store = Arc::new(HttpObjectStore::new(config)?);
    let ledger = open_ledger(&config.ledger_path, config.retention()?);
    let removed = ledger.sweep_stale();
    if removed > 0 {
        info!("Forgot {} stale upload(s)", removed);
    }
    Ok(UploadOrchestrator::from_config(
        config,
        store,
        ledger,
        Arc::new(ProgressTracker::new()),
    ))
}

async fn run_upload(
    args: &Args,
    files: &[PathBuf],
    bucket: &str,
    prefix: &str,
    concurrency: usize,
) -> Result<()> {
    let config = build_config(args)?;
    let orchestrator = build_orchestrator(&config)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting uploads");
            ctrl_c.cancel();
        }
    });

    let reporter = tokio::spawn(report_progress(orchestrator.progress().clone()));

    info!(
        "Uploading {} file(s) to {} with concurrency {}",
        files.len(),
        bucket,
        concurrency
    );

    let results: Vec<(PathBuf, Result<UploadOutcome>)> = stream::iter(files.iter().cloned())
        .map(|path| {
            let orchestrator = &orchestrator;
            let cancel = &cancel;
            let chunk_size = config.chunk_size;
            async move {
                let result =
                    upload_file(orchestrator, bucket, prefix, &path, chunk_size, cancel).await;
                (path, result)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    reporter.abort();

    let mut failed = 0;
    for (path, result) in &results {
        match result {
            Ok(outcome) => println!(
                "{}\t{}/{}\t{}{}",
                path.display(),
                outcome.identity.namespace,
                outcome.identity.key,
                outcome.object.etag.as_deref().unwrap_or("-"),
                if outcome.resumed { "\t(resumed)" } else { "" }
            ),
            Err(e) => {
                failed += 1;
                error!("{}: {:#}", path.display(), e);
            }
        }
    }

    if failed > 0 {
        return Err(anyhow!("{} of {} upload(s) failed", failed, results.len()));
    }
    Ok(())
}

async fn upload_file(
    orchestrator: &UploadOrchestrator,
    bucket: &str,
    prefix: &str,
    path: &Path,
    chunk_size: u64,
    cancel: &CancellationToken,
) -> Result<UploadOutcome> {
    let source = FileSource::open(path).await?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("invalid file name: {}", path.display()))?;

    let request = UploadRequest::new(bucket, object_key(prefix, file_name))
        .with_content_type(guess_content_type(path))
        .with_chunk_size(chunk_size);

    match orchestrator.upload(&request, &source, cancel).await {
        Ok(outcome) => Ok(outcome),
        Err(UploadError::Cancelled) => Err(anyhow!("cancelled")),
        Err(e) => Err(e.into()),
    }
}

fn object_key(prefix: &str, file_name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        file_name.to_string()
    } else {
        format!("{}/{}", prefix, file_name)
    }
}

/// Log each transfer roughly every 10%
async fn report_progress(progress: Arc<ProgressTracker>) {
    let mut events = progress.subscribe();
    let mut last_reported = std::collections::HashMap::new();

    while let Ok(event) = events.recv().await {
        let TransferEvent::Updated(state) = event else {
            continue;
        };
        if state.status != TransferStatus::Active {
            continue;
        }
        let bucket = (state.progress / 10.0).floor() as u32;
        if last_reported.insert(state.id.clone(), bucket) == Some(bucket) {
            continue;
        }
        let eta = state
            .time_remaining_ms
            .map(|ms| format!("{:.0}s", ms / 1000.0))
            .unwrap_or_else(|| "-".to_string());
        info!(
            "{}: {:.0}% ({:.0} KB/s, eta {})",
            state.filename, state.progress, state.speed, eta
        );
    }
}

fn run_pending(args: &Args) -> Result<()> {
    let ledger = open_local_ledger(args)?;

    for record in ledger.all_uploads() {
        let last_update = chrono::DateTime::from_timestamp_millis(record.last_update)
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        println!(
            "{}/{}\t{} bytes\t{} part(s) done\t{}",
            record.bucket,
            record.key,
            record.file_size,
            record.completed_parts.len(),
            last_update
        );
    }
    Ok(())
}

fn run_sweep(args: &Args) -> Result<()> {
    let ledger = open_local_ledger(args)?;
    let removed = ledger.sweep_stale();
    info!("Forgot {} stale upload(s)", removed);
    Ok(())
}

async fn run_forget(args: &Args, identity: UploadIdentity, abort: bool) -> Result<()> {
    if abort {
        let config = build_config(args)?;
        let orchestrator = build_orchestrator(&config)?;
        if !orchestrator.abort_pending(&identity).await? {
            warn!("No unfinished upload recorded for {}", identity);
        }
        return Ok(());
    }

    let ledger = open_local_ledger(args)?;
    if ledger.get_state(&identity).is_none() {
        warn!("No unfinished upload recorded for {}", identity);
    }
    ledger.clear(&identity);
    Ok(())
}
