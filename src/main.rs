//! `sql-worker`: the worker protocol as JSON lines over stdin/stdout.
//!
//! Each input line is one request; every response is written as one output line, streamed
//! rows included. Logs go to stderr so stdout carries only protocol messages.

use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use sql_worker::engine::DEFAULT_MEMORY_LIMIT;
use sql_worker::{EngineOptions, SqlWorker, SqlWorkerError};

#[derive(Parser, Debug)]
#[command(version, about = "SQLite worker speaking JSON lines over stdin/stdout")]
struct Args {
    /// Size of the engine memory bridge, in bytes
    #[arg(long, default_value_t = DEFAULT_MEMORY_LIMIT)]
    memory_limit: usize,

    /// Directory for session database files (defaults to a temporary directory)
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Log filter directives, e.g. `sql_worker=debug` (overrides RUST_LOG)
    #[arg(long)]
    log_filter: Option<String>,
}

fn install_tracing_subscriber(directives: Option<&str>) {
    let filter = directives
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<(), SqlWorkerError> {
    let args = Args::parse();
    install_tracing_subscriber(args.log_filter.as_deref());

    let mut options = EngineOptions::default().with_memory_limit(args.memory_limit);
    if let Some(workspace) = args.workspace {
        options = options.with_workspace(workspace);
    }
    let engine = sql_worker::Engine::initialize(options)?;
    let worker = SqlWorker::spawn(&engine)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let mut responses = worker.post_json(line)?;
        while let Some(response) = responses.recv().await {
            let mut encoded = serde_json::to_vec(&response)?;
            encoded.push(b'\n');
            stdout.write_all(&encoded).await?;
        }
        stdout.flush().await?;
    }

    info!("stdin closed, shutting down");
    tokio::task::spawn_blocking(move || worker.shutdown())
        .await
        .map_err(|err| SqlWorkerError::ConnectionError(format!("shutdown task failed: {err}")))??;
    engine.shutdown();
    Ok(())
}
