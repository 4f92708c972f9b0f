//! FlintKV server entry point.
//!
//! Restores the last snapshot, binds the TCP listener, and serves clients
//! until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use flintkv::commands::CommandHandler;
use flintkv::connection::{handle_connection, ConnectionStats};
use flintkv::storage::{SnapshotStore, StorageEngine};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// In-memory key-value server speaking a RESP-style protocol
#[derive(Parser, Debug)]
#[command(name = "flintkv", version = flintkv::VERSION)]
struct Config {
    /// Host to bind to
    #[arg(long, default_value = flintkv::DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = flintkv::DEFAULT_PORT)]
    port: u16,

    /// Snapshot file written by SAVE and restored at startup
    #[arg(long, default_value = flintkv::DEFAULT_SNAPSHOT_PATH)]
    snapshot: PathBuf,

    /// Start with an empty keyspace instead of restoring the snapshot
    #[arg(long)]
    no_load: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Config {
    fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn print_banner(config: &Config) {
    println!(
        r#"
FlintKV v{} - In-Memory Key-Value Server
──────────────────────────────────────────
Listening on {}
Snapshot file {}

Use Ctrl+C to shutdown gracefully.
"#,
        flintkv::VERSION,
        config.bind_address(),
        config.snapshot.display()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .with_context(|| format!("invalid log level '{}'", config.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let storage = Arc::new(StorageEngine::new());
    let snapshot = Arc::new(SnapshotStore::new(
        Arc::clone(&storage),
        config.snapshot.clone(),
    ));

    if config.no_load {
        info!("Snapshot restore skipped");
    } else if let Err(e) = snapshot.load() {
        warn!(error = %e, "Failed to restore snapshot, starting empty");
    }

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;

    print_banner(&config);
    info!(address = %config.bind_address(), keys = storage.len(), "Server started");

    let stats = Arc::new(ConnectionStats::new());
    let handler = CommandHandler::new(Arc::clone(&storage), snapshot);

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        _ = accept_loop(listener, handler, Arc::clone(&stats)) => {}
        _ = shutdown => {}
    }

    let storage_stats = storage.stats();
    info!(
        keys = storage_stats.keys,
        gets = storage_stats.get_ops,
        sets = storage_stats.set_ops,
        deletes = storage_stats.del_ops,
        list_ops = storage_stats.list_ops,
        expired = storage_stats.expired,
        "Keyspace totals"
    );

    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        protocol_errors = stats.protocol_errors.load(Ordering::Relaxed),
        bytes_read = stats.bytes_read.load(Ordering::Relaxed),
        bytes_written = stats.bytes_written.load(Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}

async fn accept_loop(listener: TcpListener, handler: CommandHandler, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    handler.clone(),
                    Arc::clone(&stats),
                ));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}
