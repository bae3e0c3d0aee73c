//! ShardKV server binary.
//!
//! Startup order: parse arguments, install logging, open and replay the
//! journal, start the expiry sweeper, then accept clients until Ctrl+C.

use anyhow::Context;
use shardkv::commands::CommandHandler;
use shardkv::config::{CliAction, ServerConfig, HELP};
use shardkv::connection::{handle_connection, ConnectionStats};
use shardkv::persistence::{AppendLog, FsyncPolicy};
use shardkv::storage::{start_expiry_sweeper, StorageEngine, NUM_SHARDS};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
   _____ __                   ____ ___    __
  / ___// /_  ____ __________/ / //_/ |  / /
  \__ \/ __ \/ __ `/ ___/ __  / ,<  | | / /
 ___/ / / / / /_/ / /  / /_/ / /| | | |/ /
/____/_/ /_/\__,_/_/   \__,_/_/ |_| |___/

ShardKV v{} - Sharded In-Memory Key-Value Store
──────────────────────────────────────────────────────────────
Listening on {}
Journal {} (fsync: {})

Use Ctrl+C to shutdown gracefully.
"#,
        shardkv::VERSION,
        config.bind_address(),
        config.aof_path.display(),
        config.fsync,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match ServerConfig::from_args(std::env::args().skip(1)) {
        Ok(CliAction::Run(config)) => config,
        Ok(CliAction::Help) => {
            println!("{}", HELP);
            return Ok(());
        }
        Ok(CliAction::Version) => {
            println!("ShardKV version {}", shardkv::VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("{}", HELP);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .with_context(|| format!("invalid log level '{}'", config.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let storage = Arc::new(StorageEngine::new());
    info!(shards = NUM_SHARDS, "Storage engine initialized");

    let journal = Arc::new(
        AppendLog::open(&config.aof_path, config.fsync)
            .with_context(|| format!("failed to open journal {}", config.aof_path.display()))?,
    );
    let replayed = journal
        .load(&storage)
        .with_context(|| format!("failed to replay journal {}", config.aof_path.display()))?;
    info!(keys = storage.len(), records = replayed.records, "State restored");

    let sweeper = start_expiry_sweeper(Arc::clone(&storage), config.sweep_interval);

    let flusher = (config.fsync == FsyncPolicy::EverySec).then(|| {
        let journal = Arc::clone(&journal);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                ticker.tick().await;
                if let Err(e) = journal.sync_pending() {
                    error!(error = %e, "Background journal sync failed");
                }
            }
        })
    });

    // One handler shared by all clients: they must share its ordering stripes
    let commands = CommandHandler::with_journal(Arc::clone(&storage), Arc::clone(&journal));
    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    print_banner(&config);
    info!(address = %config.bind_address(), "Listening");

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C, shutting down");
            return;
        }
        info!("Shutdown signal received, stopping server...");
    };

    tokio::select! {
        _ = accept_loop(listener, commands, stats) => {}
        _ = shutdown => {}
    }

    sweeper.stop();
    if let Some(flusher) = flusher {
        flusher.abort();
    }
    journal.sync().context("failed to sync journal on shutdown")?;

    info!(keys = storage.len(), "Server shutdown complete");
    Ok(())
}

/// Accepts clients forever, one task per connection.
async fn accept_loop(listener: TcpListener, commands: CommandHandler, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let handler = commands.clone();
                tokio::spawn(handle_connection(stream, addr, handler, Arc::clone(&stats)));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}
