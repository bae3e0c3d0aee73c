//! Background Expiry Sweeper
//!
//! Lazy expiry only removes a key when something touches it. A key that expires
//! and is never read again would stay in memory forever, so a background task
//! periodically sweeps the whole keyspace.
//!
//! ## Sweep Phases
//!
//! ```text
//!   every `interval`:
//!     1. scan   - lock all shards (ascending), collect expired keys, unlock
//!     2. delete - for each collected key, lock its shard alone and remove it
//!                 if it is still expired
//! ```
//!
//! Client writes are only blocked during the scan. A key recreated between
//! the two phases survives because the delete phase re-checks expiry.

use crate::storage::StorageEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Default time between two sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Interval between sweeps (default: 5s)
    pub interval: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Starts the expiry sweeper as a background task on the current runtime.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use shardkv::storage::{StorageEngine, ExpirySweeper, ExpiryConfig};
    /// use std::sync::Arc;
    ///
    /// let engine = Arc::new(StorageEngine::new());
    /// let sweeper = ExpirySweeper::start(engine, ExpiryConfig::default());
    ///
    /// // Dropping the sweeper will stop it
    /// drop(sweeper);
    /// ```
    pub fn start(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            interval_ms = config.interval.as_millis() as u64,
            "Background expiry sweeper started"
        );
        tokio::spawn(sweeper_loop(engine, config, shutdown_rx));

        Self { shutdown_tx }
    }

    /// Stops the expiry sweeper. Idempotent.
    pub fn stop(&self) {
        if !*self.shutdown_tx.borrow() {
            let _ = self.shutdown_tx.send(true);
            info!("Background expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs one full sweep and returns the number of keys it removed.
pub fn sweep_once(engine: &StorageEngine) -> u64 {
    let candidates = engine.collect_expired_keys();
    if candidates.is_empty() {
        return 0;
    }

    let removed = candidates
        .iter()
        .filter(|key| engine.delete_if_expired(key))
        .count() as u64;

    trace!(
        candidates = candidates.len(),
        removed = removed,
        "Sweep finished"
    );
    removed
}

async fn sweeper_loop(
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    // The first tick of an interval completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let expired = sweep_once(&engine);
        if expired > 0 {
            debug!(
                expired = expired,
                keys_remaining = engine.len(),
                "Expired keys cleaned up"
            );
        }
    }
}

/// Starts the expiry sweeper with the given interval.
pub fn start_expiry_sweeper(engine: Arc<StorageEngine>, interval: Duration) -> ExpirySweeper {
    ExpirySweeper::start(engine, ExpiryConfig { interval })
}
