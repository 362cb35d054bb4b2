//! Long-running daemon mode.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use broker_completion::run_sweeper;
use broker_scheduler::{AdmissionScheduler, epoch_secs};
use broker_state::StateStore;

use crate::commands::open_store;
use crate::config::BrokerConfig;

/// Run the daemon until Ctrl-C.
pub async fn run(config: &BrokerConfig) -> anyhow::Result<()> {
    serve(config, tokio::signal::ctrl_c()).await
}

/// Run the daemon until `shutdown` resolves.
///
/// The database file is only held while reconciling at startup and during
/// each sweep pass, so operator commands can use the same store meanwhile.
pub async fn serve<S>(config: &BrokerConfig, shutdown: S) -> anyhow::Result<()>
where
    S: Future<Output = std::io::Result<()>>,
{
    info!("broker daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    // Counters are rebuilt from the running set before any sweep credits them.
    {
        let scheduler = AdmissionScheduler::new(open_store(config)?);
        let reports = scheduler.reconcile_all()?;
        info!(clusters = reports.len(), "ledgers reconciled");
    }

    let interval = Duration::from_secs(config.sweeper.interval_secs);
    let db_path = config.db_path();
    info!(interval_secs = config.sweeper.interval_secs, path = ?db_path, "completion sweeper initialized");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let sweeper_handle = tokio::spawn(run_sweeper(
        move || StateStore::open(&db_path),
        epoch_secs,
        interval,
        shutdown_rx,
    ));

    shutdown.await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    // Wait for background tasks.
    sweeper_handle.await?;

    info!("broker daemon stopped");
    Ok(())
}
