use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

use crate::config::sync_config::DEFAULT_INTERVAL_SECONDS;
use crate::host::{AttendanceStore, EmployeeDirectory};
use crate::sync::fetcher::TransactionSource;
use crate::sync::orchestrator::SyncEngine;

/// Longest sleep between config re-reads.
const MAX_TICK_SECONDS: u64 = 60;

/// Runs a cycle whenever the configured interval has elapsed since the last
/// one started, re-reading the interval every tick, until `shutdown` flips.
/// Each tick sleeps until the next cycle is due, capped at a minute.
pub async fn run_scheduler<S, H>(
    engine: Arc<SyncEngine<S, H>>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: TransactionSource,
    H: EmployeeDirectory + AttendanceStore,
{
    info!("Scheduler started");
    let mut last_started: Option<Instant> = None;

    loop {
        let interval = match engine.load_config() {
            Ok(config) => config.interval_seconds.max(1),
            Err(error) => {
                warn!(%error, "Could not read sync config, using default interval");
                DEFAULT_INTERVAL_SECONDS
            }
        };

        let interval = Duration::from_secs(interval);
        let due = last_started.is_none_or(|t| t.elapsed() >= interval);
        if due {
            last_started = Some(Instant::now());
            engine.run_sync_cycle().await;
        }

        let remaining = last_started.map_or(interval, |t| interval.saturating_sub(t.elapsed()));
        let tick = remaining
            .min(Duration::from_secs(MAX_TICK_SECONDS))
            .max(Duration::from_secs(1));
        tokio::select! {
            _ = sleep(tick) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Scheduler stopped");
}
