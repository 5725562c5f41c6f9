use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::client::iclock::models::RawTransaction;
use crate::config::{ConfigStore, DeviceCredentials, SyncConfig};
use crate::error::{ConfigResult, FetchError, RecordError, SyncError, SyncResult};
use crate::host::{AttendanceStore, EmployeeDirectory};
use crate::sync::clock::Clock;
use crate::sync::fetcher::{SyncWindow, TransactionSource};
use crate::sync::normalizer::Normalizer;
use crate::sync::writer::{CheckinWriter, WriteOutcome};

/// Lookback for the very first cycle, when no watermark exists yet.
pub const DEFAULT_LOOKBACK_MINUTES: i64 = 60;
/// Intervals below this are throttled against the last run.
pub const THROTTLE_BELOW_SECONDS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    TokenMissing,
    Throttled { elapsed_seconds: u64, interval_seconds: u64 },
    AlreadyRunning,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("sync is disabled"),
            Self::TokenMissing => f.write_str("no bearer token configured"),
            Self::Throttled {
                elapsed_seconds,
                interval_seconds,
            } => write!(
                f,
                "last run was {elapsed_seconds}s ago, interval is {interval_seconds}s"
            ),
            Self::AlreadyRunning => f.write_str("another sync cycle is running"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub fetched: usize,
    /// Newly written records.
    pub processed: u64,
    pub duplicates: u64,
    pub errors: u64,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    /// Watermark untouched; the same window is retried next cycle.
    FetchFailed { window: SyncWindow, error: FetchError },
    Completed { window: SyncWindow, summary: CycleSummary },
}

/// Result of an operator-triggered cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManualSyncResult {
    pub success: bool,
    pub message: String,
}

/// Drives fetch, normalize, dedup and write for one configured device.
///
/// The watermark and cumulative counter are only written in the commit step
/// at the end of a cycle. Two leases are held for the whole cycle: one within
/// the process and one on the persisted state, shared with any other process
/// using the same store.
pub struct SyncEngine<S, H> {
    pub(super) source: S,
    pub(super) host: H,
    config: Box<dyn ConfigStore>,
    config_write: Mutex<()>,
    pub(super) clock: Box<dyn Clock>,
    pub(super) normalizer: Normalizer,
    writer: CheckinWriter,
    pub(super) credentials: Option<DeviceCredentials>,
    lease: tokio::sync::Mutex<()>,
    last_run: Mutex<Option<Instant>>,
}

impl<S, H> SyncEngine<S, H>
where
    S: TransactionSource,
    H: EmployeeDirectory + AttendanceStore,
{
    pub fn new(
        source: S,
        host: H,
        config: Box<dyn ConfigStore>,
        clock: Box<dyn Clock>,
        normalizer: Normalizer,
        writer: CheckinWriter,
    ) -> Self {
        Self {
            source,
            host,
            config,
            config_write: Mutex::new(()),
            clock,
            normalizer,
            writer,
            credentials: None,
            lease: tokio::sync::Mutex::new(()),
            last_run: Mutex::new(None),
        }
    }

    pub fn with_credentials(mut self, credentials: Option<DeviceCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn load_config(&self) -> ConfigResult<SyncConfig> {
        self.config.load()
    }

    /// Read-modify-write of the persisted config, serialized within the process.
    pub(super) fn update_config<F>(&self, apply: F) -> ConfigResult<SyncConfig>
    where
        F: FnOnce(&mut SyncConfig),
    {
        let _guard = self
            .config_write
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut config = self.config.load()?;
        apply(&mut config);
        self.config.save(&config)?;
        Ok(config)
    }

    /// Unattended entry point: every outcome is logged, nothing is returned.
    pub async fn run_sync_cycle(&self) {
        match self.run_cycle(Trigger::Scheduled).await {
            Ok(CycleOutcome::Skipped(reason)) => debug!(%reason, "Sync cycle skipped"),
            Ok(_) => {}
            Err(error) => error!(%error, "Sync cycle aborted"),
        }
    }

    pub async fn manual_sync(&self) -> ManualSyncResult {
        match self.run_cycle(Trigger::Manual).await {
            Ok(CycleOutcome::Completed { window, summary }) => ManualSyncResult {
                success: true,
                message: format!(
                    "Synced {} new checkins from {} transactions ({} already recorded, {} errors) for {}",
                    summary.processed, summary.fetched, summary.duplicates, summary.errors, window
                ),
            },
            Ok(CycleOutcome::Skipped(reason)) => ManualSyncResult {
                success: false,
                message: format!("Sync skipped: {reason}"),
            },
            Ok(CycleOutcome::FetchFailed { window, error }) => ManualSyncResult {
                success: false,
                message: format!("Could not fetch transactions for {window}: {error}"),
            },
            Err(error) => ManualSyncResult {
                success: false,
                message: format!("Sync failed: {error}"),
            },
        }
    }

    pub async fn run_cycle(&self, trigger: Trigger) -> SyncResult<CycleOutcome> {
        let Ok(_lease) = self.lease.try_lock() else {
            return Ok(CycleOutcome::Skipped(SkipReason::AlreadyRunning));
        };
        let Some(_state_lease) = self.config.try_lease()? else {
            debug!("State lease held by another process");
            return Ok(CycleOutcome::Skipped(SkipReason::AlreadyRunning));
        };

        let config = self.config.load()?;
        if !config.enable_sync {
            return Ok(CycleOutcome::Skipped(SkipReason::Disabled));
        }
        if config.token().is_none() {
            return Ok(CycleOutcome::Skipped(SkipReason::TokenMissing));
        }
        let Some(device) = config.device_connection() else {
            return Err(SyncError::NotConfigured(
                "server host and port must be set".to_string(),
            ));
        };
        if let Some(reason) = self.throttle(config.interval_seconds) {
            return Ok(CycleOutcome::Skipped(reason));
        }

        let now = self.clock.now();
        let start = config
            .last_sync
            .unwrap_or_else(|| now - chrono::Duration::minutes(DEFAULT_LOOKBACK_MINUTES));
        let window = SyncWindow::new(start, now);
        info!(?trigger, window = %window, "Starting sync cycle");

        let transactions = match self.source.fetch(&device, &window).await {
            Ok(transactions) => transactions,
            Err(error) => {
                warn!(window = %window, %error, "Fetch failed, watermark left unchanged");
                if matches!(error, FetchError::Unauthorized) {
                    self.renew_token().await;
                }
                return Ok(CycleOutcome::FetchFailed { window, error });
            }
        };

        let mut summary = CycleSummary {
            fetched: transactions.len(),
            ..CycleSummary::default()
        };
        for raw in transactions {
            let reference = raw.id.clone().or_else(|| raw.emp_code.clone());
            match self.process(raw).await {
                Ok(WriteOutcome::Written(_)) => summary.processed += 1,
                Ok(WriteOutcome::AlreadyExists) => summary.duplicates += 1,
                Err(error) => {
                    summary.errors += 1;
                    warn!(transaction = ?reference, %error, "Transaction not recorded");
                }
            }
        }

        let committed = self.commit(window.end, summary.processed)?;
        info!(
            window = %window,
            fetched = summary.fetched,
            processed = summary.processed,
            duplicates = summary.duplicates,
            errors = summary.errors,
            total_synced = committed.total_synced,
            "Sync cycle complete"
        );
        Ok(CycleOutcome::Completed { window, summary })
    }

    async fn process(&self, raw: RawTransaction) -> Result<WriteOutcome, RecordError> {
        let event = self.normalizer.normalize(&self.host, raw).await?;
        self.writer.write(&self.host, &event).await
    }

    /// Sub-minute intervals are checked against the process-wide last run.
    fn throttle(&self, interval_seconds: u64) -> Option<SkipReason> {
        if interval_seconds >= THROTTLE_BELOW_SECONDS {
            return None;
        }
        let now = Instant::now();
        let mut last_run = self.last_run.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = *last_run {
            let elapsed = now.duration_since(previous);
            if elapsed < Duration::from_secs(interval_seconds) {
                return Some(SkipReason::Throttled {
                    elapsed_seconds: elapsed.as_secs(),
                    interval_seconds,
                });
            }
        }
        *last_run = Some(now);
        None
    }

    /// Moves the watermark to the cycle start and adds to the counter, in one write.
    fn commit(&self, cycle_start: NaiveDateTime, processed: u64) -> SyncResult<SyncConfig> {
        let config = self.update_config(|config| {
            let watermark = config
                .last_sync
                .map_or(cycle_start, |previous| previous.max(cycle_start));
            config.last_sync = Some(watermark);
            config.total_synced = config.total_synced.saturating_add(processed);
        })?;
        Ok(config)
    }

    async fn renew_token(&self) {
        if self.credentials.is_none() {
            warn!("Device rejected the bearer token and no device credentials are configured");
            return;
        }
        match self.register_api_token().await {
            Ok(_) => info!("Registered a new device token for the next cycle"),
            Err(error) => error!(%error, "Could not renew the device token"),
        }
    }
}
