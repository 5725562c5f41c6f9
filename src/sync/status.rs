use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::client::iclock::models::{RawTransaction, TransactionEnvelope};
use crate::error::{SyncResult, TokenError};
use crate::host::{AttendanceStore, EmployeeDirectory};
use crate::sync::event::Direction;
use crate::sync::fetcher::{DEVICE_TIME_FORMAT, SyncWindow, TransactionSource};
use crate::sync::orchestrator::SyncEngine;

const PREVIEW_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub enabled: bool,
    /// Seconds between scheduled cycles.
    pub sync_frequency: u64,
    pub last_sync: Option<String>,
    pub total_synced: u64,
    /// `None` when the host could not be asked.
    pub recent_checkins_in_last_24h: Option<u64>,
    pub server_configured: bool,
    pub token_configured: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreviewEvent {
    pub emp_code: Option<String>,
    pub employee: Option<String>,
    pub employee_name: Option<String>,
    pub time: Option<String>,
    pub direction: Option<Direction>,
    pub device_label: Option<String>,
    /// Name, department and verification method as the device reports them.
    pub device_person: Option<String>,
    pub department: Option<String>,
    pub verify_type: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionReport {
    pub ok: bool,
    pub status_code: Option<u16>,
    pub url: Option<String>,
    pub data_preview: Option<Value>,
    pub preview: Vec<PreviewEvent>,
    pub error: Option<String>,
}

impl ConnectionReport {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

impl<S, H> SyncEngine<S, H>
where
    S: TransactionSource,
    H: EmployeeDirectory + AttendanceStore,
{
    pub async fn get_sync_status(&self) -> SyncResult<SyncStatus> {
        let config = self.load_config()?;
        let since = self.clock.now() - chrono::Duration::hours(24);
        let recent = match self.host.count_since(since).await {
            Ok(count) => Some(count),
            Err(error) => {
                warn!(%error, "Could not count recent checkins");
                None
            }
        };

        Ok(SyncStatus {
            enabled: config.enable_sync,
            sync_frequency: config.interval_seconds,
            last_sync: config
                .last_sync
                .map(|t| t.format(DEVICE_TIME_FORMAT).to_string()),
            total_synced: config.total_synced,
            recent_checkins_in_last_24h: recent,
            server_configured: config.server_configured(),
            token_configured: config.token().is_some(),
        })
    }

    /// Fetches today's transactions and normalizes a few of them without
    /// writing anything.
    pub async fn test_connection(&self) -> ConnectionReport {
        let config = match self.load_config() {
            Ok(config) => config,
            Err(error) => return ConnectionReport::failed(error.to_string()),
        };
        if config.token().is_none() {
            return ConnectionReport::failed(
                "Token not set. Please register or save a token first.",
            );
        }
        let Some(device) = config.device_connection() else {
            return ConnectionReport::failed("Server host and port are not configured.");
        };

        let today = self.clock.now().date();
        let (Some(start), Some(end)) = (today.and_hms_opt(0, 0, 0), today.and_hms_opt(23, 59, 59))
        else {
            return ConnectionReport::failed("Could not compute today's window.");
        };
        let window = SyncWindow::new(start, end);

        let check = match self.source.check_connection(&device, &window).await {
            Ok(check) => check,
            Err(error) => return ConnectionReport::failed(error.to_string()),
        };

        let data_preview = check.body.as_ref().map(|body| match body {
            Value::Array(items) => Value::Array(items.iter().take(1).cloned().collect()),
            other => other.clone(),
        });

        let mut preview = Vec::new();
        if check.status.is_success()
            && let Some(body) = check.body
        {
            let transactions = TransactionEnvelope::classify(body).into_transactions();
            for raw in transactions.into_iter().take(PREVIEW_LIMIT) {
                preview.push(self.preview_event(raw).await);
            }
        }

        ConnectionReport {
            ok: check.status.is_success(),
            status_code: Some(check.status.as_u16()),
            url: Some(check.url),
            data_preview,
            preview,
            error: None,
        }
    }

    async fn preview_event(&self, raw: RawTransaction) -> PreviewEvent {
        let device_side = PreviewEvent {
            emp_code: raw.emp_code.clone(),
            device_person: raw.person_name(),
            department: raw.department.clone(),
            verify_type: raw.verify_type_display.clone(),
            ..PreviewEvent::default()
        };
        match self.normalizer.normalize(&self.host, raw).await {
            Ok(event) => {
                let employee_name = self
                    .host
                    .employee_name(&event.employee_id)
                    .await
                    .ok()
                    .flatten();
                PreviewEvent {
                    employee: Some(event.employee_id),
                    employee_name,
                    time: Some(event.time.format(DEVICE_TIME_FORMAT).to_string()),
                    direction: Some(event.direction),
                    device_label: Some(event.device_label),
                    ..device_side
                }
            }
            Err(error) => PreviewEvent {
                error: Some(error.to_string()),
                ..device_side
            },
        }
    }

    /// Obtains a device token with the configured credentials and stores it.
    pub async fn register_api_token(&self) -> Result<String, TokenError> {
        let config = self.load_config()?;
        let (Some(host), Some(port)) = (config.server_host(), config.server_port) else {
            return Err(TokenError::NotConfigured(
                "Please configure server host and port.".to_string(),
            ));
        };
        let Some(credentials) = self.credentials.as_ref() else {
            return Err(TokenError::NotConfigured(
                "Please configure ZK_DEVICE_USERNAME and ZK_DEVICE_PASSWORD.".to_string(),
            ));
        };

        let token = self.source.register_token(host, port, credentials).await?;
        self.update_config(|config| config.bearer_token = Some(token.clone()))?;
        info!("Device token saved");
        Ok(token)
    }
}
