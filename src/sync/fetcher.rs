use std::fmt;
use std::future::Future;

use chrono::NaiveDateTime;
use reqwest::StatusCode;
use serde_json::Value;

use crate::client::iclock::models::RawTransaction;
use crate::client::iclock::services::DeviceConnection;
use crate::config::DeviceCredentials;
use crate::error::{FetchResult, TokenError};

/// Device-local, no timezone marker.
pub const DEVICE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Half-open fetch window `(start, end]` in device-local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl SyncWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn start_param(&self) -> String {
        self.start.format(DEVICE_TIME_FORMAT).to_string()
    }

    pub fn end_param(&self) -> String {
        self.end.format(DEVICE_TIME_FORMAT).to_string()
    }
}

impl fmt::Display for SyncWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} .. {}", self.start_param(), self.end_param())
    }
}

/// Raw answer of a connectivity check, nothing interpreted yet.
#[derive(Debug, Clone)]
pub struct ConnectionCheck {
    pub status: StatusCode,
    pub url: String,
    pub body: Option<Value>,
}

/// Source of device transactions.
pub trait TransactionSource: Send + Sync {
    /// All transactions in the window, in device order.
    fn fetch(
        &self,
        device: &DeviceConnection,
        window: &SyncWindow,
    ) -> impl Future<Output = FetchResult<Vec<RawTransaction>>> + Send;

    /// Single request with the interactive timeout; any status is returned.
    fn check_connection(
        &self,
        device: &DeviceConnection,
        window: &SyncWindow,
    ) -> impl Future<Output = FetchResult<ConnectionCheck>> + Send;

    fn register_token(
        &self,
        host: &str,
        port: u16,
        credentials: &DeviceCredentials,
    ) -> impl Future<Output = Result<String, TokenError>> + Send;
}
