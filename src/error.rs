//! Error types for the sync service

use reqwest::StatusCode;
use thiserror::Error;

/// Problems with the process environment or the persisted sync configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {name}: {reason}")]
    InvalidVar { name: &'static str, reason: String },

    #[error("could not decrypt {name}: {reason}")]
    Decrypt { name: &'static str, reason: String },

    #[error("state file {path}: {source}")]
    StateIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is not valid JSON: {source}")]
    StateFormat {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Recoverable failures while pulling transactions from the device.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("device request timed out")]
    Timeout,

    #[error("device request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("device rejected the bearer token")]
    Unauthorized,

    #[error("device answered with status {0}")]
    Status(StatusCode),

    #[error("device response is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("device response has an unrecognized shape")]
    UnrecognizedEnvelope,

    #[error("device returned more than {pages} pages; raise ZK_MAX_PAGES")]
    Truncated { pages: u32 },
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(error)
        }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

/// Failures talking to the host HR system.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("host request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("host answered with status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("unexpected host payload: {0}")]
    Payload(String),
}

pub type HostResult<T> = Result<T, HostError>;

/// Why a single transaction was not persisted. Never aborts a batch.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("transaction has no {0}")]
    MissingField(&'static str),

    #[error("no employee matches device code {0}")]
    UnresolvedEmployee(String),

    #[error("unparseable punch time {0:?}")]
    InvalidTimestamp(String),

    #[error("employee lookup failed: {0}")]
    Lookup(#[source] HostError),

    #[error("attendance store failed: {0}")]
    Store(#[source] HostError),
}

/// Errors that abort a whole cycle before the watermark is touched.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("sync is not configured: {0}")]
    NotConfigured(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Failures registering a device API token.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("{0}")]
    NotConfigured(String),

    #[error("connection error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("token not found in API response")]
    MissingToken,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Anything that stops the binary before or while serving.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("could not build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("could not encode output: {0}")]
    Output(#[from] serde_json::Error),
}
