use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::client::iclock::services::DeviceConnection;
use crate::error::{ConfigError, ConfigResult};

pub const DEFAULT_INTERVAL_SECONDS: u64 = 300;

/// Singleton sync configuration. Connection fields are edited by the operator,
/// `last_sync` and `total_synced` only by the orchestrator's commit step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub bearer_token: Option<String>,
    pub enable_sync: bool,
    pub interval_seconds: u64,
    pub last_sync: Option<NaiveDateTime>,
    pub total_synced: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_host: None,
            server_port: None,
            bearer_token: None,
            enable_sync: false,
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
            last_sync: None,
            total_synced: 0,
        }
    }
}

impl SyncConfig {
    pub fn server_host(&self) -> Option<&str> {
        self.server_host
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
    }

    pub fn server_configured(&self) -> bool {
        self.server_host().is_some() && self.server_port.is_some()
    }

    pub fn token(&self) -> Option<&str> {
        self.bearer_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    /// Device connection, if host, port and token are all present.
    pub fn device_connection(&self) -> Option<DeviceConnection> {
        Some(DeviceConnection {
            host: self.server_host()?.to_string(),
            port: self.server_port?,
            token: self.token()?.to_string(),
        })
    }
}

/// Exclusive claim on the persisted state, released on drop.
#[derive(Debug)]
pub struct StateLease {
    _file: Option<File>,
}

impl StateLease {
    /// A lease for stores only one process can reach.
    pub fn unguarded() -> Self {
        Self { _file: None }
    }
}

/// Where the singleton lives between cycles.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> ConfigResult<SyncConfig>;
    fn save(&self, config: &SyncConfig) -> ConfigResult<()>;

    /// Claims the state for one cycle. `None` while another holder has it.
    fn try_lease(&self) -> ConfigResult<Option<StateLease>> {
        Ok(Some(StateLease::unguarded()))
    }
}

/// Pretty-printed JSON file, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sidecar file carrying the advisory lock shared by every process
    /// pointed at the same state file.
    pub fn lock_path(&self) -> PathBuf {
        self.path.with_extension("json.lock")
    }

    fn io_error(&self, source: std::io::Error) -> ConfigError {
        ConfigError::StateIo {
            path: self.path.display().to_string(),
            source,
        }
    }

    fn ensure_parent(&self) -> ConfigResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        Ok(())
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&self) -> ConfigResult<SyncConfig> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(SyncConfig::default()),
            Err(e) => return Err(self.io_error(e)),
        };
        if data.trim().is_empty() {
            return Ok(SyncConfig::default());
        }
        serde_json::from_str(&data).map_err(|source| ConfigError::StateFormat {
            path: self.path.display().to_string(),
            source,
        })
    }

    fn save(&self, config: &SyncConfig) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(config).map_err(|source| ConfigError::StateFormat {
            path: self.path.display().to_string(),
            source,
        })?;

        self.ensure_parent()?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        Ok(())
    }

    fn try_lease(&self) -> ConfigResult<Option<StateLease>> {
        self.ensure_parent()?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())
            .map_err(|e| self.io_error(e))?;
        match file.try_lock() {
            Ok(()) => Ok(Some(StateLease { _file: Some(file) })),
            Err(TryLockError::WouldBlock) => Ok(None),
            Err(TryLockError::Error(e)) => Err(self.io_error(e)),
        }
    }
}
