use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use aes::Aes128;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use block_modes::{BlockMode, Cbc};
use block_padding::Pkcs7;
use chrono_tz::Tz;

use crate::error::{ConfigError, ConfigResult};

type Aes128Cbc = Cbc<Aes128, Pkcs7>;

const DEFAULT_STATE_FILE: &str = "zkteco_config.json";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_PAGE_SIZE: u32 = 200;
const DEFAULT_MAX_PAGES: u32 = 50;

/// Credentials used against `/api-token-auth/` on the device server.
#[derive(Clone)]
pub struct DeviceCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for DeviceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCredentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone)]
pub struct FrappeSettings {
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for FrappeSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrappeSettings")
            .field("url", &self.url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// Process-level settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub state_file: PathBuf,
    pub device_timezone: Tz,
    pub device_credentials: Option<DeviceCredentials>,
    pub frappe: FrappeSettings,
    pub listen_addr: SocketAddr,
    pub log_dir: PathBuf,
    pub page_size: u32,
    pub max_pages: u32,
}

impl Settings {
    pub fn from_env() -> ConfigResult<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds settings from any variable source; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let required = |name: &'static str| var(name).ok_or(ConfigError::MissingVar(name));

        // The encrypted form wins when the AES key material is present.
        let secret = |plain: &'static str, encrypted: &'static str| -> ConfigResult<Option<String>> {
            match (var("AES_KEY"), var("AES_IV"), var(encrypted)) {
                (Some(key), Some(iv), Some(ciphertext)) => {
                    decrypt_secret(encrypted, &key, &iv, &ciphertext).map(Some)
                }
                _ => Ok(var(plain)),
            }
        };

        let device_timezone = match var("ZK_DEVICE_TIMEZONE") {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|reason| ConfigError::InvalidVar {
                    name: "ZK_DEVICE_TIMEZONE",
                    reason,
                })?,
            None => Tz::UTC,
        };

        let device_credentials = match (
            var("ZK_DEVICE_USERNAME"),
            secret("ZK_DEVICE_PASSWORD", "ZK_DEVICE_PASSWORD_ENC")?,
        ) {
            (Some(username), Some(password)) => Some(DeviceCredentials { username, password }),
            _ => None,
        };

        let frappe = FrappeSettings {
            url: required("FRAPPE_URL")?.trim_end_matches('/').to_string(),
            api_key: required("FRAPPE_API_KEY")?,
            api_secret: secret("FRAPPE_API_SECRET", "FRAPPE_API_SECRET_ENC")?
                .ok_or(ConfigError::MissingVar("FRAPPE_API_SECRET"))?,
        };

        let listen_addr = var("ZK_LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidVar {
                name: "ZK_LISTEN_ADDR",
                reason: e.to_string(),
            })?;

        Ok(Self {
            state_file: var("ZK_STATE_FILE")
                .unwrap_or_else(|| DEFAULT_STATE_FILE.to_string())
                .into(),
            device_timezone,
            device_credentials,
            frappe,
            listen_addr,
            log_dir: var("ZK_LOG_DIR")
                .unwrap_or_else(|| DEFAULT_LOG_DIR.to_string())
                .into(),
            page_size: parse_number("ZK_PAGE_SIZE", var("ZK_PAGE_SIZE"), DEFAULT_PAGE_SIZE)?,
            max_pages: parse_number("ZK_MAX_PAGES", var("ZK_MAX_PAGES"), DEFAULT_MAX_PAGES)?,
        })
    }
}

fn parse_number(name: &'static str, value: Option<String>, default: u32) -> ConfigResult<u32> {
    match value {
        None => Ok(default),
        Some(raw) => match raw.parse::<u32>() {
            Ok(0) => Err(ConfigError::InvalidVar {
                name,
                reason: "must be greater than zero".to_string(),
            }),
            Ok(n) => Ok(n),
            Err(e) => Err(ConfigError::InvalidVar {
                name,
                reason: e.to_string(),
            }),
        },
    }
}

/// Decrypts a base64 AES-128-CBC/PKCS7 ciphertext with base64 key and IV.
pub fn decrypt_secret(
    name: &'static str,
    key_b64: &str,
    iv_b64: &str,
    ciphertext_b64: &str,
) -> ConfigResult<String> {
    let fail = |reason: String| ConfigError::Decrypt { name, reason };

    let key = STANDARD.decode(key_b64).map_err(|e| fail(format!("key: {e}")))?;
    let iv = STANDARD.decode(iv_b64).map_err(|e| fail(format!("iv: {e}")))?;
    let ciphertext = STANDARD
        .decode(ciphertext_b64)
        .map_err(|e| fail(format!("ciphertext: {e}")))?;

    let cipher = Aes128Cbc::new_from_slices(&key, &iv).map_err(|e| fail(e.to_string()))?;
    let plain = cipher
        .decrypt_vec(&ciphertext)
        .map_err(|e| fail(e.to_string()))?;

    String::from_utf8(plain).map_err(|_| fail("plaintext is not UTF-8".to_string()))
}
