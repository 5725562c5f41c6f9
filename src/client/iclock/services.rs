use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::iclock::models::{
    RawTransaction, TokenAuthRequest, TokenAuthResponse, TransactionEnvelope,
};
use crate::config::DeviceCredentials;
use crate::error::{FetchError, FetchResult, TokenError};
use crate::sync::fetcher::{ConnectionCheck, SyncWindow, TransactionSource};

/// Bound for the unattended batch fetch.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Bound for operator-triggered requests.
pub const INTERACTIVE_TIMEOUT: Duration = Duration::from_secs(15);

const TRANSACTIONS_PATH: &str = "/iclock/api/transactions/";
const TOKEN_PATH: &str = "/api-token-auth/";

#[derive(Clone, PartialEq, Eq)]
pub struct DeviceConnection {
    pub host: String,
    pub port: u16,
    pub token: String,
}

impl std::fmt::Debug for DeviceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl DeviceConnection {
    pub fn base_url(&self) -> String {
        device_base_url(&self.host, self.port)
    }

    pub fn transactions_url(&self) -> String {
        format!("{}{}", self.base_url(), TRANSACTIONS_PATH)
    }
}

/// `http://host:port`, unless the operator already typed a scheme.
pub fn device_base_url(host: &str, port: u16) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{host}:{port}")
    } else {
        format!("http://{host}:{port}")
    }
}

/// BioTime transactions API client.
#[derive(Debug, Clone)]
pub struct IclockClient {
    http: reqwest::Client,
    page_size: u32,
    max_pages: u32,
}

impl IclockClient {
    pub fn new(page_size: u32, max_pages: u32) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            page_size,
            max_pages: max_pages.max(1),
        })
    }

    fn transactions_request(
        &self,
        url: &str,
        device: &DeviceConnection,
        timeout: Duration,
    ) -> reqwest::RequestBuilder {
        self.http
            .get(url)
            .bearer_auth(&device.token)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .timeout(timeout)
    }
}

impl TransactionSource for IclockClient {
    async fn fetch(
        &self,
        device: &DeviceConnection,
        window: &SyncWindow,
    ) -> FetchResult<Vec<RawTransaction>> {
        let mut url = device.transactions_url();
        let mut transactions = Vec::new();

        for page in 1..=self.max_pages {
            let mut request = self.transactions_request(&url, device, FETCH_TIMEOUT);
            if page == 1 {
                request = request.query(&[
                    ("start_time", window.start_param()),
                    ("end_time", window.end_param()),
                    ("page_size", self.page_size.to_string()),
                ]);
            }

            debug!(url = %url, page, window = %window, "Requesting device transactions");
            let response = request.send().await?;
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                return Err(FetchError::Unauthorized);
            }
            if !status.is_success() {
                return Err(FetchError::Status(status));
            }

            let body: Value = serde_json::from_str(&response.text().await?)?;
            let envelope = TransactionEnvelope::classify(body);
            if !envelope.is_recognized() {
                return Err(FetchError::UnrecognizedEnvelope);
            }

            let next = envelope.next_page().map(str::to_owned);
            transactions.extend(envelope.into_transactions());

            match next {
                Some(next) if page == self.max_pages => {
                    warn!(max_pages = self.max_pages, next = %next, "Page limit reached before the window was read");
                    return Err(FetchError::Truncated {
                        pages: self.max_pages,
                    });
                }
                Some(next) => url = next,
                None => break,
            }
        }

        info!(count = transactions.len(), window = %window, "Fetched device transactions");
        Ok(transactions)
    }

    async fn check_connection(
        &self,
        device: &DeviceConnection,
        window: &SyncWindow,
    ) -> FetchResult<ConnectionCheck> {
        let response = self
            .transactions_request(&device.transactions_url(), device, INTERACTIVE_TIMEOUT)
            .query(&[
                ("start_time", window.start_param()),
                ("end_time", window.end_param()),
            ])
            .send()
            .await?;

        let status = response.status();
        let url = response.url().to_string();
        let body = response.json::<Value>().await.ok();
        Ok(ConnectionCheck { status, url, body })
    }

    async fn register_token(
        &self,
        host: &str,
        port: u16,
        credentials: &DeviceCredentials,
    ) -> Result<String, TokenError> {
        let url = format!("{}{}", device_base_url(host, port), TOKEN_PATH);
        info!(url = %url, username = %credentials.username, "Requesting device API token");

        let response = self
            .http
            .post(&url)
            .json(&TokenAuthRequest {
                username: &credentials.username,
                password: &credentials.password,
            })
            .timeout(INTERACTIVE_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;

        response
            .json::<TokenAuthResponse>()
            .await?
            .token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or(TokenError::MissingToken)
    }
}
