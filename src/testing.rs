//! In-memory doubles and a throwaway HTTP server shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::io;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE, HOST, HeaderMap};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use serde_json::{Value, json};

use crate::client::iclock::models::RawTransaction;
use crate::client::iclock::services::DeviceConnection;
use crate::config::sync_config::StateLease;
use crate::config::{ConfigStore, DeviceCredentials, SyncConfig};
use crate::error::{ConfigError, ConfigResult, FetchError, FetchResult, HostError, HostResult, TokenError};
use crate::host::{AttendanceStore, CheckinFilter, EmployeeDirectory, EmployeeField, NewCheckin};
use crate::sync::clock::Clock;
use crate::sync::event::is_label_of;
use crate::sync::fetcher::{ConnectionCheck, SyncWindow, TransactionSource};
use crate::sync::identity::IdentityResolver;
use crate::sync::normalizer::Normalizer;
use crate::sync::orchestrator::SyncEngine;
use crate::sync::writer::CheckinWriter;

pub fn at(date: (i32, u32, u32), h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(date.0, date.1, date.2)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

// ---- stub HTTP server ----

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub host: String,
    pub authorization: Option<String>,
    pub body: Vec<u8>,
}

pub struct StubReply {
    status: u16,
    content_type: &'static str,
    body: String,
}

impl StubReply {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.to_string(),
        }
    }

    fn into_response(self) -> Response<Body> {
        Response::builder()
            .status(StatusCode::from_u16(self.status).unwrap())
            .header(CONTENT_TYPE, self.content_type)
            .body(Body::from(self.body))
            .unwrap()
    }
}

pub struct StubServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl StubServer {
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn header(headers: &HeaderMap, name: hyper::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Serves `handler` on an ephemeral localhost port, recording every request.
pub async fn spawn_stub<F>(handler: F) -> StubServer
where
    F: Fn(&CapturedRequest) -> StubReply + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    let requests = Arc::new(Mutex::new(Vec::new()));

    let make_service = {
        let requests = requests.clone();
        make_service_fn(move |_conn| {
            let handler = handler.clone();
            let requests = requests.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |request: Request<Body>| {
                    let handler = handler.clone();
                    let requests = requests.clone();
                    async move {
                        let (parts, body) = request.into_parts();
                        let body = hyper::body::to_bytes(body)
                            .await
                            .map(|bytes| bytes.to_vec())
                            .unwrap_or_default();
                        let captured = CapturedRequest {
                            method: parts.method.to_string(),
                            path: parts.uri.path().to_string(),
                            query: parts.uri.query().map(str::to_string),
                            host: header(&parts.headers, HOST).unwrap_or_default(),
                            authorization: header(&parts.headers, AUTHORIZATION),
                            body,
                        };
                        let reply = handler(&captured);
                        requests.lock().unwrap().push(captured);
                        Ok::<_, Infallible>(reply.into_response())
                    }
                }))
            }
        })
    };

    let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_service);
    let addr = server.local_addr();
    tokio::spawn(server);
    StubServer { addr, requests }
}

// ---- host double ----

#[derive(Debug, Clone)]
pub struct TestEmployee {
    id: String,
    employee_number: String,
    user_id: Option<String>,
    attendance_device_id: Option<String>,
}

pub fn employee(id: &str, employee_number: &str) -> TestEmployee {
    TestEmployee {
        id: id.to_string(),
        employee_number: employee_number.to_string(),
        user_id: None,
        attendance_device_id: None,
    }
}

impl TestEmployee {
    pub fn with_user_id(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn with_device_id(mut self, device_id: &str) -> Self {
        self.attendance_device_id = Some(device_id.to_string());
        self
    }

    fn value(&self, field: EmployeeField) -> Option<&str> {
        match field {
            EmployeeField::EmployeeNumber => Some(&self.employee_number),
            EmployeeField::LinkedUserId => self.user_id.as_deref(),
            EmployeeField::AttendanceDeviceId => self.attendance_device_id.as_deref(),
        }
    }
}

pub struct MemoryHost {
    employees: Vec<TestEmployee>,
    device_id_field: bool,
    failing_inserts_for: Option<String>,
    failing_counts: bool,
    checkins: Mutex<Vec<NewCheckin>>,
    lookups: Mutex<HashMap<EmployeeField, usize>>,
}

impl MemoryHost {
    pub fn new(employees: Vec<TestEmployee>) -> Self {
        Self {
            employees,
            device_id_field: true,
            failing_inserts_for: None,
            failing_counts: false,
            checkins: Mutex::new(Vec::new()),
            lookups: Mutex::new(HashMap::new()),
        }
    }

    pub fn without_device_id_field(mut self) -> Self {
        self.device_id_field = false;
        self
    }

    pub fn failing_inserts_for(mut self, employee: &str) -> Self {
        self.failing_inserts_for = Some(employee.to_string());
        self
    }

    pub fn failing_counts(mut self) -> Self {
        self.failing_counts = true;
        self
    }

    pub fn seed(&self, record: NewCheckin) {
        self.checkins.lock().unwrap().push(record);
    }

    pub fn checkins(&self) -> Vec<NewCheckin> {
        self.checkins.lock().unwrap().clone()
    }

    pub fn lookups(&self, field: EmployeeField) -> usize {
        self.lookups.lock().unwrap().get(&field).copied().unwrap_or(0)
    }

    pub fn total_lookups(&self) -> usize {
        self.lookups.lock().unwrap().values().sum()
    }
}

impl EmployeeDirectory for MemoryHost {
    async fn lookup(&self, field: EmployeeField, value: &str) -> HostResult<Option<String>> {
        *self.lookups.lock().unwrap().entry(field).or_default() += 1;
        Ok(self
            .employees
            .iter()
            .find(|e| e.value(field) == Some(value))
            .map(|e| e.id.clone()))
    }

    async fn has_field(&self, field: EmployeeField) -> HostResult<bool> {
        Ok(field != EmployeeField::AttendanceDeviceId || self.device_id_field)
    }

    async fn employee_name(&self, employee_id: &str) -> HostResult<Option<String>> {
        Ok(self
            .employees
            .iter()
            .find(|e| e.id == employee_id)
            .map(|e| format!("Employee {}", e.id)))
    }
}

impl AttendanceStore for MemoryHost {
    async fn exists(&self, filter: &CheckinFilter) -> HostResult<bool> {
        let checkins = self.checkins.lock().unwrap();
        Ok(checkins.iter().any(|c| match filter {
            CheckinFilter::Exact {
                employee,
                time,
                device_id,
            } => &c.employee == employee && &c.time == time && &c.device_id == device_id,
            CheckinFilter::Near {
                employee,
                terminal,
                from,
                to,
            } => {
                &c.employee == employee
                    && is_label_of(&c.device_id, terminal)
                    && c.time >= *from
                    && c.time <= *to
            }
        }))
    }

    async fn insert(&self, record: &NewCheckin) -> HostResult<String> {
        if self.failing_inserts_for.as_deref() == Some(record.employee.as_str()) {
            return Err(HostError::Payload("insert rejected".to_string()));
        }
        let mut checkins = self.checkins.lock().unwrap();
        checkins.push(record.clone());
        Ok(format!("EMP-CKIN-{:04}", checkins.len()))
    }

    async fn count_since(&self, since: NaiveDateTime) -> HostResult<u64> {
        if self.failing_counts {
            return Err(HostError::Payload("count unavailable".to_string()));
        }
        let checkins = self.checkins.lock().unwrap();
        Ok(checkins.iter().filter(|c| c.time >= since).count() as u64)
    }
}

// ---- config, clock, source doubles ----

pub struct MemoryConfigStore {
    config: Mutex<SyncConfig>,
    failing_loads: AtomicBool,
    failing_saves: AtomicBool,
    lease_held: AtomicBool,
}

impl MemoryConfigStore {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config: Mutex::new(config),
            failing_loads: AtomicBool::new(false),
            failing_saves: AtomicBool::new(false),
            lease_held: AtomicBool::new(false),
        }
    }

    pub fn set_failing_loads(&self, failing: bool) {
        self.failing_loads.store(failing, Ordering::SeqCst);
    }

    pub fn set_failing_saves(&self, failing: bool) {
        self.failing_saves.store(failing, Ordering::SeqCst);
    }

    /// Simulates another process holding the state lease.
    pub fn set_lease_held(&self, held: bool) {
        self.lease_held.store(held, Ordering::SeqCst);
    }

    fn io_failure(what: &str) -> ConfigError {
        ConfigError::StateIo {
            path: "memory".to_string(),
            source: io::Error::other(format!("{what} rejected")),
        }
    }

    pub fn current(&self) -> SyncConfig {
        self.config.lock().unwrap().clone()
    }

    pub fn replace(&self, config: SyncConfig) {
        *self.config.lock().unwrap() = config;
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> ConfigResult<SyncConfig> {
        if self.failing_loads.load(Ordering::SeqCst) {
            return Err(Self::io_failure("load"));
        }
        Ok(self.current())
    }

    fn save(&self, config: &SyncConfig) -> ConfigResult<()> {
        if self.failing_saves.load(Ordering::SeqCst) {
            return Err(Self::io_failure("save"));
        }
        self.replace(config.clone());
        Ok(())
    }

    fn try_lease(&self) -> ConfigResult<Option<StateLease>> {
        if self.lease_held.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(StateLease::unguarded()))
    }
}

pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl Default for FixedClock {
    fn default() -> Self {
        Self::at(at((2024, 1, 1), 12, 0, 0))
    }
}

impl FixedClock {
    pub fn at(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap()
    }
}

/// Hands out queued fetch results in order, then empty batches.
#[derive(Default)]
pub struct StubSource {
    results: Mutex<VecDeque<FetchResult<Vec<RawTransaction>>>>,
    calls: Mutex<Vec<(String, SyncWindow)>>,
    check: Mutex<Option<ConnectionCheck>>,
    token: Option<String>,
    token_requests: AtomicUsize,
}

impl StubSource {
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    pub fn with_connection_check(self, check: ConnectionCheck) -> Self {
        *self.check.lock().unwrap() = Some(check);
        self
    }

    pub fn push_batch(&self, items: Vec<Value>) {
        let batch = items.into_iter().map(RawTransaction::from_value).collect();
        self.results.lock().unwrap().push_back(Ok(batch));
    }

    pub fn push_failure(&self, error: FetchError) {
        self.results.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> Vec<SyncWindow> {
        self.calls.lock().unwrap().iter().map(|(_, w)| *w).collect()
    }

    /// Bearer token sent with each fetch.
    pub fn tokens_sent(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }
}

impl TransactionSource for StubSource {
    async fn fetch(
        &self,
        device: &DeviceConnection,
        window: &SyncWindow,
    ) -> FetchResult<Vec<RawTransaction>> {
        self.calls.lock().unwrap().push((device.token.clone(), *window));
        self.results.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
    }

    async fn check_connection(
        &self,
        device: &DeviceConnection,
        window: &SyncWindow,
    ) -> FetchResult<ConnectionCheck> {
        let default = ConnectionCheck {
            status: reqwest::StatusCode::OK,
            url: format!("{}?start_time={}", device.transactions_url(), window.start_param()),
            body: Some(json!([])),
        };
        Ok(self.check.lock().unwrap().clone().unwrap_or(default))
    }

    async fn register_token(
        &self,
        _host: &str,
        _port: u16,
        _credentials: &DeviceCredentials,
    ) -> Result<String, TokenError> {
        self.token_requests.fetch_add(1, Ordering::SeqCst);
        self.token.clone().ok_or(TokenError::MissingToken)
    }
}

// Tests share doubles with the engine through `Arc`.

impl<T: EmployeeDirectory> EmployeeDirectory for Arc<T> {
    fn lookup(
        &self,
        field: EmployeeField,
        value: &str,
    ) -> impl Future<Output = HostResult<Option<String>>> + Send {
        (**self).lookup(field, value)
    }

    fn has_field(&self, field: EmployeeField) -> impl Future<Output = HostResult<bool>> + Send {
        (**self).has_field(field)
    }

    fn employee_name(
        &self,
        employee_id: &str,
    ) -> impl Future<Output = HostResult<Option<String>>> + Send {
        (**self).employee_name(employee_id)
    }
}

impl<T: AttendanceStore> AttendanceStore for Arc<T> {
    fn exists(&self, filter: &CheckinFilter) -> impl Future<Output = HostResult<bool>> + Send {
        (**self).exists(filter)
    }

    fn insert(&self, record: &NewCheckin) -> impl Future<Output = HostResult<String>> + Send {
        (**self).insert(record)
    }

    fn count_since(&self, since: NaiveDateTime) -> impl Future<Output = HostResult<u64>> + Send {
        (**self).count_since(since)
    }
}

impl<T: TransactionSource> TransactionSource for Arc<T> {
    fn fetch(
        &self,
        device: &DeviceConnection,
        window: &SyncWindow,
    ) -> impl Future<Output = FetchResult<Vec<RawTransaction>>> + Send {
        (**self).fetch(device, window)
    }

    fn check_connection(
        &self,
        device: &DeviceConnection,
        window: &SyncWindow,
    ) -> impl Future<Output = FetchResult<ConnectionCheck>> + Send {
        (**self).check_connection(device, window)
    }

    fn register_token(
        &self,
        host: &str,
        port: u16,
        credentials: &DeviceCredentials,
    ) -> impl Future<Output = Result<String, TokenError>> + Send {
        (**self).register_token(host, port, credentials)
    }
}

impl<T: ConfigStore + ?Sized> ConfigStore for Arc<T> {
    fn load(&self) -> ConfigResult<SyncConfig> {
        (**self).load()
    }

    fn save(&self, config: &SyncConfig) -> ConfigResult<()> {
        (**self).save(config)
    }

    fn try_lease(&self) -> ConfigResult<Option<StateLease>> {
        (**self).try_lease()
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> NaiveDateTime {
        (**self).now()
    }
}

pub fn enabled_config(interval_seconds: u64) -> SyncConfig {
    SyncConfig {
        server_host: Some("10.0.0.5".to_string()),
        server_port: Some(8081),
        bearer_token: Some("tok-1".to_string()),
        enable_sync: true,
        interval_seconds,
        ..SyncConfig::default()
    }
}

pub type TestEngine = SyncEngine<Arc<StubSource>, Arc<MemoryHost>>;

pub fn engine_with(
    source: Arc<StubSource>,
    host: Arc<MemoryHost>,
    config: Arc<MemoryConfigStore>,
    clock: Arc<FixedClock>,
) -> TestEngine {
    SyncEngine::new(
        source,
        host,
        Box::new(config),
        Box::new(clock),
        Normalizer::new(IdentityResolver::default(), Tz::UTC),
        CheckinWriter::default(),
    )
}
