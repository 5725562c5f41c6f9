use std::collections::HashSet;
use std::time::Duration;

use chrono::NaiveDateTime;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::client::frappe::models::{
    CHECKIN_DOCTYPE, CheckinRequest, CountResponse, DocResponse, DoctypeResponse, EMPLOYEE_DOCTYPE,
    EmployeeDoc, HOST_TIME_FORMAT, ListResponse, NameRow,
};
use crate::config::FrappeSettings;
use crate::error::{HostError, HostResult};
use crate::host::{AttendanceStore, CheckinFilter, EmployeeDirectory, EmployeeField, NewCheckin};
use crate::sync::event::suffixed_label_pattern;

const HOST_TIMEOUT: Duration = Duration::from_secs(30);

fn host_time(time: &NaiveDateTime) -> String {
    time.format(HOST_TIME_FORMAT).to_string()
}

fn resource_path(doctype: &str) -> String {
    format!("/api/resource/{}", urlencoding::encode(doctype))
}

fn document_path(doctype: &str, name: &str) -> String {
    format!("{}/{}", resource_path(doctype), urlencoding::encode(name))
}

/// Frappe / ERPNext REST client acting as employee directory and checkin store.
#[derive(Debug)]
pub struct FrappeClient {
    http: reqwest::Client,
    base_url: String,
    employee_fields: OnceCell<HashSet<String>>,
}

impl FrappeClient {
    pub fn new(settings: &FrappeSettings) -> HostResult<Self> {
        let mut headers = HeaderMap::new();
        let token = format!("token {}:{}", settings.api_key, settings.api_secret);
        let mut authorization = HeaderValue::from_str(&token)
            .map_err(|_| HostError::Payload("API key contains invalid characters".to_string()))?;
        authorization.set_sensitive(true);
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(HOST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: settings.url.trim_end_matches('/').to_string(),
            employee_fields: OnceCell::new(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> HostResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, ?query, "Host GET");
        let response = self.http.get(&url).query(query).send().await?;
        Self::read(response).await
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> HostResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HostError::Status { status, body });
        }
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| HostError::Payload(e.to_string()))
    }

    /// Name of the first document of `doctype` matching all `filters` and,
    /// when given, any of `or_filters`.
    async fn first_match(
        &self,
        doctype: &str,
        filters: Value,
        or_filters: Option<Value>,
    ) -> HostResult<Option<String>> {
        let mut query = vec![
            ("filters", filters.to_string()),
            ("fields", json!(["name"]).to_string()),
            ("limit_page_length", "1".to_string()),
        ];
        if let Some(or_filters) = or_filters {
            query.push(("or_filters", or_filters.to_string()));
        }
        let rows: ListResponse<NameRow> = self.get(&resource_path(doctype), &query).await?;
        Ok(rows.data.into_iter().next().map(|row| row.name))
    }

    async fn employee_fieldnames(&self) -> HostResult<&HashSet<String>> {
        self.employee_fields
            .get_or_try_init(|| async {
                let meta: DoctypeResponse = self
                    .get(
                        "/api/method/frappe.desk.form.load.getdoctype",
                        &[("doctype", EMPLOYEE_DOCTYPE.to_string())],
                    )
                    .await?;
                let fields: HashSet<String> = meta
                    .docs
                    .into_iter()
                    .flat_map(|doc| doc.fields)
                    .filter_map(|field| field.fieldname)
                    .collect();
                debug!(count = fields.len(), "Loaded Employee schema");
                Ok::<_, HostError>(fields)
            })
            .await
    }
}

impl EmployeeDirectory for FrappeClient {
    async fn lookup(&self, field: EmployeeField, value: &str) -> HostResult<Option<String>> {
        self.first_match(
            EMPLOYEE_DOCTYPE,
            json!([[field.fieldname(), "=", value]]),
            None,
        )
        .await
    }

    async fn has_field(&self, field: EmployeeField) -> HostResult<bool> {
        if !field.is_optional() {
            return Ok(true);
        }
        Ok(self.employee_fieldnames().await?.contains(field.fieldname()))
    }

    async fn employee_name(&self, employee_id: &str) -> HostResult<Option<String>> {
        let path = document_path(EMPLOYEE_DOCTYPE, employee_id);
        match self.get::<DocResponse<EmployeeDoc>>(&path, &[]).await {
            Ok(doc) => Ok(doc.data.employee_name.or(Some(doc.data.name))),
            Err(HostError::Status { status, .. }) if status == reqwest::StatusCode::NOT_FOUND => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// `filters` and optional `or_filters` for a checkin lookup. A near match
/// accepts the bare terminal label or any id-suffixed form of it.
fn checkin_filters(filter: &CheckinFilter) -> (Value, Option<Value>) {
    match filter {
        CheckinFilter::Exact {
            employee,
            time,
            device_id,
        } => (
            json!([
                ["employee", "=", employee],
                ["time", "=", host_time(time)],
                ["device_id", "=", device_id],
            ]),
            None,
        ),
        CheckinFilter::Near {
            employee,
            terminal,
            from,
            to,
        } => (
            json!([
                ["employee", "=", employee],
                ["time", ">=", host_time(from)],
                ["time", "<=", host_time(to)],
            ]),
            Some(json!([
                ["device_id", "=", terminal],
                ["device_id", "like", suffixed_label_pattern(terminal)],
            ])),
        ),
    }
}

impl AttendanceStore for FrappeClient {
    async fn exists(&self, filter: &CheckinFilter) -> HostResult<bool> {
        let (filters, or_filters) = checkin_filters(filter);
        Ok(self
            .first_match(CHECKIN_DOCTYPE, filters, or_filters)
            .await?
            .is_some())
    }

    async fn insert(&self, record: &NewCheckin) -> HostResult<String> {
        let url = format!("{}{}", self.base_url, resource_path(CHECKIN_DOCTYPE));
        let body = CheckinRequest {
            employee: &record.employee,
            time: host_time(&record.time),
            log_type: record.log_type.as_str(),
            device_id: &record.device_id,
        };
        let response = self.http.post(&url).json(&body).send().await?;
        let created: DocResponse<NameRow> = Self::read(response).await?;
        Ok(created.data.name)
    }

    async fn count_since(&self, since: NaiveDateTime) -> HostResult<u64> {
        let count: CountResponse = self
            .get(
                "/api/method/frappe.client.get_count",
                &[
                    ("doctype", CHECKIN_DOCTYPE.to_string()),
                    ("filters", json!([["time", ">=", host_time(&since)]]).to_string()),
                ],
            )
            .await?;
        Ok(count.message)
    }
}
