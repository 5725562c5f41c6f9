use serde::{Deserialize, Serialize};

/// Frappe datetime fields use the same layout as the device.
pub const HOST_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const EMPLOYEE_DOCTYPE: &str = "Employee";
pub const CHECKIN_DOCTYPE: &str = "Employee Checkin";

#[derive(Deserialize, Debug)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[derive(Deserialize, Debug)]
pub struct DocResponse<T> {
    pub data: T,
}

#[derive(Deserialize, Debug)]
pub struct NameRow {
    pub name: String,
}

#[derive(Deserialize, Debug)]
pub struct EmployeeDoc {
    pub name: String,
    pub employee_name: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct CountResponse {
    pub message: u64,
}

#[derive(Deserialize, Debug)]
pub struct DoctypeResponse {
    #[serde(default)]
    pub docs: Vec<DoctypeDoc>,
}

#[derive(Deserialize, Debug)]
pub struct DoctypeDoc {
    #[serde(default)]
    pub fields: Vec<DocField>,
}

#[derive(Deserialize, Debug)]
pub struct DocField {
    pub fieldname: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct CheckinRequest<'a> {
    pub employee: &'a str,
    pub time: String,
    pub log_type: &'static str,
    pub device_id: &'a str,
}
