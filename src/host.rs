//! Seams to the host HR system: the employee directory and the attendance
//! record store. The sync engine only ever reads employees and creates
//! checkins; it never updates or deletes a record.

use std::future::Future;

use chrono::NaiveDateTime;

use crate::error::HostResult;
use crate::sync::event::Direction;

/// Employee fields a device code can be matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmployeeField {
    EmployeeNumber,
    LinkedUserId,
    /// Not present in every host schema.
    AttendanceDeviceId,
}

impl EmployeeField {
    pub fn fieldname(self) -> &'static str {
        match self {
            Self::EmployeeNumber => "employee_number",
            Self::LinkedUserId => "user_id",
            Self::AttendanceDeviceId => "attendance_device_id",
        }
    }

    pub fn is_optional(self) -> bool {
        matches!(self, Self::AttendanceDeviceId)
    }
}

pub trait EmployeeDirectory: Send + Sync {
    fn lookup(
        &self,
        field: EmployeeField,
        value: &str,
    ) -> impl Future<Output = HostResult<Option<String>>> + Send;

    /// Whether the host schema defines `field` at all.
    fn has_field(&self, field: EmployeeField) -> impl Future<Output = HostResult<bool>> + Send;

    fn employee_name(
        &self,
        employee_id: &str,
    ) -> impl Future<Output = HostResult<Option<String>>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckinFilter {
    Exact {
        employee: String,
        time: NaiveDateTime,
        device_id: String,
    },
    /// Inclusive time range for one employee on any label of one terminal.
    Near {
        employee: String,
        terminal: String,
        from: NaiveDateTime,
        to: NaiveDateTime,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCheckin {
    pub employee: String,
    pub time: NaiveDateTime,
    pub log_type: Direction,
    pub device_id: String,
}

pub trait AttendanceStore: Send + Sync {
    fn exists(&self, filter: &CheckinFilter) -> impl Future<Output = HostResult<bool>> + Send;

    /// Returns the host's id for the new record.
    fn insert(&self, record: &NewCheckin) -> impl Future<Output = HostResult<String>> + Send;

    fn count_since(&self, since: NaiveDateTime) -> impl Future<Output = HostResult<u64>> + Send;
}
