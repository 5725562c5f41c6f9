use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;

use crate::client::iclock::models::{PunchTime, RawTransaction};
use crate::error::RecordError;
use crate::host::EmployeeDirectory;
use crate::sync::event::{CheckinEvent, Direction, device_label, persisted_label};
use crate::sync::identity::IdentityResolver;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
];

/// Turns raw device transactions into checkin events.
#[derive(Debug, Clone)]
pub struct Normalizer {
    resolver: IdentityResolver,
    timezone: Tz,
}

impl Normalizer {
    pub fn new(resolver: IdentityResolver, timezone: Tz) -> Self {
        Self { resolver, timezone }
    }

    pub async fn normalize<D: EmployeeDirectory>(
        &self,
        directory: &D,
        raw: RawTransaction,
    ) -> Result<CheckinEvent, RecordError> {
        let emp_code = raw.emp_code.clone().ok_or(RecordError::MissingField("emp_code"))?;
        let punch_time = raw
            .punch_time
            .as_ref()
            .ok_or(RecordError::MissingField("punch_time"))?;

        let employee_id = self
            .resolver
            .resolve(directory, &emp_code)
            .await
            .map_err(RecordError::Lookup)?
            .ok_or_else(|| RecordError::UnresolvedEmployee(emp_code.clone()))?;

        let time = parse_punch_time(punch_time, self.timezone)?;
        let direction = Direction::classify(
            raw.punch_state.as_deref(),
            raw.punch_state_display.as_deref(),
        );
        let terminal = device_label(&raw);
        let device_label = persisted_label(&terminal, raw.id.as_deref());

        Ok(CheckinEvent {
            employee_id,
            emp_code,
            time,
            direction,
            device_label,
            terminal,
            transaction_id: raw.id,
            raw: raw.payload,
        })
    }
}

/// Device-local punch time, truncated to whole seconds. Offsets and unix
/// timestamps are converted into the device timezone.
pub fn parse_punch_time(value: &PunchTime, timezone: Tz) -> Result<NaiveDateTime, RecordError> {
    let parsed = match value {
        PunchTime::Epoch(seconds) => DateTime::<Utc>::from_timestamp(*seconds, 0)
            .map(|utc| utc.with_timezone(&timezone).naive_local()),
        PunchTime::Text(text) => parse_text(text.trim(), timezone),
    };
    let invalid = || {
        RecordError::InvalidTimestamp(match value {
            PunchTime::Epoch(seconds) => seconds.to_string(),
            PunchTime::Text(text) => text.clone(),
        })
    };
    parsed.and_then(|t| t.with_nanosecond(0)).ok_or_else(invalid)
}

fn parse_text(text: &str, timezone: Tz) -> Option<NaiveDateTime> {
    if let Ok(with_offset) = DateTime::parse_from_rfc3339(text) {
        return Some(with_offset.with_timezone(&timezone).naive_local());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}
