use chrono::{NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;

/// Wall clock in device-local time.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy)]
pub struct DeviceClock {
    timezone: Tz,
}

impl DeviceClock {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }
}

impl Clock for DeviceClock {
    fn now(&self) -> NaiveDateTime {
        let now = Utc::now().with_timezone(&self.timezone).naive_local();
        now.with_nanosecond(0).unwrap_or(now)
    }
}
