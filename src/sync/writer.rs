use tracing::info;

use crate::error::RecordError;
use crate::host::{AttendanceStore, NewCheckin};
use crate::sync::dedup::DedupGuard;
use crate::sync::event::CheckinEvent;

/// Both variants are success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(String),
    AlreadyExists,
}

/// Creates checkin records, never touching one that already exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckinWriter {
    guard: DedupGuard,
}

impl CheckinWriter {
    pub fn new(guard: DedupGuard) -> Self {
        Self { guard }
    }

    pub async fn write<A: AttendanceStore>(
        &self,
        store: &A,
        event: &CheckinEvent,
    ) -> Result<WriteOutcome, RecordError> {
        let recorded = self
            .guard
            .already_recorded(store, event)
            .await
            .map_err(RecordError::Store)?;
        if recorded {
            return Ok(WriteOutcome::AlreadyExists);
        }

        let name = store
            .insert(&NewCheckin::from(event))
            .await
            .map_err(RecordError::Store)?;
        info!(
            checkin = %name,
            employee = %event.employee_id,
            time = %event.time,
            log_type = %event.direction,
            device = %event.device_label,
            "Created employee checkin"
        );
        Ok(WriteOutcome::Written(name))
    }
}
