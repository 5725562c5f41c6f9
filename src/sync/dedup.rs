use chrono::Duration;
use tracing::debug;

use crate::error::HostResult;
use crate::host::{AttendanceStore, CheckinFilter};
use crate::sync::event::CheckinEvent;

/// Terminals may report one physical punch with a few seconds of jitter
/// across polling windows.
pub const FUZZY_TOLERANCE_SECONDS: i64 = 5;

#[derive(Debug, Clone, Copy)]
pub struct DedupGuard {
    tolerance: Duration,
}

impl Default for DedupGuard {
    fn default() -> Self {
        Self::new(Duration::seconds(FUZZY_TOLERANCE_SECONDS))
    }
}

impl DedupGuard {
    pub fn new(tolerance: Duration) -> Self {
        Self { tolerance }
    }

    /// True when `event` is already recorded: exactly, under its own label,
    /// or within the tolerance under any label of the same terminal. The
    /// fuzzy check ignores the id suffix since a resend carries a new id.
    pub async fn already_recorded<A: AttendanceStore>(
        &self,
        store: &A,
        event: &CheckinEvent,
    ) -> HostResult<bool> {
        let employee = event.employee_id.as_str();
        let time = event.time;
        let exact = CheckinFilter::Exact {
            employee: employee.to_string(),
            time,
            device_id: event.device_label.clone(),
        };
        if store.exists(&exact).await? {
            debug!(employee, %time, device = %event.device_label, "Exact checkin already recorded");
            return Ok(true);
        }

        let near = CheckinFilter::Near {
            employee: employee.to_string(),
            terminal: event.terminal.clone(),
            from: time - self.tolerance,
            to: time + self.tolerance,
        };
        let found = store.exists(&near).await?;
        if found {
            debug!(employee, %time, terminal = %event.terminal, "Checkin within tolerance already recorded");
        }
        Ok(found)
    }
}
