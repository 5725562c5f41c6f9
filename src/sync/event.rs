use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;

use crate::client::iclock::models::RawTransaction;
use crate::host::NewCheckin;

pub const FALLBACK_DEVICE_LABEL: &str = "ZKTeco Device";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// `punch_state == "1"` or a "Check Out" display label means OUT,
    /// anything else is IN.
    pub fn classify(punch_state: Option<&str>, punch_state_display: Option<&str>) -> Self {
        if punch_state == Some("1") || punch_state_display == Some("Check Out") {
            Self::Out
        } else {
            Self::In
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::In => "IN",
            Self::Out => "OUT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal alias, then serial, then a fixed fallback.
pub fn device_label(raw: &RawTransaction) -> String {
    raw.terminal_alias
        .as_deref()
        .or(raw.terminal_sn.as_deref())
        .unwrap_or(FALLBACK_DEVICE_LABEL)
        .to_string()
}

const ID_SUFFIX_OPEN: &str = " (ZKTeco-";

/// Label as persisted: suffixed with the transaction id when there is one.
pub fn persisted_label(label: &str, transaction_id: Option<&str>) -> String {
    match transaction_id {
        Some(id) => format!("{label}{ID_SUFFIX_OPEN}{id})"),
        None => label.to_string(),
    }
}

/// Whether a persisted label was produced for `terminal`, with any id.
pub fn is_label_of(device_id: &str, terminal: &str) -> bool {
    device_id
        .strip_prefix(terminal)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(ID_SUFFIX_OPEN))
}

/// SQL `LIKE` pattern matching every id-suffixed label of `terminal`.
pub fn suffixed_label_pattern(terminal: &str) -> String {
    format!("{terminal}{ID_SUFFIX_OPEN}%")
}

/// A device transaction resolved to an employee and ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckinEvent {
    pub employee_id: String,
    pub emp_code: String,
    pub time: NaiveDateTime,
    pub direction: Direction,
    /// Persisted label, id suffix included.
    pub device_label: String,
    /// Terminal alias or serial the punch came from.
    pub terminal: String,
    pub transaction_id: Option<String>,
    pub raw: Value,
}

impl From<&CheckinEvent> for NewCheckin {
    fn from(event: &CheckinEvent) -> Self {
        Self {
            employee: event.employee_id.clone(),
            time: event.time,
            log_type: event.direction,
            device_id: event.device_label.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn direction_follows_state_or_display() {
        let cases = [
            (Some("1"), None, Direction::Out),
            (Some("1"), Some("Check In"), Direction::Out),
            (Some("0"), Some("Check Out"), Direction::Out),
            (None, Some("Check Out"), Direction::Out),
            (Some("0"), Some("Check In"), Direction::In),
            (Some("4"), Some("Overtime In"), Direction::In),
            (Some("5"), Some("Overtime Out"), Direction::In),
            (None, None, Direction::In),
        ];
        for (state, display, expected) in cases {
            assert_eq!(
                Direction::classify(state, display),
                expected,
                "state={state:?} display={display:?}"
            );
        }
    }

    #[test]
    fn device_label_prefers_alias_then_serial() {
        let mut raw = RawTransaction::from_value(json!({
            "terminal_alias": "Gate A",
            "terminal_sn": "CKJ1234"
        }));
        assert_eq!(device_label(&raw), "Gate A");
        raw.terminal_alias = None;
        assert_eq!(device_label(&raw), "CKJ1234");
        raw.terminal_sn = None;
        assert_eq!(device_label(&raw), "ZKTeco Device");
    }

    #[test]
    fn persisted_label_carries_the_transaction_id() {
        assert_eq!(persisted_label("Gate A", Some("991")), "Gate A (ZKTeco-991)");
        assert_eq!(persisted_label("Gate A", None), "Gate A");
    }

    #[test]
    fn suffixed_labels_belong_to_their_terminal_only() {
        assert!(is_label_of("Gate A", "Gate A"));
        assert!(is_label_of("Gate A (ZKTeco-17)", "Gate A"));
        assert!(!is_label_of("Gate AB", "Gate A"));
        assert!(!is_label_of("Gate AB (ZKTeco-17)", "Gate A"));
        assert!(!is_label_of("Gate", "Gate A"));
        assert_eq!(suffixed_label_pattern("Gate A"), "Gate A (ZKTeco-%");
    }

    #[test]
    fn direction_serializes_as_log_type() {
        assert_eq!(serde_json::to_value(Direction::Out).unwrap(), json!("OUT"));
    }
}
