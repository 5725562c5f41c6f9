use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Punch time as reported by the device: usually a local date-time string,
/// occasionally a unix timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PunchTime {
    Text(String),
    Epoch(i64),
}

/// One device transaction. Every field is optional and tolerant of the
/// device sending numbers where strings are expected.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTransaction {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub emp_code: Option<String>,
    #[serde(default, deserialize_with = "lenient_punch_time")]
    pub punch_time: Option<PunchTime>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub punch_state: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub punch_state_display: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub terminal_sn: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub terminal_alias: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub verify_type_display: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub first_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub department: Option<String>,
    #[serde(skip)]
    pub payload: Value,
}

impl RawTransaction {
    /// Never fails: items that are not objects come back with every field empty
    /// and are rejected later by the normalizer.
    pub fn from_value(value: Value) -> Self {
        let mut raw = RawTransaction::deserialize(&value).unwrap_or_default();
        raw.payload = value;
        raw
    }

    /// Name as enrolled on the device, first and last joined.
    pub fn person_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(scalar_to_string))
}

fn lenient_punch_time<'de, D>(deserializer: D) -> Result<Option<PunchTime>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64().map(PunchTime::Epoch),
        Some(other) => scalar_to_string(other).map(PunchTime::Text),
        None => None,
    })
}

/// The transactions endpoint answers in several shapes; they are resolved
/// once here and everything downstream sees a plain list.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionEnvelope {
    List(Vec<Value>),
    ObjectWithData { items: Vec<Value>, next: Option<String> },
    ObjectWithResults { items: Vec<Value>, next: Option<String> },
    Unrecognized(Value),
}

impl TransactionEnvelope {
    pub fn classify(body: Value) -> Self {
        match body {
            Value::Array(items) => Self::List(items),
            Value::Object(mut map) => {
                let next = map.get("next").cloned().and_then(scalar_to_string);
                match (map.remove("data"), map.remove("results")) {
                    (Some(Value::Array(items)), _) => Self::ObjectWithData { items, next },
                    (_, Some(Value::Array(items))) => Self::ObjectWithResults { items, next },
                    (data, results) => {
                        if let Some(data) = data {
                            map.insert("data".to_string(), data);
                        }
                        if let Some(results) = results {
                            map.insert("results".to_string(), results);
                        }
                        Self::Unrecognized(Value::Object(map))
                    }
                }
            }
            other => Self::Unrecognized(other),
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }

    pub fn next_page(&self) -> Option<&str> {
        match self {
            Self::ObjectWithData { next, .. } | Self::ObjectWithResults { next, .. } => {
                next.as_deref()
            }
            _ => None,
        }
    }

    pub fn into_transactions(self) -> Vec<RawTransaction> {
        match self {
            Self::List(items)
            | Self::ObjectWithData { items, .. }
            | Self::ObjectWithResults { items, .. } => {
                items.into_iter().map(RawTransaction::from_value).collect()
            }
            Self::Unrecognized(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenAuthResponse {
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenAuthRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}
