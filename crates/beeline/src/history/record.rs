//! Raw history records as the service returns them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Event types starting with this prefix are decision-task bookkeeping
/// (`DecisionTaskScheduled`, `DecisionTaskStarted`, ...), not business events.
pub const DECISION_EVENT_PREFIX: &str = "Decision";

/// One undecoded history record.
///
/// The wire shape is `{"eventId", "eventType", "eventTimestamp",
/// "<lowerCamelType>EventAttributes": {...}}`; every key other than the
/// first three is kept in [`attributes`](Self::attributes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    /// Service-assigned, strictly increasing id.
    pub event_id: u64,
    /// Event type name, e.g. `ActivityTaskScheduled`.
    pub event_type: String,
    /// Seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_timestamp: Option<f64>,
    /// Remaining keys, normally a single attributes object.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl HistoryRecord {
    /// Build a record whose attributes object sits under the conventional key.
    pub fn new(event_id: u64, event_type: impl Into<String>, attributes: Value) -> Self {
        let event_type = event_type.into();
        let mut map = Map::new();
        map.insert(attributes_key(&event_type), attributes);
        Self {
            event_id,
            event_type,
            event_timestamp: None,
            attributes: map,
        }
    }

    /// Set the event timestamp.
    pub fn at(mut self, timestamp: OffsetDateTime) -> Self {
        self.event_timestamp = Some(timestamp.unix_timestamp_nanos() as f64 / 1e9);
        self
    }

    /// The attributes object for this record's type, if present.
    pub fn event_attributes(&self) -> Option<&Map<String, Value>> {
        self.attributes
            .get(&attributes_key(&self.event_type))
            .and_then(Value::as_object)
    }

    /// The timestamp as a date-time, if present and representable.
    pub fn timestamp(&self) -> Option<OffsetDateTime> {
        let secs = self.event_timestamp?;
        if !secs.is_finite() {
            return None;
        }
        OffsetDateTime::from_unix_timestamp_nanos((secs * 1e9) as i128).ok()
    }

    /// Whether this record is decision-task bookkeeping.
    pub fn is_decision_bookkeeping(&self) -> bool {
        self.event_type.starts_with(DECISION_EVENT_PREFIX)
    }
}

/// `TimerFired` -> `timerFiredEventAttributes`
pub fn attributes_key(event_type: &str) -> String {
    let mut chars = event_type.chars();
    match chars.next() {
        Some(first) => format!(
            "{}{}EventAttributes",
            first.to_ascii_lowercase(),
            chars.as_str()
        ),
        None => "EventAttributes".to_string(),
    }
}

/// Drop decision-task bookkeeping records, keeping the rest in order.
pub fn filter_decision_records(records: Vec<HistoryRecord>) -> Vec<HistoryRecord> {
    records
        .into_iter()
        .filter(|record| !record.is_decision_bookkeeping())
        .collect()
}
