//! Typed history events and the rules that decode raw records into them.

use std::collections::HashMap;

use serde_json::{Map, Value};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error};

use super::record::HistoryRecord;
use crate::codec::{CodecError, PayloadCodec};
use crate::task::{ActivityId, TypeRef};

/// History that contradicts the decoding rules.
///
/// Always fatal: the workflow is failed with reason `EventException`.
#[derive(Debug, Error)]
pub enum EventError {
    /// The record's type has no decoder.
    #[error("unrecognized history event '{event_type}' (event {event_id})")]
    UnrecognizedEvent {
        /// Id of the offending record.
        event_id: u64,
        /// Its type name.
        event_type: String,
    },

    /// A required attribute is missing or has the wrong shape.
    #[error("event {event_id} ({event_type}) is missing or has an invalid '{field}'")]
    MissingAttribute {
        /// Id of the offending record.
        event_id: u64,
        /// Its type name.
        event_type: String,
        /// Attribute path.
        field: &'static str,
    },

    /// A record this event must be joined with is not in the history.
    #[error("event {event_id} ({event_type}) refers to {reference}, which is not in the history")]
    MissingJoinedRecord {
        /// Id of the referring record.
        event_id: u64,
        /// Its type name.
        event_type: String,
        /// Description of the missing record.
        reference: String,
    },

    /// An activity id does not end in `-{attempt}`.
    #[error("event {event_id} carries malformed activity id '{activity_id}'")]
    MalformedActivityId {
        /// Id of the offending record.
        event_id: u64,
        /// The raw activity id.
        activity_id: String,
    },

    /// The service refused a `ScheduleActivityTask` decision.
    #[error("service refused to schedule {activity} ({activity_id}): {cause}")]
    ScheduleActivityFailed {
        /// `name@version` of the activity.
        activity: String,
        /// Id of the refused attempt.
        activity_id: String,
        /// Service-provided cause.
        cause: String,
    },

    /// An embedded payload could not be decoded.
    #[error("event {event_id} payload could not be decoded: {source}")]
    Payload {
        /// Id of the offending record.
        event_id: u64,
        /// Underlying codec failure.
        #[source]
        source: CodecError,
    },
}

/// A decoded history event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Service-assigned event id.
    pub id: u64,
    /// When the service recorded the event.
    pub timestamp: Option<OffsetDateTime>,
    /// Type-specific content.
    pub kind: EventKind,
}

/// One variant per history record type the decider understands.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// Always the first event of a run.
    WorkflowExecutionStarted(WorkflowStarted),
    /// An activity attempt was scheduled.
    ActivityTaskScheduled(ActivityScheduled),
    /// A worker picked up the attempt.
    ActivityTaskStarted {
        /// Id of the matching scheduled record.
        scheduled_event_id: Option<u64>,
    },
    /// The attempt finished successfully.
    ActivityTaskCompleted {
        /// Id of the matching scheduled record.
        scheduled_event_id: Option<u64>,
        /// Decoded result.
        result: Option<Value>,
    },
    /// The worker reported failure.
    ActivityTaskFailed {
        /// Join with the scheduled record.
        failure: ActivityFailure,
        /// Worker-provided reason.
        reason: Option<String>,
        /// Worker-provided details.
        details: Option<String>,
    },
    /// The service timed the attempt out.
    ActivityTaskTimedOut {
        /// Join with the scheduled record.
        failure: ActivityFailure,
        /// Which timeout elapsed, e.g. `SCHEDULE_TO_CLOSE`.
        timeout_type: Option<String>,
    },
    /// A timer was started.
    TimerStarted(TimerStarted),
    /// A timer fired.
    TimerFired(TimerFired),
}

impl EventKind {
    /// The wire event type name.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::WorkflowExecutionStarted(_) => "WorkflowExecutionStarted",
            EventKind::ActivityTaskScheduled(_) => "ActivityTaskScheduled",
            EventKind::ActivityTaskStarted { .. } => "ActivityTaskStarted",
            EventKind::ActivityTaskCompleted { .. } => "ActivityTaskCompleted",
            EventKind::ActivityTaskFailed { .. } => "ActivityTaskFailed",
            EventKind::ActivityTaskTimedOut { .. } => "ActivityTaskTimedOut",
            EventKind::TimerStarted(_) => "TimerStarted",
            EventKind::TimerFired(_) => "TimerFired",
        }
    }
}

/// Content of `WorkflowExecutionStarted`.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStarted {
    /// Workflow type; its version selects the entrypoint.
    pub workflow_type: TypeRef,
    /// Default tasklist of the run.
    pub tasklist: Option<String>,
    /// Decoded workflow input.
    pub input: Option<Value>,
}

/// Content of `ActivityTaskScheduled`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityScheduled {
    /// Id of this attempt.
    pub activity_id: ActivityId,
    /// Scheduled activity type.
    pub activity_type: TypeRef,
    /// Tasklist the attempt was routed to.
    pub tasklist: String,
    /// Decoded `{args, kwargs}` payload.
    pub input: Option<Value>,
}

/// What a retry needs to resend an attempt unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryTemplate {
    /// Id of the attempt that failed.
    pub activity_id: ActivityId,
    /// Activity type of the failed attempt.
    pub activity_type: TypeRef,
    /// Tasklist of the failed attempt.
    pub tasklist: String,
    /// Original input, still encoded.
    pub input: Option<String>,
}

/// A failed or timed-out attempt joined with its scheduled record.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityFailure {
    /// Id of the scheduled record.
    pub scheduled_event_id: u64,
    /// Template for rescheduling.
    pub retry: RetryTemplate,
}

/// Content of `TimerStarted`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerStarted {
    /// Timer id.
    pub timer_id: String,
    /// Seconds until the timer fires.
    pub start_to_fire_timeout: u64,
    /// Decoded control payload.
    pub control: Option<Value>,
}

/// Content of `TimerFired`, joined with its `TimerStarted`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerFired {
    /// Timer id.
    pub timer_id: String,
    /// Id of the matching `TimerStarted` record.
    pub started_event_id: u64,
    /// Control payload recovered from the `TimerStarted` record.
    pub control: Option<Value>,
}

/// Lookup structure over the full (filtered) history of one decision task.
///
/// Failure and timer-fired records are joined against it, so it must
/// contain every page, not just the events left on a cursor.
pub struct HistoryIndex<'a> {
    records: &'a [HistoryRecord],
    by_id: HashMap<u64, &'a HistoryRecord>,
}

impl<'a> HistoryIndex<'a> {
    /// Index a history.
    pub fn new(records: &'a [HistoryRecord]) -> Self {
        let by_id = records.iter().map(|r| (r.event_id, r)).collect();
        Self { records, by_id }
    }

    fn get(&self, event_id: u64) -> Option<&'a HistoryRecord> {
        self.by_id.get(&event_id).copied()
    }
}

/// Decode every record of a history, in order.
pub fn decode_history(
    records: &[HistoryRecord],
    codec: &dyn PayloadCodec,
) -> Result<Vec<Event>, EventError> {
    let index = HistoryIndex::new(records);
    records
        .iter()
        .map(|record| decode_event(record, &index, codec))
        .collect()
}

/// Decode one record, joining against `index` where the type requires it.
pub fn decode_event(
    record: &HistoryRecord,
    index: &HistoryIndex<'_>,
    codec: &dyn PayloadCodec,
) -> Result<Event, EventError> {
    debug!(event_id = record.event_id, event_type = %record.event_type, "Decoding history event");

    let decoder = Decoder { record, codec };
    let kind = match record.event_type.as_str() {
        "WorkflowExecutionStarted" => decoder.workflow_started()?,
        "ActivityTaskScheduled" => decoder.activity_scheduled()?,
        "ActivityTaskStarted" => EventKind::ActivityTaskStarted {
            scheduled_event_id: decoder
                .attributes()
                .ok()
                .and_then(|a| a.get("scheduledEventId"))
                .and_then(Value::as_u64),
        },
        "ActivityTaskCompleted" => decoder.activity_completed()?,
        "ActivityTaskFailed" => {
            let attrs = decoder.attributes()?;
            EventKind::ActivityTaskFailed {
                failure: decoder.activity_failure(index)?,
                reason: optional_string(attrs, "reason"),
                details: optional_string(attrs, "details"),
            }
        }
        "ActivityTaskTimedOut" => {
            let attrs = decoder.attributes()?;
            EventKind::ActivityTaskTimedOut {
                failure: decoder.activity_failure(index)?,
                timeout_type: optional_string(attrs, "timeoutType"),
            }
        }
        "ScheduleActivityTaskFailed" => return Err(decoder.schedule_failed()),
        "TimerStarted" => EventKind::TimerStarted(decoder.timer_started()?),
        "TimerFired" => decoder.timer_fired(index)?,
        other => {
            error!(event_id = record.event_id, event_type = other, "Unrecognized history event");
            return Err(EventError::UnrecognizedEvent {
                event_id: record.event_id,
                event_type: other.to_string(),
            });
        }
    };

    Ok(Event {
        id: record.event_id,
        timestamp: record.timestamp(),
        kind,
    })
}

struct Decoder<'r> {
    record: &'r HistoryRecord,
    codec: &'r dyn PayloadCodec,
}

impl<'r> Decoder<'r> {
    fn attribute_error(&self, field: &'static str) -> EventError {
        attribute_error(self.record, field)
    }

    fn attributes(&self) -> Result<&'r Map<String, Value>, EventError> {
        self.record
            .event_attributes()
            .ok_or_else(|| self.attribute_error("eventAttributes"))
    }

    fn payload(&self, data: Option<&str>) -> Result<Option<Value>, EventError> {
        data.map(|data| {
            self.codec.deserialize(data).map_err(|source| EventError::Payload {
                event_id: self.record.event_id,
                source,
            })
        })
        .transpose()
    }

    fn workflow_started(&self) -> Result<EventKind, EventError> {
        let attrs = self.attributes()?;
        let workflow_type = type_ref(self.record, attrs, "workflowType")?;
        let tasklist = attrs
            .get("taskList")
            .and_then(|t| t.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let input = self.payload(attrs.get("input").and_then(Value::as_str))?;

        Ok(EventKind::WorkflowExecutionStarted(WorkflowStarted {
            workflow_type,
            tasklist,
            input,
        }))
    }

    fn activity_scheduled(&self) -> Result<EventKind, EventError> {
        let attrs = self.attributes()?;
        let scheduled = scheduled_parts(self.record, attrs)?;
        let input = self.payload(scheduled.input)?;

        Ok(EventKind::ActivityTaskScheduled(ActivityScheduled {
            activity_id: scheduled.activity_id,
            activity_type: scheduled.activity_type,
            tasklist: scheduled.tasklist,
            input,
        }))
    }

    fn activity_completed(&self) -> Result<EventKind, EventError> {
        let attrs = self.record.event_attributes();
        let scheduled_event_id = attrs
            .and_then(|a| a.get("scheduledEventId"))
            .and_then(Value::as_u64);
        let result = self.payload(
            attrs
                .and_then(|a| a.get("result"))
                .and_then(Value::as_str),
        )?;

        Ok(EventKind::ActivityTaskCompleted {
            scheduled_event_id,
            result,
        })
    }

    /// Join a failed/timed-out record with its scheduled record.
    fn activity_failure(&self, index: &HistoryIndex<'_>) -> Result<ActivityFailure, EventError> {
        let attrs = self.attributes()?;
        let scheduled_event_id = attrs
            .get("scheduledEventId")
            .and_then(Value::as_u64)
            .ok_or_else(|| self.attribute_error("scheduledEventId"))?;

        let scheduled = index
            .get(scheduled_event_id)
            .filter(|r| r.event_type == "ActivityTaskScheduled")
            .ok_or_else(|| EventError::MissingJoinedRecord {
                event_id: self.record.event_id,
                event_type: self.record.event_type.clone(),
                reference: format!("ActivityTaskScheduled event {scheduled_event_id}"),
            })?;
        let scheduled_attrs = scheduled
            .event_attributes()
            .ok_or_else(|| attribute_error(scheduled, "eventAttributes"))?;
        let parts = scheduled_parts(scheduled, scheduled_attrs)?;

        Ok(ActivityFailure {
            scheduled_event_id,
            retry: RetryTemplate {
                activity_id: parts.activity_id,
                activity_type: parts.activity_type,
                tasklist: parts.tasklist,
                input: parts.input.map(str::to_string),
            },
        })
    }

    fn schedule_failed(&self) -> EventError {
        let attrs = self.record.event_attributes();
        let get = |field: &str| {
            attrs
                .and_then(|a| a.get(field))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let activity = attrs
            .and_then(|a| a.get("activityType"))
            .map(|t| {
                format!(
                    "{}@{}",
                    t.get("name").and_then(Value::as_str).unwrap_or("unknown name"),
                    t.get("version").and_then(Value::as_str).unwrap_or("unknown version"),
                )
            })
            .unwrap_or_else(|| "unknown activity".to_string());

        let err = EventError::ScheduleActivityFailed {
            activity,
            activity_id: get("activityId").unwrap_or_else(|| "unknown activity id".into()),
            cause: get("cause").unwrap_or_else(|| "unknown".into()),
        };
        error!(event_id = self.record.event_id, error = %err, "Activity scheduling refused");
        err
    }

    fn timer_started(&self) -> Result<TimerStarted, EventError> {
        timer_started_parts(self.record, self.codec)
    }

    fn timer_fired(&self, index: &HistoryIndex<'_>) -> Result<EventKind, EventError> {
        let attrs = self.attributes()?;
        let timer_id = attrs
            .get("timerId")
            .and_then(Value::as_str)
            .ok_or_else(|| self.attribute_error("timerId"))?;

        let started = match attrs.get("startedEventId").and_then(Value::as_u64) {
            Some(started_id) => index
                .get(started_id)
                .filter(|r| r.event_type == "TimerStarted"),
            None => index
                .records
                .iter()
                .filter(|r| r.event_id < self.record.event_id)
                .filter(|r| r.event_type == "TimerStarted")
                .filter(|r| {
                    r.event_attributes()
                        .and_then(|a| a.get("timerId"))
                        .and_then(Value::as_str)
                        == Some(timer_id)
                })
                .next_back(),
        }
        .ok_or_else(|| EventError::MissingJoinedRecord {
            event_id: self.record.event_id,
            event_type: self.record.event_type.clone(),
            reference: format!("TimerStarted for timer '{timer_id}'"),
        })?;

        let started_parts = timer_started_parts(started, self.codec)?;

        Ok(EventKind::TimerFired(TimerFired {
            timer_id: timer_id.to_string(),
            started_event_id: started.event_id,
            control: started_parts.control,
        }))
    }
}

struct ScheduledParts<'r> {
    activity_id: ActivityId,
    activity_type: TypeRef,
    tasklist: String,
    input: Option<&'r str>,
}

fn scheduled_parts<'r>(
    record: &HistoryRecord,
    attrs: &'r Map<String, Value>,
) -> Result<ScheduledParts<'r>, EventError> {
    let raw_id = attrs
        .get("activityId")
        .and_then(Value::as_str)
        .ok_or_else(|| attribute_error(record, "activityId"))?;
    let activity_id = ActivityId::parse(raw_id).ok_or_else(|| EventError::MalformedActivityId {
        event_id: record.event_id,
        activity_id: raw_id.to_string(),
    })?;
    let activity_type = type_ref(record, attrs, "activityType")?;
    let tasklist = attrs
        .get("taskList")
        .and_then(|t| t.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| attribute_error(record, "taskList.name"))?
        .to_string();

    Ok(ScheduledParts {
        activity_id,
        activity_type,
        tasklist,
        input: attrs.get("input").and_then(Value::as_str),
    })
}

fn timer_started_parts(
    record: &HistoryRecord,
    codec: &dyn PayloadCodec,
) -> Result<TimerStarted, EventError> {
    let attrs = record
        .event_attributes()
        .ok_or_else(|| attribute_error(record, "timerStartedEventAttributes"))?;
    let timer_id = attrs
        .get("timerId")
        .and_then(Value::as_str)
        .ok_or_else(|| attribute_error(record, "timerId"))?
        .to_string();
    // the service sends numbers as strings; accept either
    let start_to_fire_timeout = match attrs.get("startToFireTimeout") {
        Some(Value::String(s)) => s.parse().ok(),
        Some(Value::Number(n)) => n.as_u64(),
        _ => None,
    }
    .ok_or_else(|| attribute_error(record, "startToFireTimeout"))?;
    let control = attrs
        .get("control")
        .and_then(Value::as_str)
        .map(|data| {
            codec.deserialize(data).map_err(|source| EventError::Payload {
                event_id: record.event_id,
                source,
            })
        })
        .transpose()?;

    Ok(TimerStarted {
        timer_id,
        start_to_fire_timeout,
        control,
    })
}

fn type_ref(
    record: &HistoryRecord,
    attrs: &Map<String, Value>,
    key: &'static str,
) -> Result<TypeRef, EventError> {
    let value = attrs.get(key).ok_or_else(|| attribute_error(record, key))?;
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| attribute_error(record, key))?;
    let version = value
        .get("version")
        .and_then(Value::as_str)
        .ok_or_else(|| attribute_error(record, key))?;
    Ok(TypeRef::new(name, version))
}

fn optional_string(attrs: &Map<String, Value>, key: &str) -> Option<String> {
    attrs.get(key).and_then(Value::as_str).map(str::to_string)
}

fn attribute_error(record: &HistoryRecord, field: &'static str) -> EventError {
    let err = EventError::MissingAttribute {
        event_id: record.event_id,
        event_type: record.event_type.clone(),
        field,
    };
    error!(error = %err, "Malformed history event");
    err
}
