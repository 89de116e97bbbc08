//! Outbound decisions returned to the task-dispatch service.

use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value, json};

use crate::task::{ActivityId, TypeRef};

/// Longest failure reason the service accepts.
pub const MAX_REASON_LEN: usize = 256;

/// Longest failure details the service accepts.
pub const MAX_DETAILS_LEN: usize = 32_768;

/// A service-side timeout: a whole number of seconds, or none at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Timeout after this many seconds.
    Seconds(u64),
    /// No timeout (`"NONE"` on the wire).
    Unlimited,
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeout::Seconds(secs) => write!(f, "{secs}"),
            Timeout::Unlimited => f.write_str("NONE"),
        }
    }
}

/// Timeouts attached to every scheduled activity task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityTimeouts {
    /// Total time from scheduling to completion.
    pub schedule_to_close: Timeout,
    /// Time the task may wait for a worker.
    pub schedule_to_start: Timeout,
    /// Time a worker may take once it has the task.
    pub start_to_close: Timeout,
    /// Maximum gap between worker heartbeats.
    pub heartbeat: Timeout,
}

impl Default for ActivityTimeouts {
    fn default() -> Self {
        Self {
            schedule_to_close: Timeout::Seconds(10),
            schedule_to_start: Timeout::Seconds(10),
            start_to_close: Timeout::Unlimited,
            heartbeat: Timeout::Unlimited,
        }
    }
}

/// Attributes of a `ScheduleActivityTask` decision.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleActivity {
    /// Id of this attempt.
    pub activity_id: ActivityId,
    /// Registered activity type.
    pub activity_type: TypeRef,
    /// Tasklist the activity task is routed to.
    pub tasklist: String,
    /// Encoded `{args, kwargs}` payload.
    pub input: Option<String>,
    /// Service-side timeouts.
    pub timeouts: ActivityTimeouts,
    /// Task priority; higher runs first.
    pub priority: i32,
}

/// An instruction returned to the service in a decision-task response.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Schedule one activity attempt.
    ScheduleActivityTask(ScheduleActivity),
    /// Start a durable timer.
    StartTimer {
        /// Timer id, unique among open timers of the run.
        timer_id: String,
        /// Seconds until the timer fires.
        start_to_fire_timeout: u64,
        /// Encoded payload echoed back on the `TimerStarted` record.
        control: Option<String>,
    },
    /// Close the run successfully.
    CompleteWorkflowExecution {
        /// Encoded entrypoint result.
        result: Option<String>,
    },
    /// Close the run as failed.
    FailWorkflowExecution {
        /// Short failure kind.
        reason: String,
        /// Free-form detail.
        details: String,
    },
    /// Close the run as canceled.
    CancelWorkflowExecution {
        /// Free-form detail.
        details: String,
    },
}

impl Decision {
    /// Build a `FailWorkflowExecution`, clipping fields to service limits.
    pub fn fail(reason: impl Into<String>, details: impl Into<String>) -> Self {
        Decision::FailWorkflowExecution {
            reason: clip(reason.into(), MAX_REASON_LEN),
            details: clip(details.into(), MAX_DETAILS_LEN),
        }
    }

    /// The wire `decisionType`.
    pub fn kind(&self) -> &'static str {
        match self {
            Decision::ScheduleActivityTask(_) => "ScheduleActivityTask",
            Decision::StartTimer { .. } => "StartTimer",
            Decision::CompleteWorkflowExecution { .. } => "CompleteWorkflowExecution",
            Decision::FailWorkflowExecution { .. } => "FailWorkflowExecution",
            Decision::CancelWorkflowExecution { .. } => "CancelWorkflowExecution",
        }
    }

    /// Render in the service's wire format:
    /// `{"decisionType": ..., "<type>DecisionAttributes": {...}}`.
    pub fn to_wire(&self) -> Value {
        let attributes = match self {
            Decision::ScheduleActivityTask(schedule) => {
                let mut attrs = Map::new();
                attrs.insert("activityId".into(), json!(schedule.activity_id.to_string()));
                attrs.insert(
                    "activityType".into(),
                    json!({
                        "name": schedule.activity_type.name,
                        "version": schedule.activity_type.version,
                    }),
                );
                attrs.insert("taskList".into(), json!({ "name": schedule.tasklist }));
                attrs.insert("taskPriority".into(), json!(schedule.priority.to_string()));
                attrs.insert(
                    "scheduleToCloseTimeout".into(),
                    json!(schedule.timeouts.schedule_to_close.to_string()),
                );
                attrs.insert(
                    "scheduleToStartTimeout".into(),
                    json!(schedule.timeouts.schedule_to_start.to_string()),
                );
                attrs.insert(
                    "startToCloseTimeout".into(),
                    json!(schedule.timeouts.start_to_close.to_string()),
                );
                attrs.insert(
                    "heartbeatTimeout".into(),
                    json!(schedule.timeouts.heartbeat.to_string()),
                );
                if let Some(input) = &schedule.input {
                    attrs.insert("input".into(), json!(input));
                }
                Value::Object(attrs)
            }
            Decision::StartTimer {
                timer_id,
                start_to_fire_timeout,
                control,
            } => {
                let mut attrs = Map::new();
                attrs.insert("timerId".into(), json!(timer_id));
                attrs.insert(
                    "startToFireTimeout".into(),
                    json!(start_to_fire_timeout.to_string()),
                );
                if let Some(control) = control {
                    attrs.insert("control".into(), json!(control));
                }
                Value::Object(attrs)
            }
            Decision::CompleteWorkflowExecution { result } => match result {
                Some(result) => json!({ "result": result }),
                None => json!({}),
            },
            Decision::FailWorkflowExecution { reason, details } => {
                json!({ "reason": reason, "details": details })
            }
            Decision::CancelWorkflowExecution { details } => json!({ "details": details }),
        };

        let kind = self.kind();
        let mut wire = Map::new();
        wire.insert("decisionType".into(), json!(kind));
        wire.insert(attributes_key(kind), attributes);
        Value::Object(wire)
    }
}

impl Serialize for Decision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

/// `ScheduleActivityTask` -> `scheduleActivityTaskDecisionAttributes`
fn attributes_key(kind: &str) -> String {
    let mut chars = kind.chars();
    match chars.next() {
        Some(first) => format!(
            "{}{}DecisionAttributes",
            first.to_ascii_lowercase(),
            chars.as_str()
        ),
        None => "DecisionAttributes".to_string(),
    }
}

pub(crate) fn clip(mut value: String, max: usize) -> String {
    if value.len() > max {
        let mut end = max;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        value.truncate(end);
    }
    value
}
