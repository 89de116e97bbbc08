//! Workflow execution history: raw records, typed events and the replay
//! cursor the decider walks.

mod cursor;
mod event;
mod record;

pub use cursor::ReplayCursor;
pub use event::{
    ActivityFailure, ActivityScheduled, Event, EventError, EventKind, HistoryIndex,
    RetryTemplate, TimerFired, TimerStarted, WorkflowStarted, decode_event, decode_history,
};
pub use record::{DECISION_EVENT_PREFIX, HistoryRecord, attributes_key, filter_decision_records};
