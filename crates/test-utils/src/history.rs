//! Hand-built histories for replay tests.
//!
//! Records are numbered in insertion order, like the service numbers them.
//!
//! ```ignore
//! let mut history = HistoryBuilder::new(JsonCodec);
//! history.started("Greeter", "0.0.1", Some(json!("lucy")));
//! let scheduled = history.scheduled(&activity_id, "greet", "0.0.1", "tasks", args);
//! history.activity_started(scheduled);
//! history.completed(scheduled, json!("hello lucy"));
//! let records = history.records();
//! ```

use beeline::history::HistoryRecord;
use beeline::{Arguments, PayloadCodec};
use serde_json::{Value, json};

/// Builder for raw history records.
pub struct HistoryBuilder {
    codec: Box<dyn PayloadCodec>,
    records: Vec<HistoryRecord>,
}

impl HistoryBuilder {
    pub fn new(codec: impl PayloadCodec) -> Self {
        Self {
            codec: Box::new(codec),
            records: Vec::new(),
        }
    }

    fn encode(&self, value: &Value) -> String {
        self.codec
            .serialize(value)
            .expect("test payload must be encodable")
    }

    /// Append a record with the next event id.
    pub fn push(&mut self, event_type: &str, attributes: Value) -> u64 {
        let event_id = self.records.len() as u64 + 1;
        self.records
            .push(HistoryRecord::new(event_id, event_type, attributes));
        event_id
    }

    pub fn started(&mut self, workflow: &str, version: &str, input: Option<Value>) -> u64 {
        let mut attributes = json!({
            "workflowType": { "name": workflow, "version": version },
            "taskList": { "name": "tasks" },
        });
        if let Some(input) = input {
            attributes["input"] = json!(self.encode(&input));
        }
        self.push("WorkflowExecutionStarted", attributes)
    }

    /// `DecisionTaskScheduled`, `DecisionTaskStarted` and
    /// `DecisionTaskCompleted`.
    pub fn decision_round(&mut self) {
        self.push("DecisionTaskScheduled", json!({ "taskList": { "name": "tasks" } }));
        let scheduled = self.records.len() as u64;
        self.push("DecisionTaskStarted", json!({ "scheduledEventId": scheduled }));
        self.push(
            "DecisionTaskCompleted",
            json!({ "scheduledEventId": scheduled, "startedEventId": scheduled + 1 }),
        );
    }

    pub fn scheduled(
        &mut self,
        activity_id: &str,
        name: &str,
        version: &str,
        tasklist: &str,
        args: Arguments,
    ) -> u64 {
        let input = self.encode(&args.to_value());
        self.push(
            "ActivityTaskScheduled",
            json!({
                "activityId": activity_id,
                "activityType": { "name": name, "version": version },
                "taskList": { "name": tasklist },
                "input": input,
                "scheduleToCloseTimeout": "10",
                "scheduleToStartTimeout": "10",
                "startToCloseTimeout": "NONE",
                "heartbeatTimeout": "NONE",
            }),
        )
    }

    pub fn activity_started(&mut self, scheduled_event_id: u64) -> u64 {
        self.push(
            "ActivityTaskStarted",
            json!({ "scheduledEventId": scheduled_event_id, "identity": "worker" }),
        )
    }

    pub fn completed(&mut self, scheduled_event_id: u64, result: Value) -> u64 {
        let result = self.encode(&result);
        self.push(
            "ActivityTaskCompleted",
            json!({ "scheduledEventId": scheduled_event_id, "result": result }),
        )
    }

    pub fn failed(&mut self, scheduled_event_id: u64, reason: &str) -> u64 {
        self.push(
            "ActivityTaskFailed",
            json!({ "scheduledEventId": scheduled_event_id, "reason": reason, "details": "" }),
        )
    }

    pub fn timed_out(&mut self, scheduled_event_id: u64) -> u64 {
        self.push(
            "ActivityTaskTimedOut",
            json!({ "scheduledEventId": scheduled_event_id, "timeoutType": "SCHEDULE_TO_CLOSE" }),
        )
    }

    pub fn timer_started(&mut self, timer_id: &str, seconds: u64, control: Option<Value>) -> u64 {
        let mut attributes = json!({
            "timerId": timer_id,
            "startToFireTimeout": seconds.to_string(),
        });
        if let Some(control) = control {
            attributes["control"] = json!(self.encode(&control));
        }
        self.push("TimerStarted", attributes)
    }

    pub fn timer_fired(&mut self, timer_id: &str, started_event_id: u64) -> u64 {
        self.push(
            "TimerFired",
            json!({ "timerId": timer_id, "startedEventId": started_event_id }),
        )
    }

    pub fn records(&self) -> Vec<HistoryRecord> {
        self.records.clone()
    }
}
