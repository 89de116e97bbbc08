//! Replay control flow.

use std::fmt;

use crate::decision::Decision;
use crate::history::EventError;

/// Why an activity attempt is being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCause {
    /// The service timed the attempt out.
    TimedOut,
    /// The worker reported failure.
    Failed,
}

impl fmt::Display for RetryCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryCause::TimedOut => f.write_str("timed out"),
            RetryCause::Failed => f.write_str("failed"),
        }
    }
}

/// Unwinds a replay pass out of the entrypoint.
///
/// Every workflow call returns `Result<_, Interrupt>`; entrypoints propagate
/// it with `?`. The decider turns the interrupt that reaches the top of the
/// pass into the decision-task response. Suspension and retries are normal
/// outcomes of a pass, the remaining variants fail the workflow.
#[derive(Debug)]
pub enum Interrupt {
    /// The pass reached a call whose outcome is not recorded yet.
    ///
    /// Carries the decision that requests it, or `None` when the request is
    /// already in the history and the pass is only waiting.
    Suspend(Option<Decision>),

    /// A failed or timed-out attempt is being rescheduled.
    Retrying {
        /// Why the previous attempt ended.
        cause: RetryCause,
        /// The `ScheduleActivityTask` decision for the next attempt.
        decision: Decision,
    },

    /// An activity failed more often than its retry budget allows.
    RetryBudgetExhausted {
        /// `name@version` of the activity.
        activity: String,
        /// Attempts made by the failing call.
        attempts: u32,
        /// Configured retry budget.
        max_retries: u32,
    },

    /// The history could not be decoded.
    Event(EventError),

    /// Workflow code and history disagree, or the run cannot be replayed.
    Decider(String),

    /// Any other failure raised from workflow code.
    Unhandled(String),
}

impl Interrupt {
    /// Wrap an arbitrary workflow-code failure.
    pub fn unhandled(error: impl fmt::Display) -> Self {
        Interrupt::Unhandled(error.to_string())
    }

    /// The failure kind reported as `FailWorkflowExecution` reason.
    pub fn reason(&self) -> &'static str {
        match self {
            Interrupt::Suspend(_) => "Suspend",
            Interrupt::Retrying { .. } => "Retrying",
            Interrupt::RetryBudgetExhausted { .. } => "RetryBudgetExhausted",
            Interrupt::Event(_) => "EventException",
            Interrupt::Decider(_) => "DeciderException",
            Interrupt::Unhandled(_) => "unhandled",
        }
    }

    /// Whether this interrupt ends the workflow as failed.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Interrupt::Suspend(_) | Interrupt::Retrying { .. })
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Suspend(Some(decision)) => write!(f, "suspended on {}", decision.kind()),
            Interrupt::Suspend(None) => f.write_str("suspended"),
            Interrupt::Retrying { cause, .. } => write!(f, "retrying activity that {cause}"),
            Interrupt::RetryBudgetExhausted {
                activity,
                attempts,
                max_retries,
            } => write!(
                f,
                "{activity} exhausted its retry budget ({attempts} attempts, max_retries={max_retries})"
            ),
            Interrupt::Event(e) => write!(f, "{e}"),
            Interrupt::Decider(message) | Interrupt::Unhandled(message) => f.write_str(message),
        }
    }
}

impl From<EventError> for Interrupt {
    fn from(error: EventError) -> Self {
        Interrupt::Event(error)
    }
}

impl From<serde_json::Error> for Interrupt {
    fn from(error: serde_json::Error) -> Self {
        Interrupt::unhandled(error)
    }
}
