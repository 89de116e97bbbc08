//! Runtime configuration.

use std::time::Duration;

/// Configuration for the decider and activity worker runtime.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use beeline::runtime::RuntimeConfig;
///
/// let config = RuntimeConfig {
///     deciders: 2,
///     activity_workers: 8,  // run up to 8 activities in parallel
///     shutdown_timeout: Duration::from_secs(10),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Poller identity reported to the service.
    ///
    /// Recorded on `DecisionTaskStarted` and `ActivityTaskStarted` events.
    /// If `None`, a UUID is generated when the runtime is built.
    pub identity: Option<String>,

    /// Number of decider pollers to spawn.
    ///
    /// The service hands out at most one decision task per run at a time,
    /// so deciders never need to coordinate. Default: 1.
    pub deciders: usize,

    /// Number of activity pollers to spawn per tasklist.
    ///
    /// Each poller executes one activity at a time. Default: 1.
    pub activity_workers: usize,

    /// Delay applied after consecutive poll failures.
    pub poll_backoff: PollBackoff,

    /// Maximum time to wait for in-flight tasks during shutdown.
    ///
    /// After this timeout, the runtime will force stop.
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            identity: None,
            deciders: 1,
            activity_workers: 1,
            poll_backoff: PollBackoff::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Exponential backoff between failed polls.
///
/// The delay after failure N is: `min(base_delay * 2^(N-1), max_delay)`
///
/// With defaults (base=1s, max=60s):
/// - 1st failure: 1s
/// - 2nd failure: 2s
/// - 3rd failure: 4s
/// - 7th failure onward: 60s
///
/// A successful poll resets the count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollBackoff {
    /// Delay after the first failure. Default: 1 second.
    pub base_delay: Duration,

    /// Cap on the delay. Default: 60 seconds.
    pub max_delay: Duration,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl PollBackoff {
    /// Delay to wait after `failures` consecutive failed polls (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(failures.saturating_sub(1));
        self.base_delay.saturating_mul(multiplier).min(self.max_delay)
    }
}
