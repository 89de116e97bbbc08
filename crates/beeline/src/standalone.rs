//! Running an entrypoint outside replay.
//!
//! There is no history and no decision task: each activity call runs its
//! handler inline (retrying locally up to `max_retries`) and each sleep is a
//! local delay. Useful for exercising workflow code in-process without the
//! history service.
//!
//! ```ignore
//! let result = beeline::run_standalone(Arc::new(definition), "0.0.1", json!(21)).await?;
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{error, info};
use uuid::Uuid;

use crate::codec::JsonCodec;
use crate::decider::panic_message;
use crate::task::TaskMeta;
use crate::workflow::{Interrupt, WorkflowContext, WorkflowDefinition};

/// Run the entrypoint registered for `version` to completion, in-process.
///
/// The entrypoint runs on a blocking thread; activity handlers and sleeps
/// are driven on the current runtime. Failures are reported the same way a
/// decider would classify them ([`Interrupt::reason`]).
pub async fn run_standalone(
    definition: Arc<WorkflowDefinition>,
    version: &str,
    input: Value,
) -> Result<Value, Interrupt> {
    let entrypoint = definition.entrypoint(version).cloned().ok_or_else(|| {
        Interrupt::Decider(format!(
            "no entrypoint registered for {}@{version}",
            definition.name()
        ))
    })?;

    let name = definition.name().to_string();
    let meta = TaskMeta {
        task_token: String::new(),
        run_id: Uuid::new_v4().simple().to_string(),
        workflow_id: format!("{name}-{}", Uuid::new_v4().simple()),
        domain: definition.domain().to_string(),
        tasklist: definition.tasklist().to_string(),
    };
    info!(workflow = %name, version, workflow_id = %meta.workflow_id, "Running workflow standalone");

    let handle = Handle::current();
    let joined = tokio::task::spawn_blocking(move || {
        let mut ctx = WorkflowContext::standalone(
            &meta,
            definition.name(),
            definition.tasklist(),
            definition.activities(),
            &JsonCodec,
            handle,
        );
        catch_unwind(AssertUnwindSafe(|| (*entrypoint)(&mut ctx, input)))
            .unwrap_or_else(|panic| Err(Interrupt::Unhandled(panic_message(panic.as_ref()))))
    })
    .await;

    let result = joined.unwrap_or_else(|e| Err(Interrupt::unhandled(e)));
    if let Err(interrupt) = &result {
        error!(reason = interrupt.reason(), error = %interrupt, "Standalone workflow failed");
    }
    result
}
