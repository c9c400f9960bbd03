//! Run-scoped execution context.
//!
//! `RunContext` is the side-data object handed to every executor invocation
//! during one flow run: the run id, the caller-supplied payload, and the
//! run's cooperative cancellation token. Everything mutable about a run
//! lives with the run -- the engine itself holds no per-run state.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Side data scoped to a single flow run.
///
/// Cloning is cheap enough for handing to spawned work; all clones observe
/// the same cancellation token.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: Uuid,
    payload: Value,
    cancel: CancellationToken,
}

impl RunContext {
    /// Create the context for a new run.
    pub fn new(run_id: Uuid, payload: Value, cancel: CancellationToken) -> Self {
        Self {
            run_id,
            payload,
            cancel,
        }
    }

    /// The run's unique id (UUIDv7, time-sortable).
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Caller-supplied side data shared by every node of the run.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Whether cancellation has been requested for this run.
    ///
    /// The scheduler checks this between node invocations and between loop
    /// iterations; an in-flight executor call is never preempted. Executors
    /// may poll it themselves to stop long work early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
