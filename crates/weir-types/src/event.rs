//! Event types for the Weir engine event bus.
//!
//! `FlowEvent` is the unified event type broadcast during flow execution.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted while a flow run executes.
///
/// Used by the event bus to communicate run and node lifecycle to
/// subscribers (UIs, log sinks, metrics). Emission is fire-and-forget: a
/// slow or absent subscriber never blocks or alters the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    /// A flow run has started.
    RunStarted {
        run_id: Uuid,
        /// Total nodes declared in the flow.
        nodes: usize,
    },

    /// A flow run completed successfully.
    RunCompleted {
        run_id: Uuid,
        duration_ms: u64,
        nodes_completed: usize,
    },

    /// A flow run failed and was aborted.
    RunFailed { run_id: Uuid, error: String },

    /// A flow run was cancelled between node invocations.
    RunCancelled { run_id: Uuid },

    /// A node invocation has started.
    NodeStarted { run_id: Uuid, node_id: String },

    /// A node completed and its output is stored.
    NodeCompleted {
        run_id: Uuid,
        node_id: String,
        duration_ms: u64,
    },

    /// A node failed; the run aborts.
    NodeFailed {
        run_id: Uuid,
        node_id: String,
        error: String,
    },

    /// A loop node is starting one iteration of its body.
    LoopIterationStarted {
        run_id: Uuid,
        node_id: String,
        /// Zero-based iteration index.
        iteration: usize,
    },

    /// A loop node finished one iteration of its body.
    LoopIterationCompleted {
        run_id: Uuid,
        node_id: String,
        iteration: usize,
    },
}

impl FlowEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            FlowEvent::RunStarted { run_id, .. }
            | FlowEvent::RunCompleted { run_id, .. }
            | FlowEvent::RunFailed { run_id, .. }
            | FlowEvent::RunCancelled { run_id }
            | FlowEvent::NodeStarted { run_id, .. }
            | FlowEvent::NodeCompleted { run_id, .. }
            | FlowEvent::NodeFailed { run_id, .. }
            | FlowEvent::LoopIterationStarted { run_id, .. }
            | FlowEvent::LoopIterationCompleted { run_id, .. } => *run_id,
        }
    }

    /// The node this event concerns, if it is node-scoped.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            FlowEvent::NodeStarted { node_id, .. }
            | FlowEvent::NodeCompleted { node_id, .. }
            | FlowEvent::NodeFailed { node_id, .. }
            | FlowEvent::LoopIterationStarted { node_id, .. }
            | FlowEvent::LoopIterationCompleted { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}
