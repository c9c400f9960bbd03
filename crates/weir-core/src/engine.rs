//! Engine facade: registry construction, flow execution, event subscription.
//!
//! An `Engine` owns the immutable executor registry and the event bus --
//! nothing else. `execute` validates and orders the flow, then drives a
//! `FlowRun` to completion; every piece of mutable state is scoped to that
//! run, so a single engine serves concurrent runs through a shared
//! reference.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use weir_types::event::FlowEvent;
use weir_types::flow::{Flow, HandleMap};

use crate::context::RunContext;
use crate::dag::FlowGraph;
use crate::event::EventBus;
use crate::registry::{Executor, ExecutorRegistry};
use crate::scheduler::{FlowRun, RunError};

// ---------------------------------------------------------------------------
// RunResult
// ---------------------------------------------------------------------------

/// Result of a completed flow run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The run id, also carried by every event the run published.
    pub run_id: Uuid,
    /// Output mapping per node id. Loop-body nodes carry empty mappings;
    /// their per-iteration outputs are scoped to the iteration.
    pub outputs: HashMap<String, HandleMap>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Flow execution engine over an immutable executor registry.
pub struct Engine {
    registry: ExecutorRegistry,
    events: EventBus,
}

impl Engine {
    /// Create an engine from a set of executors.
    ///
    /// Later executors win when two share a type tag.
    pub fn new(executors: impl IntoIterator<Item = Executor>) -> Self {
        Self::with_event_bus(executors, EventBus::default())
    }

    /// Create an engine publishing lifecycle events to the given bus.
    pub fn with_event_bus(
        executors: impl IntoIterator<Item = Executor>,
        events: EventBus,
    ) -> Self {
        let mut registry = ExecutorRegistry::new();
        for executor in executors {
            registry.register(executor);
        }
        Self { registry, events }
    }

    /// The engine's executor registry.
    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// Subscribe to lifecycle events for all runs on this engine.
    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.events.subscribe()
    }

    /// Execute a flow with a null payload and no external cancellation.
    pub async fn execute(&self, flow: &Flow) -> Result<RunResult, RunError> {
        self.execute_with(flow, Value::Null, CancellationToken::new())
            .await
    }

    /// Execute a flow with caller-supplied side data and cancellation.
    ///
    /// Validation runs first: a flow that fails to build produces an error
    /// before any node executes and before any event is published. The
    /// payload is visible to every executor through its [`RunContext`];
    /// cancelling the token stops scheduling at the next node or iteration
    /// boundary.
    pub async fn execute_with(
        &self,
        flow: &Flow,
        payload: Value,
        cancel: CancellationToken,
    ) -> Result<RunResult, RunError> {
        let graph = FlowGraph::build(flow, &self.registry)?;

        let run_id = Uuid::now_v7();
        let ctx = RunContext::new(run_id, payload, cancel);
        self.events.publish(FlowEvent::RunStarted {
            run_id,
            nodes: flow.nodes.len(),
        });
        tracing::info!(run_id = %run_id, nodes = flow.nodes.len(), "starting flow run");

        let started = Instant::now();
        let mut run = FlowRun::new(flow, &graph, &self.registry, &self.events, ctx);
        match run.run().await {
            Ok(outputs) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                self.events.publish(FlowEvent::RunCompleted {
                    run_id,
                    duration_ms,
                    nodes_completed: run.completed(),
                });
                tracing::info!(
                    run_id = %run_id,
                    duration_ms,
                    nodes_completed = run.completed(),
                    "flow run completed"
                );
                Ok(RunResult { run_id, outputs })
            }
            Err(RunError::Cancelled) => {
                self.events.publish(FlowEvent::RunCancelled { run_id });
                tracing::info!(run_id = %run_id, "flow run cancelled");
                Err(RunError::Cancelled)
            }
            Err(err) => {
                self.events.publish(FlowEvent::RunFailed {
                    run_id,
                    error: err.to_string(),
                });
                tracing::warn!(run_id = %run_id, error = %err, "flow run failed");
                Err(err)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
