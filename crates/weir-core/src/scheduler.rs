//! Dependency-ordered flow execution and the loop re-execution protocol.
//!
//! `FlowRun` walks the top-level topological order produced by the builder.
//! Before each invocation it resolves the node's effective input (static
//! input overlaid by incoming edges), pattern-matches on the registered
//! executor kind, and stores the produced output in run-owned buffers. Loop
//! nodes replay their body sub-graph once per generator element, each
//! iteration against a fresh scoped buffer.
//!
//! One run is single-threaded and cooperative: awaiting an executor suspends
//! the scheduler until that invocation completes, so no two nodes of one run
//! ever execute concurrently. Cancellation is checked between node
//! invocations and between loop iterations only -- an in-flight executor
//! call is never preempted.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use serde_json::json;
use thiserror::Error;
use weir_types::event::FlowEvent;
use weir_types::flow::{Flow, HandleMap};

use crate::context::RunContext;
use crate::dag::{BuildError, FlowGraph};
use crate::event::EventBus;
use crate::propagate::{MissingHandleError, map_edge, overlay};
use crate::registry::{Executor, ExecutorRegistry};

// ---------------------------------------------------------------------------
// Node state
// ---------------------------------------------------------------------------

/// Lifecycle state of a node within one run.
///
/// A node is ready once every incoming edge has a `Completed` source; the
/// sequential topological walk establishes readiness by construction, so it
/// is not stored as a separate state. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Not yet reached by the scheduler.
    Pending,
    /// Executor invocation in flight.
    Running,
    /// Output stored; dependants may read it.
    Completed,
    /// Invocation failed; the run aborts.
    Failed,
}

// ---------------------------------------------------------------------------
// RunError
// ---------------------------------------------------------------------------

/// Errors that abort a flow run.
///
/// The engine performs no implicit retries and returns no partial results;
/// retry policy, if desired, belongs to the caller around `execute`.
#[derive(Debug, Error)]
pub enum RunError {
    /// The flow failed validation; nothing executed.
    #[error("build error: {0}")]
    Build(#[from] BuildError),

    /// A completed node's output lacked a handle an edge reads.
    #[error(transparent)]
    MissingHandle(#[from] MissingHandleError),

    /// A user-supplied executor failed; wraps the original cause.
    #[error("node '{node_id}' failed: {source}")]
    Node {
        node_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// The run was cancelled between node invocations.
    #[error("run cancelled")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// FlowRun
// ---------------------------------------------------------------------------

/// Resolution scope for one loop iteration.
///
/// Body nodes resolve edges sourced at the owning loop node from the
/// iteration input, and edges among body members from the iteration's own
/// output buffer. Both are discarded when the iteration ends.
struct Scope<'s> {
    /// The loop node owning the body being replayed.
    loop_node: usize,
    /// The loop's resolved input merged with this iteration's override.
    input: &'s HandleMap,
    /// Outputs produced by body members earlier in this iteration.
    outputs: &'s HashMap<usize, HandleMap>,
}

/// Executes one flow against a built graph; owns every piece of run state.
///
/// Runs are independent: an engine may drive many `FlowRun`s concurrently
/// against the same registry, since the registry is read-only and all
/// buffers live here.
pub struct FlowRun<'a> {
    flow: &'a Flow,
    graph: &'a FlowGraph,
    registry: &'a ExecutorRegistry,
    events: &'a EventBus,
    ctx: RunContext,
    outputs: HashMap<usize, HandleMap>,
    states: Vec<NodeState>,
}

impl<'a> FlowRun<'a> {
    /// Prepare a run with every node's output initialized empty.
    pub fn new(
        flow: &'a Flow,
        graph: &'a FlowGraph,
        registry: &'a ExecutorRegistry,
        events: &'a EventBus,
        ctx: RunContext,
    ) -> Self {
        let n = flow.nodes.len();
        Self {
            flow,
            graph,
            registry,
            events,
            ctx,
            outputs: (0..n).map(|i| (i, HandleMap::new())).collect(),
            states: vec![NodeState::Pending; n],
        }
    }

    /// Drive the run to completion and return the node-id -> output mapping.
    ///
    /// The first failure aborts the run: later nodes never execute and no
    /// partial mapping is returned. Loop-body nodes appear in the mapping
    /// with empty outputs -- their per-iteration results are scoped to the
    /// iteration that produced them.
    pub async fn run(&mut self) -> Result<HashMap<String, HandleMap>, RunError> {
        let graph = self.graph;
        for &node in graph.order() {
            if self.ctx.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            let output = self.run_node(node, None).await?;
            self.outputs.insert(node, output);
        }

        let mut outputs = std::mem::take(&mut self.outputs);
        Ok(self
            .flow
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.id.clone(), outputs.remove(&i).unwrap_or_default()))
            .collect())
    }

    /// State of a node by id, as left behind by the run.
    pub fn state(&self, node_id: &str) -> Option<NodeState> {
        self.graph.index_of(node_id).map(|i| self.states[i])
    }

    /// Number of nodes that reached `Completed`.
    pub fn completed(&self) -> usize {
        self.states
            .iter()
            .filter(|s| **s == NodeState::Completed)
            .count()
    }

    /// Execute one node inside the given scope, bracketed by lifecycle
    /// events and state transitions.
    async fn run_node(
        &mut self,
        node: usize,
        scope: Option<&Scope<'_>>,
    ) -> Result<HandleMap, RunError> {
        let events = self.events;
        let node_id = self.flow.nodes[node].id.clone();
        let run_id = self.ctx.run_id();

        self.states[node] = NodeState::Running;
        events.publish(FlowEvent::NodeStarted {
            run_id,
            node_id: node_id.clone(),
        });
        tracing::debug!(run_id = %run_id, node_id = node_id.as_str(), "node started");
        let started = Instant::now();

        let result = match self.resolve_input(node, scope) {
            Ok(input) => self.dispatch(node, input).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(output) => {
                self.states[node] = NodeState::Completed;
                events.publish(FlowEvent::NodeCompleted {
                    run_id,
                    node_id,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                Ok(output)
            }
            Err(err) => {
                self.states[node] = NodeState::Failed;
                // Cancellation surfaces at run level, not as a node failure
                if !matches!(err, RunError::Cancelled) {
                    tracing::warn!(
                        run_id = %run_id,
                        node_id = node_id.as_str(),
                        error = %err,
                        "node failed"
                    );
                    events.publish(FlowEvent::NodeFailed {
                        run_id,
                        node_id,
                        error: err.to_string(),
                    });
                }
                Err(err)
            }
        }
    }

    /// Resolve a node's effective input: static input overlaid with one
    /// value per incoming edge, in edge declaration order (last write wins).
    fn resolve_input(
        &self,
        node: usize,
        scope: Option<&Scope<'_>>,
    ) -> Result<HandleMap, RunError> {
        let flow = self.flow;
        let graph = self.graph;

        let mut input = flow.nodes[node].input.clone();
        for &e in graph.incoming(node) {
            let edge = &flow.edges[e];
            let (source, _) = graph.endpoints(e);
            let source_output = match scope {
                // Edges leaving the owning loop node carry the iteration input.
                Some(s) if source == s.loop_node => s.input,
                Some(s) => s.outputs.get(&source).ok_or_else(|| MissingHandleError {
                    node_id: edge.source.clone(),
                    handle: edge.source_handle.clone(),
                })?,
                None => self.outputs.get(&source).ok_or_else(|| MissingHandleError {
                    node_id: edge.source.clone(),
                    handle: edge.source_handle.clone(),
                })?,
            };
            map_edge(edge, source_output, &mut input)?;
        }
        Ok(input)
    }

    /// Invoke the registered executor for a node, by stored kind tag.
    async fn dispatch(&mut self, node: usize, input: HandleMap) -> Result<HandleMap, RunError> {
        let flow = self.flow;
        let registry = self.registry;
        let decl = &flow.nodes[node];

        match registry.resolve(&decl.node_type) {
            Some(Executor::Simple(executor)) => executor
                .execute(&input, &self.ctx)
                .await
                .map_err(|source| RunError::Node {
                    node_id: decl.id.clone(),
                    source,
                }),
            Some(Executor::Loop(_)) => self.run_loop(node, input).await,
            None => Err(RunError::Build(BuildError::UnknownNodeType {
                node_id: decl.id.clone(),
                node_type: decl.node_type.clone(),
            })),
        }
    }

    /// The loop protocol: one generator call, then one sequential body
    /// replay per override, each against a fresh iteration buffer.
    ///
    /// The loop's own stored output is `{ "iterations": K, "sequence":
    /// [...] }` -- the iteration count and the generator's override
    /// sequence -- for nodes outside the body that depend on it directly.
    ///
    /// Boxed because nested loop nodes recurse through `run_node`.
    fn run_loop<'s>(
        &'s mut self,
        node: usize,
        resolved_input: HandleMap,
    ) -> Pin<Box<dyn Future<Output = Result<HandleMap, RunError>> + Send + 's>> {
        Box::pin(async move {
            let flow = self.flow;
            let graph = self.graph;
            let registry = self.registry;
            let events = self.events;
            let decl = &flow.nodes[node];
            let node_id = decl.id.clone();
            let run_id = self.ctx.run_id();

            let Some(Executor::Loop(driver)) = registry.resolve(&decl.node_type) else {
                // Dispatch only routes loop-kind nodes here
                return Err(RunError::Build(BuildError::UnknownNodeType {
                    node_id: node_id.clone(),
                    node_type: decl.node_type.clone(),
                }));
            };

            // One generator call per loop execution, no iteration index
            let overrides = driver
                .sequence(&resolved_input, &self.ctx, None)
                .await
                .map_err(|source| RunError::Node {
                    node_id: node_id.clone(),
                    source,
                })?;

            tracing::debug!(
                run_id = %run_id,
                node_id = node_id.as_str(),
                iterations = overrides.len(),
                "loop sequence resolved"
            );

            for (iteration, patch) in overrides.iter().enumerate() {
                if self.ctx.is_cancelled() {
                    return Err(RunError::Cancelled);
                }
                events.publish(FlowEvent::LoopIterationStarted {
                    run_id,
                    node_id: node_id.clone(),
                    iteration,
                });

                let iteration_input = overlay(&resolved_input, patch);
                let mut iteration_outputs: HashMap<usize, HandleMap> = HashMap::new();
                for &member in graph.body_order(node) {
                    let scope = Scope {
                        loop_node: node,
                        input: &iteration_input,
                        outputs: &iteration_outputs,
                    };
                    let output = self.run_node(member, Some(&scope)).await?;
                    iteration_outputs.insert(member, output);
                }

                events.publish(FlowEvent::LoopIterationCompleted {
                    run_id,
                    node_id: node_id.clone(),
                    iteration,
                });
            }

            let mut output = HandleMap::new();
            output.insert("iterations".to_string(), json!(overrides.len()));
            output.insert(
                "sequence".to_string(),
                serde_json::to_value(&overrides).unwrap_or_else(|_| json!([])),
            );
            Ok(output)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
