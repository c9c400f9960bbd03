//! Flow definition types: nodes, edges, and the flows that connect them.
//!
//! A `Flow` is the canonical execution request: a set of uniquely-identified,
//! typed `Node`s plus the `Edge`s that route one node's output handles into
//! another node's input handles. Flows are plain data -- validation, ordering,
//! and execution all happen in the engine, not here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named-slot mapping for node inputs and outputs.
///
/// Keys are handle names, values arbitrary JSON. Callers may declare
/// placeholder handles as `Value::Null`; edge-propagated values override
/// them at run time.
pub type HandleMap = HashMap<String, Value>;

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A unit of work in a flow.
///
/// The `node_type` tag selects the executor registered for it. `input` is
/// the node's static input mapping; values arriving over edges are merged on
/// top of it when the node is scheduled. Outputs are not stored here: a flow
/// is an immutable execution request, and output buffers belong to the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Node id, unique within the flow.
    pub id: String,
    /// Executor type tag (e.g. "http", "transform").
    #[serde(rename = "type")]
    pub node_type: String,
    /// Static input mapping (handle name -> value).
    #[serde(default)]
    pub input: HandleMap,
}

impl Node {
    /// Create a node with an empty input mapping.
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            input: HandleMap::new(),
        }
    }

    /// Add a static input handle.
    pub fn with_input(mut self, handle: impl Into<String>, value: Value) -> Self {
        self.input.insert(handle.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// A directed connection from one node's output handle to another node's
/// input handle.
///
/// Both `source` and `target` must reference nodes declared in the same
/// flow; the engine rejects the edge before any execution otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id.
    pub source: String,
    /// Output handle read on the source node.
    pub source_handle: String,
    /// Target node id.
    pub target: String,
    /// Input handle written on the target node.
    pub target_handle: String,
}

impl Edge {
    /// Create an edge from `source.source_handle` to `target.target_handle`.
    pub fn new(
        source: impl Into<String>,
        source_handle: impl Into<String>,
        target: impl Into<String>,
        target_handle: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            source_handle: source_handle.into(),
            target: target.into(),
            target_handle: target_handle.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

/// A complete node + edge graph submitted for one execution run.
///
/// Declaration order is significant: topological ties are broken by node
/// declaration order, and when several edges write the same input handle the
/// later-declared edge wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Flow {
    /// The nodes of the flow, ids unique.
    pub nodes: Vec<Node>,
    /// Edges connecting output handles to input handles.
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Flow {
    /// Create a flow from nodes and edges.
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
