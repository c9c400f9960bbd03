//! Flow graph builder: validation, topological ordering, and loop-body
//! ownership.
//!
//! Uses `petgraph` to model edges as a directed graph over an arena of
//! declaration-indexed nodes (ids are mapped to indices exactly once, at
//! build time). All structural validation happens here, before any node
//! executes: duplicate ids, dangling edges, unknown node types, cycles, and
//! edges that cross a loop body boundary.
//!
//! A loop node's body is the set of nodes reachable from it exclusively
//! through edges originating (directly or transitively) at the loop node.
//! Body membership is materialized once into an ownership index; body nodes
//! are excluded from the top-level order and get their own internal order,
//! replayed per iteration by the scheduler.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef};
use thiserror::Error;
use weir_types::flow::{Edge, Flow};

use crate::registry::{ExecutorKind, ExecutorRegistry};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while validating and building a flow graph.
///
/// All of these are detected before execution starts and abort the run
/// whole: no node executes when the flow fails to build.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Two nodes share the same id.
    #[error("duplicate node id: '{node_id}'")]
    DuplicateNodeId { node_id: String },

    /// An edge references a node that is not part of the flow.
    #[error("edge '{from}' -> '{target}' references unknown node '{missing}'")]
    DanglingEdge {
        from: String,
        target: String,
        missing: String,
    },

    /// A node's type tag has no registered executor.
    #[error("node '{node_id}' has unregistered type '{node_type}'")]
    UnknownNodeType { node_id: String, node_type: String },

    /// The dependency graph contains a cycle.
    #[error("cycle detected involving node '{node_id}'")]
    CycleDetected { node_id: String },

    /// An edge crosses a loop body boundary without originating at the
    /// loop node itself.
    #[error("edge '{from}' -> '{target}' crosses a loop body boundary")]
    InvalidLoopTopology { from: String, target: String },
}

fn dangling(edge: &Edge, missing: &str) -> BuildError {
    BuildError::DanglingEdge {
        from: edge.source.clone(),
        target: edge.target.clone(),
        missing: missing.to_string(),
    }
}

// ---------------------------------------------------------------------------
// FlowGraph
// ---------------------------------------------------------------------------

/// A validated, ordered flow graph ready for scheduling.
///
/// Nodes and edges are addressed by declaration index throughout; the
/// id-to-index map is built once here and never re-derived.
#[derive(Debug)]
pub struct FlowGraph {
    /// Top-level execution order (declaration indices). Loop-body members
    /// are excluded and delegated to their owning loop.
    order: Vec<usize>,
    /// Incoming edge declaration indices per node, in declaration order.
    incoming: Vec<Vec<usize>>,
    /// Resolved (source, target) declaration indices per edge.
    edges: Vec<(usize, usize)>,
    /// Innermost owning loop per node, if the node belongs to a loop body.
    owner: Vec<Option<usize>>,
    /// Internal execution order of each loop's directly-owned body members.
    body_order: HashMap<usize, Vec<usize>>,
    /// Node id -> declaration index.
    index_of: HashMap<String, usize>,
}

impl FlowGraph {
    /// Validate a flow against the registry and build its execution plan.
    pub fn build(flow: &Flow, registry: &ExecutorRegistry) -> Result<Self, BuildError> {
        let n = flow.nodes.len();

        // Unique ids, mapped to declaration indices
        let mut index_of = HashMap::with_capacity(n);
        for (i, node) in flow.nodes.iter().enumerate() {
            if index_of.insert(node.id.clone(), i).is_some() {
                return Err(BuildError::DuplicateNodeId {
                    node_id: node.id.clone(),
                });
            }
        }

        // Every node type must resolve before anything executes
        let mut kinds = Vec::with_capacity(n);
        for node in &flow.nodes {
            let kind = registry
                .kind(&node.node_type)
                .ok_or_else(|| BuildError::UnknownNodeType {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                })?;
            kinds.push(kind);
        }

        // Edges must stay inside the flow
        let mut edges = Vec::with_capacity(flow.edges.len());
        for edge in &flow.edges {
            let source = *index_of
                .get(&edge.source)
                .ok_or_else(|| dangling(edge, &edge.source))?;
            let target = *index_of
                .get(&edge.target)
                .ok_or_else(|| dangling(edge, &edge.target))?;
            edges.push((source, target));
        }

        // Adjacency over the arena: node weights are declaration indices.
        let mut graph = DiGraph::<usize, ()>::new();
        let node_indices: Vec<NodeIndex> = (0..n).map(|i| graph.add_node(i)).collect();
        for &(source, target) in &edges {
            graph.add_edge(node_indices[source], node_indices[target], ());
        }

        // Incoming edge lists, in declaration order
        let mut incoming = vec![Vec::new(); n];
        for (e, &(_, target)) in edges.iter().enumerate() {
            incoming[target].push(e);
        }

        // Loop bodies: descendants of a loop node, trimmed to those with no
        // way in from outside the loop. Trimming cascades until stable.
        let loop_nodes: Vec<usize> = (0..n).filter(|&i| kinds[i] == ExecutorKind::Loop).collect();
        let mut exclusive: Vec<(usize, HashSet<usize>)> = Vec::with_capacity(loop_nodes.len());
        for &l in &loop_nodes {
            let mut body = HashSet::new();
            let mut dfs = Dfs::new(&graph, node_indices[l]);
            while let Some(nx) = dfs.next(&graph) {
                let i = graph[nx];
                if i != l {
                    body.insert(i);
                }
            }
            loop {
                let trimmed: Vec<usize> = body
                    .iter()
                    .copied()
                    .filter(|&m| {
                        incoming[m].iter().any(|&e| {
                            let (source, _) = edges[e];
                            source != l && !body.contains(&source)
                        })
                    })
                    .collect();
                if trimmed.is_empty() {
                    break;
                }
                for m in trimmed {
                    body.remove(&m);
                }
            }
            exclusive.push((l, body));
        }

        // Innermost owner per node: nested loops have strictly smaller
        // exclusive sets, so they assign first.
        exclusive.sort_by_key(|(_, body)| body.len());
        let mut owner: Vec<Option<usize>> = vec![None; n];
        for (l, body) in &exclusive {
            for &m in body {
                if owner[m].is_none() {
                    owner[m] = Some(*l);
                }
            }
        }

        // Edges may cross a loop boundary only when leaving the loop node
        // itself into its own body.
        for (e, &(source, target)) in edges.iter().enumerate() {
            let valid = owner[source] == owner[target]
                || (kinds[source] == ExecutorKind::Loop && owner[target] == Some(source));
            if !valid {
                let edge = &flow.edges[e];
                return Err(BuildError::InvalidLoopTopology {
                    from: edge.source.clone(),
                    target: edge.target.clone(),
                });
            }
        }

        // Top-level order over nodes not owned by any loop
        let top_members: Vec<usize> = (0..n).filter(|&i| owner[i].is_none()).collect();
        let order = scope_order(&top_members, &graph, &node_indices, flow)?;

        // Internal order of each loop's directly-owned members. Edges from
        // the loop node itself carry values, not ordering constraints: the
        // loop resolves before any iteration runs.
        let mut body_order = HashMap::new();
        for (l, body) in &exclusive {
            let mut members: Vec<usize> = body
                .iter()
                .copied()
                .filter(|&m| owner[m] == Some(*l))
                .collect();
            members.sort_unstable();
            body_order.insert(*l, scope_order(&members, &graph, &node_indices, flow)?);
        }

        Ok(Self {
            order,
            incoming,
            edges,
            owner,
            body_order,
            index_of,
        })
    }

    /// Top-level execution order as node declaration indices.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Number of nodes in the flow.
    pub fn node_count(&self) -> usize {
        self.incoming.len()
    }

    /// The innermost loop owning this node, if it belongs to a loop body.
    pub fn owner(&self, node: usize) -> Option<usize> {
        self.owner[node]
    }

    /// Incoming edge declaration indices of a node, in declaration order.
    pub fn incoming(&self, node: usize) -> &[usize] {
        &self.incoming[node]
    }

    /// Resolved (source, target) declaration indices of an edge.
    pub fn endpoints(&self, edge: usize) -> (usize, usize) {
        self.edges[edge]
    }

    /// Internal execution order of a loop node's directly-owned body.
    pub fn body_order(&self, loop_node: usize) -> &[usize] {
        self.body_order
            .get(&loop_node)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Declaration index of a node id.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index_of.get(id).copied()
    }
}

// ---------------------------------------------------------------------------
// Deterministic topological ordering (per scope)
// ---------------------------------------------------------------------------

/// Kahn's algorithm restricted to one scope's members, with ties among ready
/// nodes broken by declaration index.
///
/// `petgraph::algo::toposort` alone does not promise a declaration-stable
/// tie-break, so the frontier is kept in a min-heap of declaration indices.
/// Members left unordered when the frontier drains mean a cycle.
fn scope_order(
    members: &[usize],
    graph: &DiGraph<usize, ()>,
    node_indices: &[NodeIndex],
    flow: &Flow,
) -> Result<Vec<usize>, BuildError> {
    let member_set: HashSet<usize> = members.iter().copied().collect();

    let mut indegree: HashMap<usize, usize> = members.iter().map(|&m| (m, 0)).collect();
    for edge in graph.edge_references() {
        let source = graph[edge.source()];
        let target = graph[edge.target()];
        if member_set.contains(&source) && member_set.contains(&target) {
            *indegree.get_mut(&target).expect("member indegree") += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = members
        .iter()
        .copied()
        .filter(|m| indegree[m] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(members.len());
    let mut processed = HashSet::with_capacity(members.len());
    while let Some(Reverse(next)) = ready.pop() {
        if !processed.insert(next) {
            continue;
        }
        order.push(next);
        for edge in graph.edges_directed(node_indices[next], Direction::Outgoing) {
            let target = graph[edge.target()];
            if !member_set.contains(&target) {
                continue;
            }
            let remaining = indegree.get_mut(&target).expect("member indegree");
            *remaining -= 1;
            if *remaining == 0 {
                ready.push(Reverse(target));
            }
        }
    }

    if order.len() < members.len() {
        let stuck = members
            .iter()
            .copied()
            .filter(|m| !processed.contains(m))
            .min()
            .expect("at least one unordered member");
        return Err(BuildError::CycleDetected {
            node_id: flow.nodes[stuck].id.clone(),
        });
    }
    Ok(order)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;

    use weir_types::flow::{HandleMap, Node};

    use crate::context::RunContext;
    use crate::registry::{Executor, LoopExecutor, NodeExecutor};

    struct Task;

    impl NodeExecutor for Task {
        fn node_type(&self) -> &str {
            "task"
        }

        fn execute(
            &self,
            _input: &HandleMap,
            _run: &RunContext,
        ) -> impl Future<Output = anyhow::Result<HandleMap>> + Send {
            async { Ok(HandleMap::new()) }
        }
    }

    struct ForEach;

    impl LoopExecutor for ForEach {
        fn node_type(&self) -> &str {
            "each"
        }

        fn sequence(
            &self,
            _input: &HandleMap,
            _run: &RunContext,
            _iteration: Option<usize>,
        ) -> impl Future<Output = anyhow::Result<Vec<HandleMap>>> + Send {
            async { Ok(vec![]) }
        }
    }

    fn test_registry() -> ExecutorRegistry {
        let mut registry = ExecutorRegistry::new();
        registry.register(Executor::simple(Task));
        registry.register(Executor::looping(ForEach));
        registry
    }

    fn task(id: &str) -> Node {
        Node::new(id, "task")
    }

    fn each(id: &str) -> Node {
        Node::new(id, "each")
    }

    fn edge(source: &str, target: &str) -> Edge {
        Edge::new(source, "out", target, "in")
    }

    fn order_ids<'a>(flow: &'a Flow, order: &[usize]) -> Vec<&'a str> {
        order.iter().map(|&i| flow.nodes[i].id.as_str()).collect()
    }

    // -----------------------------------------------------------------------
    // Ordering
    // -----------------------------------------------------------------------

    #[test]
    fn independent_nodes_keep_declaration_order() {
        let flow = Flow::new(vec![task("c"), task("a"), task("b")], vec![]);
        let graph = FlowGraph::build(&flow, &test_registry()).unwrap();
        assert_eq!(order_ids(&flow, graph.order()), vec!["c", "a", "b"]);
    }

    #[test]
    fn linear_chain_follows_edges() {
        let flow = Flow::new(
            vec![task("c"), task("b"), task("a")],
            vec![edge("a", "b"), edge("b", "c")],
        );
        let graph = FlowGraph::build(&flow, &test_registry()).unwrap();
        assert_eq!(order_ids(&flow, graph.order()), vec!["a", "b", "c"]);
    }

    #[test]
    fn diamond_ties_break_by_declaration() {
        // a -> {b, c} -> d, with c declared before b
        let flow = Flow::new(
            vec![task("a"), task("c"), task("b"), task("d")],
            vec![
                edge("a", "b"),
                edge("a", "c"),
                edge("b", "d"),
                edge("c", "d"),
            ],
        );
        let graph = FlowGraph::build(&flow, &test_registry()).unwrap();
        assert_eq!(order_ids(&flow, graph.order()), vec!["a", "c", "b", "d"]);
    }

    // -----------------------------------------------------------------------
    // Validation failures
    // -----------------------------------------------------------------------

    #[test]
    fn duplicate_node_id_rejected() {
        let flow = Flow::new(vec![task("a"), task("a")], vec![]);
        let err = FlowGraph::build(&flow, &test_registry()).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateNodeId { node_id } if node_id == "a"));
    }

    #[test]
    fn dangling_edge_rejected() {
        let flow = Flow::new(vec![task("a")], vec![edge("a", "ghost")]);
        let err = FlowGraph::build(&flow, &test_registry()).unwrap_err();
        assert!(matches!(err, BuildError::DanglingEdge { missing, .. } if missing == "ghost"));
    }

    #[test]
    fn unknown_node_type_rejected() {
        let flow = Flow::new(vec![task("a"), Node::new("b", "teleport")], vec![]);
        let err = FlowGraph::build(&flow, &test_registry()).unwrap_err();
        assert!(matches!(
            err,
            BuildError::UnknownNodeType { node_id, node_type }
                if node_id == "b" && node_type == "teleport"
        ));
    }

    #[test]
    fn two_node_cycle_rejected() {
        let flow = Flow::new(
            vec![task("a"), task("b")],
            vec![edge("a", "b"), edge("b", "a")],
        );
        let err = FlowGraph::build(&flow, &test_registry()).unwrap_err();
        assert!(matches!(err, BuildError::CycleDetected { .. }));
    }

    #[test]
    fn self_edge_rejected_as_cycle() {
        let flow = Flow::new(vec![task("a")], vec![edge("a", "a")]);
        let err = FlowGraph::build(&flow, &test_registry()).unwrap_err();
        assert!(matches!(err, BuildError::CycleDetected { node_id } if node_id == "a"));
    }

    #[test]
    fn empty_flow_builds() {
        let graph = FlowGraph::build(&Flow::default(), &test_registry()).unwrap();
        assert!(graph.order().is_empty());
        assert_eq!(graph.node_count(), 0);
    }

    // -----------------------------------------------------------------------
    // Loop bodies
    // -----------------------------------------------------------------------

    #[test]
    fn loop_body_excluded_from_top_order() {
        let flow = Flow::new(
            vec![task("seed"), each("loop"), task("t1"), task("t2")],
            vec![
                edge("seed", "loop"),
                edge("loop", "t1"),
                edge("t1", "t2"),
            ],
        );
        let graph = FlowGraph::build(&flow, &test_registry()).unwrap();

        assert_eq!(order_ids(&flow, graph.order()), vec!["seed", "loop"]);
        let l = graph.index_of("loop").unwrap();
        assert_eq!(order_ids(&flow, graph.body_order(l)), vec!["t1", "t2"]);
        assert_eq!(graph.owner(graph.index_of("t1").unwrap()), Some(l));
        assert_eq!(graph.owner(graph.index_of("t2").unwrap()), Some(l));
        assert_eq!(graph.owner(l), None);
    }

    #[test]
    fn node_reachable_from_outside_is_not_body() {
        // "join" is fed by the loop AND by "other", so it stays top-level
        // and reads the loop node's stored output.
        let flow = Flow::new(
            vec![each("loop"), task("other"), task("join")],
            vec![edge("loop", "join"), edge("other", "join")],
        );
        let graph = FlowGraph::build(&flow, &test_registry()).unwrap();

        let join = graph.index_of("join").unwrap();
        assert_eq!(graph.owner(join), None);
        assert_eq!(order_ids(&flow, graph.order()), vec!["loop", "other", "join"]);
    }

    #[test]
    fn body_escape_edge_rejected() {
        // "sink" is reachable both through the loop body and from "outside",
        // so the body edge into it crosses the boundary.
        let flow = Flow::new(
            vec![each("loop"), task("inner"), task("outside"), task("sink")],
            vec![
                edge("loop", "inner"),
                edge("inner", "sink"),
                edge("outside", "sink"),
            ],
        );
        let err = FlowGraph::build(&flow, &test_registry()).unwrap_err();
        assert!(matches!(
            err,
            BuildError::InvalidLoopTopology { from: source, target }
                if source == "inner" && target == "sink"
        ));
    }

    #[test]
    fn edge_between_two_loop_bodies_rejected() {
        let flow = Flow::new(
            vec![each("l1"), each("l2"), task("a"), task("b")],
            vec![edge("l1", "a"), edge("l2", "b"), edge("a", "b")],
        );
        let err = FlowGraph::build(&flow, &test_registry()).unwrap_err();
        assert!(matches!(err, BuildError::InvalidLoopTopology { .. }));
    }

    #[test]
    fn nested_loop_ownership_is_innermost() {
        let flow = Flow::new(
            vec![each("outer"), task("a"), each("inner"), task("b")],
            vec![
                edge("outer", "a"),
                edge("outer", "inner"),
                edge("inner", "b"),
            ],
        );
        let graph = FlowGraph::build(&flow, &test_registry()).unwrap();

        let outer = graph.index_of("outer").unwrap();
        let inner = graph.index_of("inner").unwrap();
        assert_eq!(graph.owner(graph.index_of("a").unwrap()), Some(outer));
        assert_eq!(graph.owner(inner), Some(outer));
        assert_eq!(graph.owner(graph.index_of("b").unwrap()), Some(inner));

        assert_eq!(order_ids(&flow, graph.order()), vec!["outer"]);
        assert_eq!(order_ids(&flow, graph.body_order(outer)), vec!["a", "inner"]);
        assert_eq!(order_ids(&flow, graph.body_order(inner)), vec!["b"]);
    }

    #[test]
    fn cycle_inside_loop_body_rejected() {
        let flow = Flow::new(
            vec![each("loop"), task("a"), task("b")],
            vec![edge("loop", "a"), edge("a", "b"), edge("b", "a")],
        );
        let err = FlowGraph::build(&flow, &test_registry()).unwrap_err();
        assert!(matches!(err, BuildError::CycleDetected { .. }));
    }

    #[test]
    fn empty_loop_body_is_allowed() {
        let flow = Flow::new(vec![each("loop")], vec![]);
        let graph = FlowGraph::build(&flow, &test_registry()).unwrap();
        let l = graph.index_of("loop").unwrap();
        assert_eq!(order_ids(&flow, graph.order()), vec!["loop"]);
        assert!(graph.body_order(l).is_empty());
    }
}
