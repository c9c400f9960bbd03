//! Typed node-graph execution engine.
//!
//! Weir runs a directed graph of typed nodes connected by edges that route
//! named outputs of one node into named inputs of another. A loop-capable
//! node re-executes its descendant sub-graph once per element of a
//! runtime-computed sequence.
//!
//! - `registry` -- executor traits and the node-type registry
//! - `dag` -- validation, topological ordering, loop-body ownership
//! - `propagate` -- edge-based value propagation
//! - `context` -- run-scoped side data and cooperative cancellation
//! - `scheduler` -- dependency-ordered execution and the loop protocol
//! - `event` -- broadcast bus for lifecycle events
//! - `engine` -- public facade tying the pieces together

pub mod context;
pub mod dag;
pub mod engine;
pub mod event;
pub mod propagate;
pub mod registry;
pub mod scheduler;
