//! Shared domain types for Weir.
//!
//! This crate contains the plain data records exchanged with the execution
//! engine: `Flow`, `Node`, `Edge`, and the `FlowEvent` lifecycle events.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, uuid.

pub mod event;
pub mod flow;
