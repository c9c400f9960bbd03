//! Edge-based value propagation.
//!
//! When a node is about to run, its effective input is its declared static
//! input overlaid with one value per incoming edge: the source node's output
//! handle copied onto the target's input handle. Later-declared edges win
//! when several write the same handle.

use thiserror::Error;
use weir_types::flow::{Edge, HandleMap};

/// Contract violation: a completed node's output lacks a handle an edge reads.
///
/// Raised at propagation time, never silently defaulted -- a producer that
/// advertises a handle through an edge must actually populate it.
#[derive(Debug, Error)]
#[error("node '{node_id}' completed without output handle '{handle}'")]
pub struct MissingHandleError {
    /// The source node whose output is missing the handle.
    pub node_id: String,
    /// The absent handle name.
    pub handle: String,
}

/// Copy the value the edge routes from a completed source output into a
/// pending target input.
///
/// Writes `source_output[edge.source_handle]` to
/// `target_input[edge.target_handle]`, overriding any placeholder already
/// declared there.
pub fn map_edge(
    edge: &Edge,
    source_output: &HandleMap,
    target_input: &mut HandleMap,
) -> Result<(), MissingHandleError> {
    let value = source_output
        .get(&edge.source_handle)
        .ok_or_else(|| MissingHandleError {
            node_id: edge.source.clone(),
            handle: edge.source_handle.clone(),
        })?;
    target_input.insert(edge.target_handle.clone(), value.clone());
    Ok(())
}

/// Overlay `patch` onto `base`, returning the merged mapping.
///
/// Entries from `patch` win on key collisions. Used by the loop protocol to
/// merge a per-iteration override into the loop node's resolved input.
pub fn overlay(base: &HandleMap, patch: &HandleMap) -> HandleMap {
    let mut merged = base.clone();
    for (handle, value) in patch {
        merged.insert(handle.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn map_edge_copies_value_losslessly() {
        let edge = Edge::new("a", "result", "b", "payload");
        let mut source_output = HandleMap::new();
        source_output.insert(
            "result".to_string(),
            json!({ "rows": [1, 2, 3], "meta": { "ok": true } }),
        );
        let mut target_input = HandleMap::new();

        map_edge(&edge, &source_output, &mut target_input).unwrap();
        assert_eq!(target_input["payload"], source_output["result"]);
    }

    #[test]
    fn map_edge_overrides_placeholder() {
        let edge = Edge::new("a", "out", "b", "in");
        let mut source_output = HandleMap::new();
        source_output.insert("out".to_string(), json!(42));
        let mut target_input = HandleMap::new();
        target_input.insert("in".to_string(), json!(null));

        map_edge(&edge, &source_output, &mut target_input).unwrap();
        assert_eq!(target_input["in"], json!(42));
    }

    #[test]
    fn map_edge_missing_handle_is_an_error() {
        let edge = Edge::new("a", "absent", "b", "in");
        let source_output = HandleMap::new();
        let mut target_input = HandleMap::new();

        let err = map_edge(&edge, &source_output, &mut target_input).unwrap_err();
        assert_eq!(err.node_id, "a");
        assert_eq!(err.handle, "absent");
        assert!(target_input.is_empty());
    }

    #[test]
    fn overlay_patch_wins() {
        let mut base = HandleMap::new();
        base.insert("keep".to_string(), json!("base"));
        base.insert("replace".to_string(), json!("base"));
        let mut patch = HandleMap::new();
        patch.insert("replace".to_string(), json!("patch"));
        patch.insert("add".to_string(), json!("patch"));

        let merged = overlay(&base, &patch);
        assert_eq!(merged["keep"], json!("base"));
        assert_eq!(merged["replace"], json!("patch"));
        assert_eq!(merged["add"], json!("patch"));
    }
}
