//! Pure functions over the model DAG.
//!
//! All operations take a start node and return either information or a new
//! start node; input nodes are never mutated. Algorithms key on node
//! *identity* (the same heap object reached via multiple reference paths is
//! one node), never on structural equality: two equal-but-distinct nodes must
//! stay distinct during rewrites. Identity maps are transient per call and
//! must not be reused after the graph changes.

pub mod find;
pub mod rewrite;

pub use find::{FoundNode, find_node, find_nodes};
pub use rewrite::{
    get_all_placeholders, replace_node_in_graph, replace_non_start_node_in_graph,
    update_placeholders_in_graph,
};

use std::collections::HashMap;
use std::sync::Arc;

use sqlgraph_error::{OptionExt, Result, SqlGraphError};

use crate::model::{ModelHandle, same_node};

/// Transient identity key for a node. Valid only while the handle is alive
/// and the graph has not been rewritten.
pub(crate) fn node_id(model: &ModelHandle) -> usize {
    Arc::as_ptr(model) as usize
}

/// Per-node information gathered by [`get_graph_nodes_info`].
#[derive(Debug, Clone)]
pub struct NodeInfo {
    /// Identifier unique within one `get_graph_nodes_info` call. Edge lists
    /// refer to these ids, not to positions in the returned vec.
    pub node_id: usize,
    /// The reference path under which this node was first discovered.
    pub reference_path: Vec<String>,
    pub model: ModelHandle,
    /// Ids of nodes referencing this node, as discovered from the start node.
    pub in_edge_ids: Vec<usize>,
    /// Ids of nodes this node references.
    pub out_edge_ids: Vec<usize>,
}

/// Build an information table for every node reachable from `start`.
///
/// The same node object reached via multiple paths is merged into one entry
/// with multiple in-edges; structurally equal but distinct objects get
/// separate entries. Nodes are returned dependencies-first. Edges reflect
/// only paths reachable from `start`; the table is stale once the graph is
/// rewritten.
pub fn get_graph_nodes_info(start: &ModelHandle) -> Vec<NodeInfo> {
    let mut infos: Vec<NodeInfo> = Vec::new();
    let mut slot_of: HashMap<usize, usize> = HashMap::new();
    collect_node_info(start, Vec::new(), &mut infos, &mut slot_of);
    infos
}

/// Post-order walk: a node is appended only after every node it references,
/// so the table stays dependencies-first even when a subgraph is shared and
/// discovered again later via a different path.
fn collect_node_info(
    node: &ModelHandle,
    path: Vec<String>,
    infos: &mut Vec<NodeInfo>,
    slot_of: &mut HashMap<usize, usize>,
) -> usize {
    if let Some(&slot) = slot_of.get(&node_id(node)) {
        return slot;
    }

    let mut out_edge_ids = Vec::new();
    for (name, child) in node.references() {
        let mut child_path = path.clone();
        child_path.push(name.clone());
        out_edge_ids.push(collect_node_info(child, child_path, infos, slot_of));
    }

    let slot = infos.len();
    slot_of.insert(node_id(node), slot);
    for &child_slot in &out_edge_ids {
        infos[child_slot].in_edge_ids.push(slot);
    }
    infos.push(NodeInfo {
        node_id: slot,
        reference_path: path,
        model: node.clone(),
        in_edge_ids: Vec::new(),
        out_edge_ids,
    });
    slot
}

/// Follow a reference path from `start`, erroring on the first missing
/// segment.
pub fn get_node(start: &ModelHandle, reference_path: &[String]) -> Result<ModelHandle> {
    let mut current = start.clone();
    for segment in reference_path {
        current = current.references().get(segment).cloned().ok_or_else(|| {
            SqlGraphError::new(format!(
                "reference '{segment}' does not exist while following path {reference_path:?}"
            ))
        })?;
    }
    Ok(current)
}

/// Locate a node by path and return its entry in the info table.
pub fn get_node_info_selected_node(
    start: &ModelHandle,
    reference_path: &[String],
) -> Result<NodeInfo> {
    let selected = get_node(start, reference_path)?;
    get_graph_nodes_info(start)
        .into_iter()
        .find(|info| same_node(&info.model, &selected))
        .required("node found by path does not appear in the graph info table")
}
