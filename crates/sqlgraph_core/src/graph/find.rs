use std::collections::{HashMap, VecDeque};

use indexmap::IndexMap;

use super::node_id;
use crate::model::{ModelHandle, SqlModel};

/// A node matched by [`find_nodes`], tagged with one representative
/// reference path.
#[derive(Debug, Clone)]
pub struct FoundNode {
    pub model: ModelHandle,
    pub reference_path: Vec<String>,
}

/// Breadth-first search collecting every distinct node object for which
/// `predicate` holds.
///
/// With `first_instance` set, each node keeps the shortest discovered path.
/// Otherwise it keeps the longest, and a node whose entry is superseded by a
/// longer path is evicted and reinserted, moving it later in the result.
/// That reordering is load-bearing: reversing the longest-path result yields
/// a dependency-before-dependent order, which callers rely on when emitting
/// statements.
///
/// Only the best path length per node is tracked, so diamond-heavy graphs
/// with exponentially many distinct paths stay cheap: a node is re-expanded
/// only when a strictly longer path to it is found.
pub fn find_nodes<P>(start: &ModelHandle, predicate: P, first_instance: bool) -> Vec<FoundNode>
where
    P: Fn(&SqlModel) -> bool,
{
    let mut found: IndexMap<usize, FoundNode> = IndexMap::new();
    let mut best_len: HashMap<usize, usize> = HashMap::new();
    let mut queue: VecDeque<(ModelHandle, Vec<String>)> = VecDeque::new();
    queue.push_back((start.clone(), Vec::new()));

    while let Some((node, path)) = queue.pop_front() {
        let id = node_id(&node);
        match best_len.get(&id) {
            // BFS visits shortest paths first, so the first visit wins.
            Some(_) if first_instance => continue,
            // Longest-path mode: only a strict improvement is worth
            // re-expanding.
            Some(&len) if path.len() <= len => continue,
            _ => {}
        }
        best_len.insert(id, path.len());

        if predicate(&node) {
            if !first_instance {
                found.shift_remove(&id);
            }
            found.insert(
                id,
                FoundNode {
                    model: node.clone(),
                    reference_path: path.clone(),
                },
            );
        }

        for (name, child) in node.references() {
            let mut child_path = path.clone();
            child_path.push(name.clone());
            queue.push_back((child.clone(), child_path));
        }
    }

    found.into_values().collect()
}

/// First match of [`find_nodes`], or None.
pub fn find_node<P>(start: &ModelHandle, predicate: P, first_instance: bool) -> Option<FoundNode>
where
    P: Fn(&SqlModel) -> bool,
{
    find_nodes(start, predicate, first_instance).into_iter().next()
}
