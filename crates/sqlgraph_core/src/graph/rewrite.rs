use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;
use sqlgraph_error::{Result, SqlGraphError};
use tracing::debug;

use super::{find_node, find_nodes, get_node, node_id};
use crate::model::{ModelHandle, PlaceholderValue, same_node};

/// Collect every placeholder in the graph, mapping each name to the values it
/// carries at each node (keyed by one representative reference path per
/// node), so the same name used differently at different nodes is observable.
pub fn get_all_placeholders(
    start: &ModelHandle,
) -> BTreeMap<String, BTreeMap<Vec<String>, PlaceholderValue>> {
    let mut all: BTreeMap<String, BTreeMap<Vec<String>, PlaceholderValue>> = BTreeMap::new();
    for found in find_nodes(start, |_| true, true) {
        for (name, value) in found.model.placeholders() {
            all.entry(name.clone())
                .or_default()
                .insert(found.reference_path.clone(), value.clone());
        }
    }
    all
}

/// Rewrite every node whose placeholders differ from `new_values`.
///
/// Nodes without a matching placeholder, or whose value already equals the
/// new one, are left as the same object. If nothing needs updating the
/// original start handle is returned unchanged.
pub fn update_placeholders_in_graph(
    start: &ModelHandle,
    new_values: &IndexMap<String, PlaceholderValue>,
) -> Result<ModelHandle> {
    let needs_update = |model: &crate::model::SqlModel| {
        model.placeholders().iter().any(|(name, value)| {
            new_values
                .get(name)
                .is_some_and(|new_value| new_value != value)
        })
    };

    let mut current = start.clone();
    while let Some(found) = find_node(&current, needs_update, true) {
        let mut placeholders = found.model.placeholders().clone();
        for (name, value) in placeholders.iter_mut() {
            if let Some(new_value) = new_values.get(name) {
                *value = new_value.clone();
            }
        }
        debug!(path = ?found.reference_path, "updating placeholders in graph node");
        let updated = found.model.copy_override().placeholders(placeholders).build();
        current = replace_node_in_graph(&current, &found.reference_path, updated)?;
    }
    Ok(current)
}

/// Replace the node at `reference_path` with `replacement`, producing a new
/// graph.
///
/// Every node that transitively depends on the replaced node is copied and
/// re-linked; every node that does not is reused as the same object. If the
/// replaced node was reachable via multiple paths, all of them end up at the
/// same new subgraph: sharing is reconstructed, not duplicated. An empty path
/// replaces the root, returning `replacement` directly.
pub fn replace_node_in_graph(
    start: &ModelHandle,
    reference_path: &[String],
    replacement: ModelHandle,
) -> Result<ModelHandle> {
    if reference_path.is_empty() {
        return Ok(replacement);
    }
    let target = get_node(start, reference_path)?;
    debug!(path = ?reference_path, "replacing node in graph");
    let mut rebuilt: HashMap<usize, ModelHandle> = HashMap::new();
    Ok(rebuild(start, node_id(&target), &replacement, &mut rebuilt))
}

/// Like [`replace_node_in_graph`], but forbids replacing the start node, so
/// the returned graph is always a rewrite of `start` itself.
pub fn replace_non_start_node_in_graph(
    start: &ModelHandle,
    reference_path: &[String],
    replacement: ModelHandle,
) -> Result<ModelHandle> {
    if reference_path.is_empty() {
        return Err(SqlGraphError::new(
            "reference path is empty: cannot replace the start node itself",
        ));
    }
    replace_node_in_graph(start, reference_path, replacement)
}

fn rebuild(
    node: &ModelHandle,
    target: usize,
    replacement: &ModelHandle,
    rebuilt: &mut HashMap<usize, ModelHandle>,
) -> ModelHandle {
    if node_id(node) == target {
        return replacement.clone();
    }
    if let Some(done) = rebuilt.get(&node_id(node)) {
        return done.clone();
    }

    let mut changed = false;
    let mut references = IndexMap::with_capacity(node.references().len());
    for (name, child) in node.references() {
        let new_child = rebuild(child, target, replacement, rebuilt);
        changed |= !same_node(&new_child, child);
        references.insert(name.clone(), new_child);
    }

    let result = if changed {
        node.copy_override().references(references).build()
    } else {
        node.clone()
    };
    rebuilt.insert(node_id(node), result.clone());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SqlModel;

    fn leaf(name: &str) -> ModelHandle {
        SqlModel::builder(name, "select 1").build()
    }

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    /// start -> {l: left, r: right, u: unrelated}; left/right both -> shared.
    fn diamond() -> (ModelHandle, ModelHandle, ModelHandle) {
        let shared = leaf("Shared");
        let left = SqlModel::builder("Left", "select * from {{s}}")
            .reference("s", shared.clone())
            .build();
        let right = SqlModel::builder("Right", "select * from {{s}}")
            .reference("s", shared.clone())
            .build();
        let unrelated = leaf("Unrelated");
        let start = SqlModel::builder("Top", "select * from {{l}}, {{r}}, {{u}}")
            .reference("l", left)
            .reference("r", right)
            .reference("u", unrelated.clone())
            .build();
        (start, shared, unrelated)
    }

    #[test]
    fn replacement_reconstructs_sharing() {
        let (start, _shared, unrelated) = diamond();
        let replacement = leaf("Replacement");

        let new_start =
            replace_node_in_graph(&start, &path(&["l", "s"]), replacement.clone()).unwrap();

        // Both paths resolve to the same new object.
        let via_left = get_node(&new_start, &path(&["l", "s"])).unwrap();
        let via_right = get_node(&new_start, &path(&["r", "s"])).unwrap();
        assert!(same_node(&via_left, &replacement));
        assert!(same_node(&via_right, &replacement));

        // Nodes not on a path to the target are literally the same objects.
        let new_unrelated = get_node(&new_start, &path(&["u"])).unwrap();
        assert!(same_node(&new_unrelated, &unrelated));

        // Dependents were copied.
        let new_left = get_node(&new_start, &path(&["l"])).unwrap();
        let old_left = get_node(&start, &path(&["l"])).unwrap();
        assert!(!same_node(&new_left, &old_left));

        // The original graph still points at the old shared node.
        let old_shared = get_node(&start, &path(&["l", "s"])).unwrap();
        assert!(!same_node(&old_shared, &replacement));
    }

    #[test]
    fn rebuilt_dependents_stay_shared() {
        // Two parents of the replaced node must end up pointing at one new
        // parent subgraph when they themselves are shared.
        let shared = leaf("Shared");
        let mid = SqlModel::builder("Mid", "select * from {{s}}")
            .reference("s", shared.clone())
            .build();
        let start = SqlModel::builder("Top", "select * from {{a}}, {{b}}")
            .reference("a", mid.clone())
            .reference("b", mid)
            .build();

        let new_start =
            replace_node_in_graph(&start, &path(&["a", "s"]), leaf("New")).unwrap();
        let via_a = get_node(&new_start, &path(&["a"])).unwrap();
        let via_b = get_node(&new_start, &path(&["b"])).unwrap();
        assert!(same_node(&via_a, &via_b));
    }

    #[test]
    fn replace_root_returns_replacement() {
        let start = leaf("Start");
        let replacement = leaf("New");
        let got = replace_node_in_graph(&start, &[], replacement.clone()).unwrap();
        assert!(same_node(&got, &replacement));

        assert!(replace_non_start_node_in_graph(&start, &[], replacement).is_err());
    }

    #[test]
    fn update_placeholders_is_identity_preserving_noop() {
        let node = SqlModel::builder("N", "select {limit}")
            .placeholder("limit", PlaceholderValue::Int(10))
            .build();
        let start = SqlModel::builder("Top", "select * from {{n}}")
            .reference("n", node)
            .build();

        // Same value: nothing to do, same object back.
        let mut values = IndexMap::new();
        values.insert("limit".to_string(), PlaceholderValue::Int(10));
        let got = update_placeholders_in_graph(&start, &values).unwrap();
        assert!(same_node(&got, &start));

        // Unknown placeholder name: also a no-op.
        let mut values = IndexMap::new();
        values.insert("other".to_string(), PlaceholderValue::Int(1));
        let got = update_placeholders_in_graph(&start, &values).unwrap();
        assert!(same_node(&got, &start));
    }

    #[test]
    fn update_placeholders_rewrites_matching_nodes() {
        let inner = SqlModel::builder("Inner", "select {limit}")
            .placeholder("limit", PlaceholderValue::Int(10))
            .build();
        let other = SqlModel::builder("Other", "select 2").build();
        let start = SqlModel::builder("Top", "select * from {{i}}, {{o}}")
            .reference("i", inner)
            .reference("o", other.clone())
            .build();

        let mut values = IndexMap::new();
        values.insert("limit".to_string(), PlaceholderValue::Int(99));
        let got = update_placeholders_in_graph(&start, &values).unwrap();

        assert!(!same_node(&got, &start));
        let new_inner = get_node(&got, &path(&["i"])).unwrap();
        assert_eq!(
            Some(&PlaceholderValue::Int(99)),
            new_inner.placeholders().get("limit")
        );
        // The untouched sibling is the same object.
        let new_other = get_node(&got, &path(&["o"])).unwrap();
        assert!(same_node(&new_other, &other));
    }

    #[test]
    fn all_placeholders_are_observable() {
        let a = SqlModel::builder("A", "select {limit}")
            .placeholder("limit", PlaceholderValue::Int(1))
            .build();
        let b = SqlModel::builder("B", "select {limit}")
            .placeholder("limit", PlaceholderValue::Int(2))
            .build();
        let start = SqlModel::builder("Top", "select * from {{a}}, {{b}}")
            .reference("a", a)
            .reference("b", b)
            .build();

        let all = get_all_placeholders(&start);
        let limit = all.get("limit").unwrap();
        assert_eq!(2, limit.len());
        assert_eq!(Some(&PlaceholderValue::Int(1)), limit.get(&path(&["a"])));
        assert_eq!(Some(&PlaceholderValue::Int(2)), limit.get(&path(&["b"])));
    }
}
