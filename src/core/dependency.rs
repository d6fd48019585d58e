use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};

/// Order `items` so every item comes after the items it depends on.
///
/// Kahn's algorithm, always taking the earliest ready item in input order,
/// so input that already satisfies its dependencies comes back unchanged.
/// `field` names the argument in validation errors.
pub fn order_by_dependencies<'a, T, I, D>(
    items: &'a [T],
    field: &str,
    id: I,
    depends_on: D,
) -> Result<Vec<&'a T>>
where
    I: Fn(&T) -> String,
    D: Fn(&T) -> Vec<String>,
{
    let mut id_index = HashMap::new();
    for (idx, item) in items.iter().enumerate() {
        let key = id(item);
        if id_index.contains_key(&key) {
            return Err(Error::validation_invalid_argument(
                field,
                format!("Duplicate id '{}'", key),
                None,
                None,
            ));
        }
        id_index.insert(key, idx);
    }

    let mut indegree = vec![0usize; items.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); items.len()];

    for (idx, item) in items.iter().enumerate() {
        for need in depends_on(item) {
            if need == id(item) {
                continue;
            }
            match id_index.get(&need) {
                Some(&parent_idx) => {
                    indegree[idx] += 1;
                    dependents[parent_idx].push(idx);
                }
                None => {
                    return Err(Error::validation_invalid_argument(
                        field,
                        format!("'{}' depends on unknown '{}'", id(item), need),
                        None,
                        None,
                    ));
                }
            }
        }
    }

    let mut ready: BTreeSet<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(idx, _)| idx)
        .collect();

    let mut ordered = Vec::with_capacity(items.len());
    while let Some(idx) = ready.pop_first() {
        ordered.push(&items[idx]);
        for &child in &dependents[idx] {
            indegree[child] -= 1;
            if indegree[child] == 0 {
                ready.insert(child);
            }
        }
    }

    if ordered.len() != items.len() {
        let pending: Vec<String> = items
            .iter()
            .enumerate()
            .filter(|(idx, _)| indegree[*idx] > 0)
            .map(|(_, item)| id(item))
            .collect();
        return Err(Error::validation_invalid_argument(
            field,
            "Dependencies contain a cycle",
            None,
            Some(pending),
        ));
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Node {
        id: &'static str,
        needs: Vec<&'static str>,
    }

    fn node(id: &'static str, needs: &[&'static str]) -> Node {
        Node {
            id,
            needs: needs.to_vec(),
        }
    }

    fn order(nodes: &[Node]) -> Result<Vec<&'static str>> {
        order_by_dependencies(
            nodes,
            "nodes",
            |n| n.id.to_string(),
            |n| n.needs.iter().map(|s| s.to_string()).collect(),
        )
        .map(|ordered| ordered.into_iter().map(|n| n.id).collect())
    }

    #[test]
    fn dependents_follow_their_references() {
        let nodes = vec![
            node("chat_messages", &["chat_sessions"]),
            node("users", &[]),
            node("chat_sessions", &["users"]),
        ];
        assert_eq!(order(&nodes).unwrap(), vec!["users", "chat_sessions", "chat_messages"]);
    }

    #[test]
    fn independent_items_keep_input_order() {
        let nodes = vec![node("b", &[]), node("a", &[]), node("c", &[])];
        assert_eq!(order(&nodes).unwrap(), vec!["b", "a", "c"]);
    }

    #[test]
    fn valid_input_order_is_preserved() {
        let nodes = vec![
            node("users", &[]),
            node("chat_sessions", &["users"]),
            node("documents", &[]),
            node("embeddings", &["documents"]),
        ];
        assert_eq!(
            order(&nodes).unwrap(),
            vec!["users", "chat_sessions", "documents", "embeddings"]
        );
    }

    #[test]
    fn self_reference_is_ignored() {
        let nodes = vec![node("tree", &["tree"])];
        assert_eq!(order(&nodes).unwrap(), vec!["tree"]);
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = order(&[node("a", &["missing"])]).unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
        assert!(err.describe().contains("missing"));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = order(&[node("a", &[]), node("a", &[])]).unwrap_err();
        assert!(err.describe().contains("Duplicate"));
    }

    #[test]
    fn cycles_report_pending_items() {
        let err = order(&[node("a", &["b"]), node("b", &["a"]), node("c", &[])]).unwrap_err();
        assert!(err.describe().contains("cycle"));
        assert_eq!(err.details["tried"], serde_json::json!(["a", "b"]));
    }
}
