use crate::path::{Patch, StorePath};
use serde_json::{Map, Value};

/// A JSON tree addressed by `StorePath`s.
///
/// `null` and empty objects don't exist: writing one deletes the subtree, and
/// objects left empty by a delete are pruned up to the root.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreTree {
    root: Value,
}

impl Default for StoreTree {
    fn default() -> Self {
        Self { root: Value::Null }
    }
}

impl StoreTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &StorePath) -> Option<&Value> {
        let mut current = &self.root;
        for segment in path.segments() {
            current = current.as_object()?.get(segment)?;
        }
        if current.is_null() {
            None
        } else {
            Some(current)
        }
    }

    pub fn set(&mut self, path: &StorePath, value: Value) {
        let value = normalize(value);
        if value.is_null() {
            self.delete(path);
            return;
        }
        let mut current = &mut self.root;
        for segment in path.segments() {
            current = ensure_object(current)
                .entry(segment.clone())
                .or_insert(Value::Null);
        }
        *current = value;
    }

    pub fn delete(&mut self, path: &StorePath) {
        if remove_at(&mut self.root, path.segments()) {
            self.root = Value::Null;
        }
    }

    pub fn apply(&mut self, patch: &Patch) {
        for (path, value) in patch.iter() {
            match value {
                Some(value) => self.set(path, value.clone()),
                None => self.delete(path),
            }
        }
    }

    /// Whether every entry of the patch is already reflected in this tree.
    pub fn reflects(&self, patch: &Patch) -> bool {
        patch
            .iter()
            .all(|(path, value)| self.reflects_entry(path, value))
    }

    pub fn reflects_entry(&self, path: &StorePath, value: &Option<Value>) -> bool {
        let expected = value.clone().map(normalize).filter(|v| !v.is_null());
        self.get(path) == expected.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_null()
    }
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// Returns true when `node` is empty afterwards and should be removed by its parent.
fn remove_at(node: &mut Value, segments: &[String]) -> bool {
    match segments.split_first() {
        None => true,
        Some((head, rest)) => {
            if let Value::Object(map) = node {
                let child_empty = match map.get_mut(head) {
                    Some(child) => remove_at(child, rest),
                    None => false,
                };
                if child_empty {
                    map.remove(head);
                }
                map.is_empty()
            } else {
                false
            }
        }
    }
}

/// Drops nulls and empty objects from a value, recursively.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let map: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if map.is_empty() {
                Value::Null
            } else {
                Value::Object(map)
            }
        }
        v => v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(s: &str) -> StorePath {
        StorePath::parse(s).expect("valid path")
    }

    #[test]
    fn it_sets_and_gets_nested_values() {
        let mut tree = StoreTree::new();
        tree.set(&path("w/1/settings/language"), json!("cpp"));
        tree.set(&path("w/1/users/u/name"), json!("Alice"));
        assert_eq!(tree.get(&path("w/1/settings/language")), Some(&json!("cpp")));
        assert_eq!(
            tree.get(&path("w/1/users")),
            Some(&json!({ "u": { "name": "Alice" } }))
        );
        assert_eq!(tree.get(&path("w/2")), None);
    }

    #[test]
    fn it_prunes_empty_parents_after_delete() {
        let mut tree = StoreTree::new();
        tree.set(&path("w/1/users/u/connections/c1"), json!({ "registeredAt": 1 }));
        tree.delete(&path("w/1/users/u/connections/c1"));
        assert_eq!(tree.get(&path("w/1/users/u/connections")), None);
        assert!(tree.is_empty());
    }

    #[test]
    fn writing_null_deletes() {
        let mut tree = StoreTree::new();
        tree.set(&path("a/b"), json!(1));
        tree.set(&path("a/c"), json!(2));
        tree.set(&path("a/b"), Value::Null);
        assert_eq!(tree.get(&path("a")), Some(&json!({ "c": 2 })));
        tree.set(&path("a"), json!({ "x": null, "y": {} }));
        assert!(tree.is_empty());
    }

    #[test]
    fn it_applies_partial_updates_without_clobbering_siblings() {
        let mut tree = StoreTree::new();
        tree.set(&path("s/defaultPermission"), json!("READ_WRITE"));
        let mut patch = Patch::new();
        patch.set(path("s/language"), "py");
        tree.apply(&patch);
        assert_eq!(
            tree.get(&path("s")),
            Some(&json!({ "defaultPermission": "READ_WRITE", "language": "py" }))
        );
        assert!(tree.reflects(&patch));

        let mut other = Patch::new();
        other.delete(path("s/missing"));
        assert!(tree.reflects(&other));
        other.set(path("s/language"), "java");
        assert!(!tree.reflects(&other));
    }
}
