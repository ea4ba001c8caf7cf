// src/decode/expand.rs

use serde_json::{Map, Value};
use thiserror::Error;

use crate::record::kind_of;

/// Raised when two keys claim the same path with incompatible values,
/// e.g. `{"a.b": "c", "a.b.c": "d"}`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot expand {path:?}: {reason}")]
pub struct ExpandConflictError {
    pub path: String,
    pub reason: String,
}

impl ExpandConflictError {
    fn new(path: &str, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Prefixes the path with the key of the enclosing object.
    fn within(mut self, parent: &str) -> Self {
        self.path = format!("{}.{}", parent, self.path);
        self
    }
}

/// Looks up a dotted path (`"log.file.path"`) by walking nested objects.
pub fn get_path<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let (parents, leaf) = match path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };

    let mut current = map;
    if let Some(parents) = parents {
        for segment in parents.split('.') {
            current = current.get(segment)?.as_object()?;
        }
    }
    current.get(leaf)
}

fn get_path_mut<'a>(map: &'a mut Map<String, Value>, path: &str) -> Option<&'a mut Value> {
    let mut current = map;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            return current.get_mut(segment);
        }
        current = current.get_mut(segment)?.as_object_mut()?;
    }
    None
}

/// Inserts `value` at a dotted path, creating intermediate objects as needed.
/// Returns the value previously stored at that path, if any.
///
/// Fails without touching `map` when an existing non-object sits on the path.
pub fn put_path(
    map: &mut Map<String, Value>,
    path: &str,
    value: Value,
) -> Result<Option<Value>, ExpandConflictError> {
    let (parents, leaf) = match path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };

    let mut current = map;
    if let Some(parents) = parents {
        for segment in parents.split('.') {
            current = match current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()))
            {
                Value::Object(inner) => inner,
                _ => return Err(ExpandConflictError::new(path, "found conflicting key")),
            };
        }
    }
    Ok(current.insert(leaf.to_string(), value))
}

/// Removes the value at a dotted path.
pub fn delete_path(map: &mut Map<String, Value>, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        Some((parents, leaf)) => get_path_mut(map, parents)?.as_object_mut()?.remove(leaf),
        None => map.remove(path),
    }
}

/// De-dots every key of `map` in place, recursing into nested objects and
/// merging objects that end up sharing a prefix.
pub fn expand_keys(map: &mut Map<String, Value>) -> Result<(), ExpandConflictError> {
    // Sorted key order guarantees a parent key is settled before any dotted
    // key that lands inside it.
    let keys: Vec<String> = map.keys().cloned().collect();

    for key in keys {
        let Some(mut value) = map.remove(&key) else {
            continue;
        };

        if let Value::Object(inner) = &mut value {
            expand_keys(inner).map_err(|e| e.within(&key))?;
        }

        if !key.contains('.') {
            map.insert(key, value);
            continue;
        }

        let new_is_object = value.is_object();
        let Some(old) = put_path(map, &key, value)? else {
            continue;
        };

        if !new_is_object {
            return Err(ExpandConflictError::new(
                &key,
                format!("found existing ({}) value", kind_of(&old)),
            ));
        }

        let Value::Object(old) = old else {
            return Err(ExpandConflictError::new(&key, "found conflicting key"));
        };

        if let Some(Value::Object(new)) = get_path_mut(map, &key) {
            merge_objects(new, old).map_err(|reason| ExpandConflictError::new(&key, reason))?;
        }
    }

    Ok(())
}

fn merge_objects(lhs: &mut Map<String, Value>, rhs: Map<String, Value>) -> Result<(), String> {
    for (key, rhs_value) in rhs {
        let Some(lhs_value) = lhs.get_mut(&key) else {
            lhs.insert(key, rhs_value);
            continue;
        };

        let lhs_kind = kind_of(lhs_value);
        let rhs_kind = kind_of(&rhs_value);
        let Value::Object(lhs_map) = lhs_value else {
            return Err(format!("cannot merge {:?}: found ({}) value", key, lhs_kind));
        };
        let Value::Object(rhs_map) = rhs_value else {
            return Err(format!("cannot merge {:?}: found ({}) value", key, rhs_kind));
        };

        merge_objects(lhs_map, rhs_map).map_err(|e| format!("cannot merge {:?}: {}", key, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn expands_and_merges_shared_prefix() {
        let mut map = object(json!({"a.b": {"c": "c"}, "a.b.d": "d"}));
        expand_keys(&mut map).unwrap();
        assert_eq!(Value::Object(map), json!({"a": {"b": {"c": "c", "d": "d"}}}));
    }

    #[test]
    fn merges_with_plain_parent_object() {
        let mut map = object(json!({"a": {"b": {"y": 2}}, "a.b": {"x": 1}, "a.c": 3}));
        expand_keys(&mut map).unwrap();
        assert_eq!(
            Value::Object(map),
            json!({"a": {"b": {"x": 1, "y": 2}, "c": 3}})
        );
    }

    #[test]
    fn expands_nested_objects() {
        let mut map = object(json!({"outer": {"x.y": 1}}));
        expand_keys(&mut map).unwrap();
        assert_eq!(Value::Object(map), json!({"outer": {"x": {"y": 1}}}));
    }

    #[test]
    fn scalar_then_object_on_same_path_conflicts() {
        let mut map = object(json!({"a.b": "c", "a.b.c": "d"}));
        let err = expand_keys(&mut map).unwrap_err();
        assert_eq!(err.path, "a.b.c");
        assert_eq!(err.to_string(), r#"cannot expand "a.b.c": found conflicting key"#);
    }

    #[test]
    fn scalar_replacing_existing_value_conflicts() {
        let mut map = object(json!({"a": {"b": {"c": 1}}, "a.b": 5}));
        let err = expand_keys(&mut map).unwrap_err();
        assert_eq!(err.path, "a.b");
        assert!(err.reason.contains("object"));
    }

    #[test]
    fn nested_conflict_reports_full_path() {
        let mut map = object(json!({"outer": {"a.b": "c", "a.b.c": "d"}}));
        let err = expand_keys(&mut map).unwrap_err();
        assert_eq!(err.path, "outer.a.b.c");
    }

    #[test]
    fn put_and_get_dotted_paths() {
        let mut map = Map::new();
        assert_eq!(put_path(&mut map, "log.file.path", json!("/x")).unwrap(), None);
        assert_eq!(get_path(&map, "log.file.path"), Some(&json!("/x")));
        assert_eq!(get_path(&map, "log.offset"), None);

        assert!(put_path(&mut map, "log.file.path.deeper", json!(1)).is_err());
        assert_eq!(delete_path(&mut map, "log.file.path"), Some(json!("/x")));
        assert_eq!(Value::Object(map), json!({"log": {"file": {}}}));
    }
}
