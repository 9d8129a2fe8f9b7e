//! Diff and patch for JSON-like structures.
//!
//! Maps diff key-by-key, arrays use element-level sequence matching, long strings get a
//! character-level delta. Every action carries enough data (old values, removed items) to be
//! inspected on its own; `patch(a, diff(a, b)) == b` always holds.

mod text;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use similar::{Algorithm, DiffTag};
use thiserror::Error;

pub use text::{diff_text, patch_text};

/// Strings at or below this length are replaced wholesale instead of patched.
const MIN_PATCHED_STRING_LEN: usize = 32;

/// Paired element changes inside a replaced range are recursed into up to this count.
const MAX_REPLACE_OVERLAP: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathItem {
    Index(usize),
    Key(String),
}

impl From<&str> for PathItem {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<usize> for PathItem {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

pub type Path = Vec<PathItem>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DiffAction {
    Change {
        path: Path,
        old: Value,
        new: Value,
    },
    PatchString {
        path: Path,
        delta: String,
    },
    Add {
        path: Path,
        values: Map<String, Value>,
    },
    Remove {
        path: Path,
        values: Map<String, Value>,
    },
    AddRange {
        path: Path,
        start: usize,
        values: Vec<Value>,
    },
    RemoveRange {
        path: Path,
        start: usize,
        values: Vec<Value>,
    },
}

impl DiffAction {
    pub fn path(&self) -> &Path {
        match self {
            Self::Change { path, .. }
            | Self::PatchString { path, .. }
            | Self::Add { path, .. }
            | Self::Remove { path, .. }
            | Self::AddRange { path, .. }
            | Self::RemoveRange { path, .. } => path,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiffError {
    #[error("path {path:?} does not exist")]
    MissingPath { path: Path },

    #[error("{action} expects {expected} at {path:?}")]
    TypeMismatch {
        action: &'static str,
        expected: &'static str,
        path: Path,
    },

    #[error("range {start}..{end} is out of bounds at {path:?}")]
    OutOfRange { path: Path, start: i64, end: i64 },

    #[error("invalid text delta: {0}")]
    InvalidDelta(String),
}

/// Computes the actions turning `first` into `second`.
pub fn diff(first: &Value, second: &Value) -> Vec<DiffAction> {
    let mut actions = Vec::new();
    let mut path = Vec::new();
    recurse(first, second, &mut path, &mut actions);
    actions
}

fn recurse(first: &Value, second: &Value, path: &mut Path, out: &mut Vec<DiffAction>) {
    match (first, second) {
        (Value::Object(a), Value::Object(b)) => {
            let mut removed = Map::new();
            for (key, a_value) in a {
                match b.get(key) {
                    Some(b_value) => {
                        path.push(PathItem::Key(key.clone()));
                        recurse(a_value, b_value, path, out);
                        path.pop();
                    }
                    None => {
                        removed.insert(key.clone(), a_value.clone());
                    }
                }
            }
            if !removed.is_empty() {
                out.push(DiffAction::Remove {
                    path: path.clone(),
                    values: removed,
                });
            }
            let added: Map<String, Value> = b
                .iter()
                .filter(|(key, _)| !a.contains_key(*key))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if !added.is_empty() {
                out.push(DiffAction::Add {
                    path: path.clone(),
                    values: added,
                });
            }
        }
        (Value::Array(a), Value::Array(b)) => diff_arrays(a, b, path, out),
        (Value::String(a), Value::String(b))
            if a.chars().count() > MIN_PATCHED_STRING_LEN && b.chars().count() > MIN_PATCHED_STRING_LEN =>
        {
            if a != b {
                out.push(DiffAction::PatchString {
                    path: path.clone(),
                    delta: diff_text(a, b),
                });
            }
        }
        _ => {
            if are_different(first, second) {
                out.push(DiffAction::Change {
                    path: path.clone(),
                    old: first.clone(),
                    new: second.clone(),
                });
            }
        }
    }
}

fn diff_arrays(a: &[Value], b: &[Value], path: &mut Path, out: &mut Vec<DiffAction>) {
    // serde_json maps are ordered, so the compact encoding is a canonical identity for matching
    let a_keys: Vec<String> = a.iter().map(Value::to_string).collect();
    let b_keys: Vec<String> = b.iter().map(Value::to_string).collect();

    for op in similar::capture_diff_slices(Algorithm::Myers, &a_keys, &b_keys) {
        let (tag, old, new) = op.as_tag_tuple();
        match tag {
            DiffTag::Equal => {}
            DiffTag::Delete => out.push(DiffAction::RemoveRange {
                path: path.clone(),
                start: old.start,
                values: a[old].to_vec(),
            }),
            DiffTag::Insert => out.push(DiffAction::AddRange {
                path: path.clone(),
                start: old.start,
                values: b[new].to_vec(),
            }),
            DiffTag::Replace => {
                let overlap = MAX_REPLACE_OVERLAP.min(old.len()).min(new.len());
                for delta in 0..overlap {
                    path.push(PathItem::Index(old.start + delta));
                    recurse(&a[old.start + delta], &b[new.start + delta], path, out);
                    path.pop();
                }
                if old.len() > overlap {
                    out.push(DiffAction::RemoveRange {
                        path: path.clone(),
                        start: old.start + overlap,
                        values: a[old.start + overlap..old.end].to_vec(),
                    });
                }
                if new.len() > overlap {
                    out.push(DiffAction::AddRange {
                        path: path.clone(),
                        start: old.end,
                        values: b[new.start + overlap..new.end].to_vec(),
                    });
                }
            }
        }
    }
}

fn are_different(first: &Value, second: &Value) -> bool {
    match (first, second) {
        (Value::Number(a), Value::Number(b)) => {
            if a == b {
                return false;
            }
            match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => (x - y).abs() > f64::EPSILON * x.abs().max(y.abs()),
                _ => true,
            }
        }
        _ => first != second,
    }
}

/// Applies `diff` to a copy of `destination`.
pub fn patch(destination: &Value, diff: &[DiffAction]) -> Result<Value, DiffError> {
    let mut patched = destination.clone();
    patch_in_place(&mut patched, diff)?;
    Ok(patched)
}

/// Applies `diff` to `destination`; list index shifts from earlier range actions are tracked per path.
pub fn patch_in_place(destination: &mut Value, diff: &[DiffAction]) -> Result<(), DiffError> {
    let mut offsets: HashMap<Path, i64> = HashMap::new();

    for action in diff {
        match action {
            DiffAction::Change { path, new, .. } => {
                *access(destination, path, &offsets)? = new.clone();
            }
            DiffAction::PatchString { path, delta } => {
                let slot = access(destination, path, &offsets)?;
                let current = slot.as_str().ok_or_else(|| DiffError::TypeMismatch {
                    action: "patch_string",
                    expected: "string",
                    path: path.clone(),
                })?;
                *slot = Value::String(patch_text(current, delta)?);
            }
            DiffAction::Add { path, values } => {
                let map = access(destination, path, &offsets)?
                    .as_object_mut()
                    .ok_or_else(|| DiffError::TypeMismatch {
                        action: "add",
                        expected: "object",
                        path: path.clone(),
                    })?;
                for (key, value) in values {
                    map.insert(key.clone(), value.clone());
                }
            }
            DiffAction::Remove { path, values } => {
                let map = access(destination, path, &offsets)?
                    .as_object_mut()
                    .ok_or_else(|| DiffError::TypeMismatch {
                        action: "remove",
                        expected: "object",
                        path: path.clone(),
                    })?;
                for key in values.keys() {
                    map.remove(key);
                }
            }
            DiffAction::AddRange { path, start, values } => {
                let offset = offsets.get(path).copied().unwrap_or(0);
                let list = list_at(destination, path, &offsets, "add_range")?;
                let at = *start as i64 + offset;
                if at < 0 || at > list.len() as i64 {
                    return Err(DiffError::OutOfRange {
                        path: path.clone(),
                        start: at,
                        end: at,
                    });
                }
                let at = at as usize;
                list.splice(at..at, values.iter().cloned());
                *offsets.entry(path.clone()).or_insert(0) += values.len() as i64;
            }
            DiffAction::RemoveRange { path, start, values } => {
                let offset = offsets.get(path).copied().unwrap_or(0);
                let list = list_at(destination, path, &offsets, "remove_range")?;
                let from = *start as i64 + offset;
                let to = from + values.len() as i64;
                if from < 0 || to > list.len() as i64 {
                    return Err(DiffError::OutOfRange {
                        path: path.clone(),
                        start: from,
                        end: to,
                    });
                }
                list.drain(from as usize..to as usize);
                *offsets.entry(path.clone()).or_insert(0) -= values.len() as i64;
            }
        }
    }
    Ok(())
}

fn list_at<'a>(
    root: &'a mut Value,
    path: &Path,
    offsets: &HashMap<Path, i64>,
    action: &'static str,
) -> Result<&'a mut Vec<Value>, DiffError> {
    access(root, path, offsets)?
        .as_array_mut()
        .ok_or_else(|| DiffError::TypeMismatch {
            action,
            expected: "array",
            path: path.clone(),
        })
}

fn access<'a>(root: &'a mut Value, path: &Path, offsets: &HashMap<Path, i64>) -> Result<&'a mut Value, DiffError> {
    let missing = || DiffError::MissingPath { path: path.clone() };
    let mut current = root;
    for (depth, item) in path.iter().enumerate() {
        current = match (current, item) {
            (Value::Array(items), PathItem::Index(i)) => {
                let offset = offsets.get(&path[..depth]).copied().unwrap_or(0);
                let idx = usize::try_from(*i as i64 + offset).map_err(|_| missing())?;
                items.get_mut(idx).ok_or_else(missing)?
            }
            (Value::Object(map), PathItem::Key(key)) => map.get_mut(key).ok_or_else(missing)?,
            (Value::Object(map), PathItem::Index(i)) => map.get_mut(&i.to_string()).ok_or_else(missing)?,
            _ => return Err(missing()),
        };
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assert_round_trip(a: Value, b: Value) {
        let forward = diff(&a, &b);
        assert_eq!(patch(&a, &forward).unwrap(), b, "forward diff {:?}", forward);
        let backward = diff(&b, &a);
        assert_eq!(patch(&b, &backward).unwrap(), a, "backward diff {:?}", backward);
    }

    #[test]
    fn test_exact_diffs() {
        let cases = vec![
            (json!([]), json!([]), json!([])),
            (json!({}), json!({}), json!([])),
            (json!({}), json!({"a": "b"}), json!([{"action": "add", "values": {"a": "b"}, "path": []}])),
            (json!({"a": "b"}), json!({}), json!([{"action": "remove", "path": [], "values": {"a": "b"}}])),
            (
                json!({"a": "c"}),
                json!({"a": "b"}),
                json!([{"action": "change", "new": "b", "old": "c", "path": ["a"]}]),
            ),
            (
                json!({"a": [1, 2, 3]}),
                json!({"a": "b"}),
                json!([{"action": "change", "new": "b", "old": [1, 2, 3], "path": ["a"]}]),
            ),
            (
                json!({"a": "c"}),
                json!({"a": null}),
                json!([{"action": "change", "new": null, "old": "c", "path": ["a"]}]),
            ),
            (json!({"a": "c"}), json!({"a": "c"}), json!([])),
            (
                json!({"a": 1.0}),
                json!({"a": 1.01}),
                json!([{"action": "change", "new": 1.01, "old": 1.0, "path": ["a"]}]),
            ),
            (json!([]), json!([1]), json!([{"action": "add_range", "start": 0, "path": [], "values": [1]}])),
            (
                json!([1, 2, 3]),
                json!([1]),
                json!([{"action": "remove_range", "path": [], "start": 1, "values": [2, 3]}]),
            ),
            (
                json!([1, 2, 3, 4]),
                json!([1, 4]),
                json!([{"action": "remove_range", "path": [], "start": 1, "values": [2, 3]}]),
            ),
            (
                json!({"a": [1]}),
                json!({"a": [1, 2, 3]}),
                json!([{"action": "add_range", "start": 1, "path": ["a"], "values": [2, 3]}]),
            ),
            (
                json!({"a": 1, "b": 12}),
                json!({"a": 2, "c": 5}),
                json!([
                    {"path": ["a"], "action": "change", "old": 1, "new": 2},
                    {"path": [], "action": "remove", "values": {"b": 12}},
                    {"path": [], "action": "add", "values": {"c": 5}},
                ]),
            ),
            (json!(1), json!(2), json!([{"action": "change", "new": 2, "old": 1, "path": []}])),
            (
                json!(1),
                json!({"complex": "data"}),
                json!([{"action": "change", "new": {"complex": "data"}, "old": 1, "path": []}]),
            ),
        ];
        for (a, b, expected) in cases {
            let actual = serde_json::to_value(diff(&a, &b)).unwrap();
            assert_eq!(actual, expected, "diff({}, {})", a, b);
            assert_round_trip(a, b);
        }
    }

    #[test]
    fn test_nested_list_round_trips() {
        assert_round_trip(
            json!(["a", "b", "c", "y", "e", "f", "x"]),
            json!(["b", "c", "x", "e", "f"]),
        );
        assert_round_trip(
            json!(["a", "b", "c", {"nested": [{"value": "y", "other": 123}]}, "e", "f"]),
            json!(["extra", "a", "b", "c", {"nested": [{"value": "x"}]}, "e", "f"]),
        );
        assert_round_trip(
            json!([
                {"id": 0, "name": "Alice", "likes": 100},
                {"id": 1, "name": "Bob", "likes": 10},
                {"id": 2, "name": "Clare", "likes": 15},
                {"id": 3, "name": "Peter", "likes": 0},
                {"id": 4, "name": "Mary", "likes": 153},
                {"id": 5, "name": "Carl", "likes": 5},
            ]),
            json!([
                {"id": -1, "name": "admin", "likes": 0},
                {"id": 0, "name": "Alice", "likes": 100},
                {"id": 1, "name": "Bob", "likes": 10},
                {"id": 3, "name": "Peter", "likes": 0},
                {"id": 4, "name": "Mary", "likes": 155},
                {"id": 5, "name": "Carl", "likes": 5},
                {"id": 6, "name": "Cindy", "likes": 1},
            ]),
        );
        let long: Vec<i64> = (0..100).chain(1..6).chain(0..200).collect();
        let short: Vec<i64> = (0..100).chain([100, 4, 300]).chain(0..100).collect();
        assert_round_trip(json!(long), json!(short));
    }

    #[test]
    fn test_single_element_replacement_is_a_change() {
        let actions = diff(&json!({"bars": [{"id": 1}, {"id": 2}, {"id": 3}]}), &json!({"bars": [{"id": 1}, {"id": 7}, {"id": 3}]}));
        assert_eq!(
            serde_json::to_value(actions).unwrap(),
            json!([{"path": ["bars", 1, "id"], "action": "change", "old": 2, "new": 7}])
        );
    }

    #[test]
    fn test_long_strings_are_patched() {
        let a = json!({"message": "Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do eiusmod tempor incididunt ut labore et dolore magna aliqua."});
        let b = json!({"message": "Lorem ipsum dolor sit, consectetur adipiscing elit, sed do eiusmod tempor incididunt ut lalalala 123 labore et dolore, magna!"});
        let actions = diff(&a, &b);
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], DiffAction::PatchString { path, .. } if path == &vec![PathItem::from("message")]));
        assert_round_trip(a, b);
    }

    #[test]
    fn test_float_tolerance() {
        assert!(diff(&json!(0.1 + 0.2), &json!(0.3)).is_empty());
        assert!(diff(&json!(1), &json!(1.0)).is_empty());
    }

    #[test]
    fn test_patch_in_place_replaces_root() {
        let mut value = json!({"a": 1});
        patch_in_place(&mut value, &diff(&json!({"a": 1}), &json!("plain"))).unwrap();
        assert_eq!(value, json!("plain"));
    }

    #[test]
    fn test_patch_reports_missing_path() {
        let actions = diff(&json!({"a": {"b": 1}}), &json!({"a": {"b": 2}}));
        let result = patch(&json!({"x": 1}), &actions);
        assert!(matches!(result, Err(DiffError::MissingPath { .. })));
    }

    #[test]
    fn test_actions_serialize_and_load_back() {
        let actions = diff(&json!({"a": [1, 2, 3], "s": "x"}), &json!({"a": [1, 3], "t": true}));
        let dump = serde_json::to_string(&actions).unwrap();
        let loaded: Vec<DiffAction> = serde_json::from_str(&dump).unwrap();
        assert_eq!(loaded, actions);
    }
}
