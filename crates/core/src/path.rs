//! Dotted / bracketed state paths such as `form.items[2].name` or
//! `nodes["a.b"].label`.

use serde_json::Value;
use tracing::warn;

/// How far past its current end an index may extend an array.
pub const MAX_ARRAY_GROWTH: usize = 1024;

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Split a path into segments. Empty input yields no segments.
pub fn parse(path: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => flush(&mut current, &mut segments),
            '[' => {
                flush(&mut current, &mut segments);
                let mut inner = String::new();
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    inner.push(c);
                }
                let inner = inner.trim();
                let unquoted = inner
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .or_else(|| inner.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
                match unquoted {
                    Some(key) => segments.push(Segment::Key(key.to_owned())),
                    None => match inner.parse::<usize>() {
                        Ok(idx) => segments.push(Segment::Index(idx)),
                        Err(_) if !inner.is_empty() => {
                            segments.push(Segment::Key(inner.to_owned()));
                        }
                        Err(_) => {}
                    },
                }
            }
            _ => current.push(c),
        }
    }
    flush(&mut current, &mut segments);
    segments
}

fn flush(current: &mut String, segments: &mut Vec<Segment>) {
    if !current.is_empty() {
        segments.push(Segment::Key(std::mem::take(current)));
    }
}

/// Look up a path inside a JSON value.
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in parse(path) {
        current = match (&segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key)?,
            (Segment::Index(idx), Value::Array(items)) => items.get(*idx)?,
            (Segment::Key(key), Value::Array(items)) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Write `value` at `path`, creating intermediate objects and arrays.
///
/// An empty path replaces the root. A write whose index would extend an
/// array by more than [`MAX_ARRAY_GROWTH`] slots is dropped; the return
/// value tells whether the write happened.
pub fn set(root: &mut Value, path: &str, value: Value) -> bool {
    let segments = parse(path);
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return true;
    };
    if !within_bounds(root, &segments) {
        warn!(path, "state write ignored: array index out of range");
        return false;
    }

    let mut current = root;
    for (i, segment) in parents.iter().enumerate() {
        let next_is_index = matches!(segments.get(i + 1), Some(Segment::Index(_)));
        current = child_mut(current, segment, next_is_index);
    }

    match last {
        Segment::Key(key) => {
            if !current.is_object() {
                *current = Value::Object(serde_json::Map::new());
            }
            if let Value::Object(map) = current {
                map.insert(key.clone(), value);
            }
        }
        Segment::Index(idx) => {
            if !current.is_array() {
                *current = Value::Array(Vec::new());
            }
            if let Value::Array(items) = current {
                grow(items, *idx);
                items[*idx] = value;
            }
        }
    }
    true
}

/// Every index segment stays within [`MAX_ARRAY_GROWTH`] of the end of
/// the array it addresses (arrays that do not exist yet count as empty).
fn within_bounds(root: &Value, segments: &[Segment]) -> bool {
    let mut current = Some(root);
    for segment in segments {
        current = match segment {
            Segment::Index(idx) => {
                let len = match current {
                    Some(Value::Array(items)) => items.len(),
                    _ => 0,
                };
                if idx.saturating_sub(len) >= MAX_ARRAY_GROWTH {
                    return false;
                }
                current.and_then(|v| v.as_array()).and_then(|items| items.get(*idx))
            }
            Segment::Key(key) => current.and_then(|v| v.as_object()).and_then(|map| map.get(key)),
        };
    }
    true
}

fn grow(items: &mut Vec<Value>, idx: usize) {
    if let Some(len) = idx.checked_add(1) {
        if items.len() < len {
            items.resize(len, Value::Null);
        }
    }
}

fn child_mut<'a>(current: &'a mut Value, segment: &Segment, next_is_index: bool) -> &'a mut Value {
    let empty = || {
        if next_is_index {
            Value::Array(Vec::new())
        } else {
            Value::Object(serde_json::Map::new())
        }
    };
    match segment {
        Segment::Key(key) => {
            if !current.is_object() {
                *current = Value::Object(serde_json::Map::new());
            }
            let Value::Object(map) = current else {
                unreachable!("value was just replaced with an object")
            };
            let entry = map.entry(key.clone()).or_insert_with(empty);
            if entry.is_null() {
                *entry = empty();
            }
            entry
        }
        Segment::Index(idx) => {
            if !current.is_array() {
                *current = Value::Array(Vec::new());
            }
            let Value::Array(items) = current else {
                unreachable!("value was just replaced with an array")
            };
            grow(items, *idx);
            if items[*idx].is_null() {
                items[*idx] = empty();
            }
            &mut items[*idx]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_mixed_paths() {
        assert_eq!(
            parse("a.b[2].c"),
            vec![
                Segment::Key("a".into()),
                Segment::Key("b".into()),
                Segment::Index(2),
                Segment::Key("c".into()),
            ]
        );
        assert_eq!(
            parse("nodes[\"x.y\"].label"),
            vec![
                Segment::Key("nodes".into()),
                Segment::Key("x.y".into()),
                Segment::Key("label".into()),
            ]
        );
        assert!(parse("").is_empty());
    }

    #[test]
    fn get_walks_objects_and_arrays() {
        let state = json!({"form": {"items": [{"name": "a"}, {"name": "b"}]}});
        assert_eq!(get(&state, "form.items[1].name"), Some(&json!("b")));
        assert_eq!(get(&state, "form.items.0.name"), Some(&json!("a")));
        assert_eq!(get(&state, "form.missing"), None);
        assert_eq!(get(&state, ""), Some(&state));
    }

    #[test]
    fn set_creates_intermediate_containers() {
        let mut state = json!({});
        set(&mut state, "user.tags[1]", json!("admin"));
        assert_eq!(state, json!({"user": {"tags": [null, "admin"]}}));

        set(&mut state, "count", json!(5));
        assert_eq!(state["count"], json!(5));
    }

    #[test]
    fn oversized_indexes_are_ignored() {
        let mut state = json!({"items": [1]});
        assert!(!set(&mut state, "items[18446744073709551615]", json!(2)));
        assert!(!set(&mut state, "fresh[5000].name", json!("x")));
        assert!(!set(&mut state, "items[0].deep[99999]", json!(3)));
        assert_eq!(state, json!({"items": [1]}));

        assert!(set(&mut state, "items[3]", json!(4)));
        assert_eq!(state, json!({"items": [1, null, null, 4]}));
    }

    #[test]
    fn set_with_empty_path_replaces_root() {
        let mut state = json!({"a": 1});
        set(&mut state, "", json!({"b": 2}));
        assert_eq!(state, json!({"b": 2}));
    }
}
