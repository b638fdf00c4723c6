//! Dotted-path access and depth-bounded comparison over [`Value`] trees.
//!
//! Props, state and context data are all plain JSON-like values. Paths
//! are dot separated (`"user.address.city"`); numeric segments index
//! into arrays.

use core::ptr;

use serde_json::Map;
pub use serde_json::Value;

/// Splits `"ctxName.path.to.value"` into `("ctxName", "path.to.value")`.
///
/// A key without a dot names the whole context: `("ctxName", "")`.
pub fn split_context_key(key: &str) -> (&str, &str) {
    key.split_once('.').unwrap_or((key, ""))
}

/// Reads the value at `path`. The empty path is the value itself.
pub fn get_in<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(data);
    }
    path.split('.').try_fold(data, |value, segment| match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Writes `value` at `path`, creating intermediate objects as needed.
///
/// With `extend`, an object value is merged key by key into an existing
/// object instead of replacing it.
pub fn set_in(data: &mut Value, path: &str, value: Value, extend: bool) {
    let mut target = data;
    if !path.is_empty() {
        for segment in path.split('.') {
            if !target.is_object() && !target.is_array() {
                *target = Value::Object(Map::new());
            }
            target = match target {
                Value::Object(map) => map.entry(segment).or_insert(Value::Null),
                Value::Array(items) => match segment.parse::<usize>() {
                    Ok(i) if i < items.len() => &mut items[i],
                    _ => return,
                },
                _ => return,
            };
        }
    }
    match (target, value) {
        (Value::Object(existing), Value::Object(incoming)) if extend => existing.extend(incoming),
        (target, value) => *target = value,
    }
}

/// Whether a refresh of `changed` concerns a listener needing `needed`.
///
/// Either path being a prefix of the other counts, and the empty path
/// matches everything.
pub fn paths_overlap(needed: &str, changed: &str) -> bool {
    fn under(long: &str, short: &str) -> bool {
        long.len() > short.len() && long.starts_with(short) && long.as_bytes()[short.len()] == b'.'
    }
    needed.is_empty() || changed.is_empty() || needed == changed || under(needed, changed) || under(changed, needed)
}

/// Structural equality down to `depth` levels.
///
/// - `-1` (or any negative depth): unlimited depth.
/// - `0`: containers are equal only if they are the same allocation;
///   scalars compare by value.
/// - `n > 0`: containers compare their members at depth `n - 1`.
pub fn are_equal(a: &Value, b: &Value, depth: i32) -> bool {
    if ptr::eq(a, b) {
        return true;
    }
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => {
            depth != 0
                && x.len() == y.len()
                && x.iter().all(|(key, value)| y.get(key).is_some_and(|other| are_equal(value, other, depth - 1)))
        }
        (Value::Array(x), Value::Array(y)) => {
            depth != 0 && x.len() == y.len() && x.iter().zip(y).all(|(value, other)| are_equal(value, other, depth - 1))
        }
        _ => a == b,
    }
}
