use serde_json::{Map, Value};

/// Resolve a dotted key path such as `data.t` by descending one key at a
/// time. Numeric segments also index into arrays (`points.0.x`).
/// An empty path, or any missing intermediate key, yields `None`.
pub fn resolve_path<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next().filter(|s| !s.is_empty())?;
    let mut current = root.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Integer or floating point JSON numbers as `f64`; everything else,
/// including booleans and numeric strings, is rejected.
pub fn as_numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        _ => None,
    }
}
