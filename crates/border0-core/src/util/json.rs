use serde_json::{Map, Value};

use crate::error::Border0Result;

/// Serialize with object keys sorted and no insignificant whitespace.
pub fn canonical_json(value: &Value) -> String {
    sorted(value).to_string()
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), sorted(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// Whether two JSON documents are equal regardless of key order or formatting.
pub fn json_equal(a: &[u8], b: &[u8]) -> Border0Result<bool> {
    let a: Value = serde_json::from_slice(a)?;
    let b: Value = serde_json::from_slice(b)?;
    Ok(canonical_json(&a) == canonical_json(&b))
}
