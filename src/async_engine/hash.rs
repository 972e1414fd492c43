//! Canonical JSON + input hash (spec §3 "Input Hash", §9 "Stable JSON
//! hashing").

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Serializes `value` with object keys sorted lexicographically at every
/// depth, so the result is stable across machines and language runtimes.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, val)) in sorted.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string keys always serialize"));
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// `sha256(canonical_json({model, input, params}))`.
pub fn input_hash(model: &str, input: &Value, params: &Value) -> String {
    let envelope = serde_json::json!({
        "model": model,
        "input": input,
        "params": params,
    });
    let canonical = canonical_json(&envelope);
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_hash_is_stable_under_key_order() {
        let a = json!({"a": 1, "b": 2});
        let b = json!({"b": 2, "a": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn input_hash_is_stable_under_key_order() {
        let h1 = input_hash("openai:gpt-5", &json!({"x": 1, "y": 2}), &json!({"temperature": 0.5}));
        let h2 = input_hash("openai:gpt-5", &json!({"y": 2, "x": 1}), &json!({"temperature": 0.5}));
        assert_eq!(h1, h2);
    }

    #[test]
    fn input_hash_changes_with_content() {
        let h1 = input_hash("openai:gpt-5", &json!({"x": 1}), &json!({}));
        let h2 = input_hash("openai:gpt-5", &json!({"x": 2}), &json!({}));
        assert_ne!(h1, h2);
    }

    #[test]
    fn nested_objects_are_also_sorted() {
        let a = json!({"outer": {"z": 1, "a": 2}});
        let b = json!({"outer": {"a": 2, "z": 1}});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }
}
