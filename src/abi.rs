//! Sandboxed compute ABI boundary (spec §6).
//!
//! The compute module itself is an external collaborator (§1): this crate
//! never loads or invokes it. What belongs here is the host-side conversion
//! the spec pins down at the boundary — lowering a domain object to
//! `[[key, string(value)], ...]` before a call, keeping only scalar fields,
//! and lifting the response back by coercion (int parse -> float parse ->
//! bool match -> string fallback), per §6 and testable property 5 (§8).

use serde_json::{Map, Value};

/// Lower `value` to the `[[key, string(value)], ...]` shape the compute ABI
/// takes, keeping only fields of type string/number/boolean (§6). Non-object
/// values and non-scalar fields are dropped; there is nothing else to keep,
/// since the ABI only carries flat key-value pairs.
pub fn lower_scalar_fields(value: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = value else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(key, v)| scalar_to_string(v).map(|s| (key.clone(), s)))
        .collect()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Lift a compute module's `[[key, string], ...]` response back into a
/// domain object, per §6's parse-coercion rule: for each value, try integer
/// parse, then float parse, then boolean match, falling back to the string
/// itself.
pub fn lift_coerced(pairs: &[(String, String)]) -> Value {
    let mut map = Map::new();
    for (key, raw) in pairs {
        map.insert(key.clone(), coerce(raw));
    }
    Value::Object(map)
}

fn coerce(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match raw {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn a_scalar_only_object_round_trips_through_lower_and_lift() {
        let original = json!({"id": 1, "active": true, "name": "widget"});

        let lowered = lower_scalar_fields(&original);
        let lifted = lift_coerced(&lowered);

        assert_eq!(lifted, original);
    }

    #[test]
    fn non_scalar_fields_are_dropped_before_crossing_the_boundary() {
        let original = json!({"id": 1, "tags": ["a", "b"], "meta": {"nested": true}});

        let lowered = lower_scalar_fields(&original);
        let keys: Vec<&str> = lowered.iter().map(|(k, _)| k.as_str()).collect();

        assert_eq!(keys, vec!["id"]);
    }

    #[test]
    fn lift_coercion_prefers_integer_then_float_then_bool_then_string() {
        assert_eq!(coerce("42"), json!(42));
        assert_eq!(coerce("3.5"), json!(3.5));
        assert_eq!(coerce("true"), json!(true));
        assert_eq!(coerce("hello"), json!("hello"));
    }

    #[test]
    fn a_non_object_value_lowers_to_no_fields() {
        assert!(lower_scalar_fields(&json!([1, 2, 3])).is_empty());
        assert!(lower_scalar_fields(&json!("scalar")).is_empty());
    }
}
