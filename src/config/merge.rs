//! Configuration merge logic
//!
//! Layers are merged in order with:
//! - Objects: deep-merge by key
//! - Arrays: REPLACE (last wins)
//! - Scalars: override (last wins)

use serde_json::Value;

/// Deep merge two JSON values, `overlay` taking precedence.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }

        // Arrays, scalars and mismatched kinds: overlay wins
        (_, overlay) => overlay,
    }
}

/// Merge layers in order (first is base, last has highest precedence)
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalar_override() {
        let result = deep_merge(json!({"sleep_ms": 3000}), json!({"sleep_ms": 10}));
        assert_eq!(result["sleep_ms"], 10);
    }

    #[test]
    fn test_missing_keys_preserved() {
        let result = deep_merge(
            json!({"workers": 4, "max_idle_steps": 100}),
            json!({"workers": 8}),
        );
        assert_eq!(result["workers"], 8);
        assert_eq!(result["max_idle_steps"], 100);
    }

    #[test]
    fn test_nested_objects_merge() {
        let result = deep_merge(
            json!({"log": {"level": "info", "ansi": true}}),
            json!({"log": {"level": "debug"}}),
        );
        assert_eq!(result["log"]["level"], "debug");
        assert_eq!(result["log"]["ansi"], true);
    }

    #[test]
    fn test_array_replace() {
        let result = deep_merge(json!({"env": ["A", "B"]}), json!({"env": ["C"]}));
        assert_eq!(result["env"], json!(["C"]));
    }

    #[test]
    fn test_merge_layers_precedence() {
        let builtin = json!({"workers": 2, "sleep_ms": 3000, "shell": "sh"});
        let file = json!({"sleep_ms": 500, "shell": "bash"});
        let cli = json!({"sleep_ms": 0});

        let merged = merge_layers(vec![builtin, file, cli]);

        assert_eq!(merged["workers"], 2);
        assert_eq!(merged["sleep_ms"], 0);
        assert_eq!(merged["shell"], "bash");
    }

    #[test]
    fn test_merge_no_layers_is_null() {
        assert!(merge_layers(Vec::new()).is_null());
    }
}
