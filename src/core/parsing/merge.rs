use serde_json::Value;

/// Applies `patch` onto `target` per RFC 7396: objects merge
/// recursively, nulls delete, anything else replaces
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Default::default());
    }

    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
                continue;
            }

            merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_incoming_fields_override_stored() {
        let mut stored = json!({"id": "stored", "tmax": 500, "site": {"domain": "a.com", "page": "p"}});
        merge_patch(&mut stored, &json!({"id": "incoming", "site": {"domain": "b.com"}}));

        assert_eq!(
            stored,
            json!({"id": "incoming", "tmax": 500, "site": {"domain": "b.com", "page": "p"}})
        );
    }

    #[test]
    fn test_null_removes_and_arrays_replace() {
        let mut stored = json!({"cur": ["USD", "EUR"], "tmax": 500});
        merge_patch(&mut stored, &json!({"cur": ["GBP"], "tmax": null}));

        assert_eq!(stored, json!({"cur": ["GBP"]}));
    }

    #[test]
    fn test_non_object_target_is_replaced() {
        let mut stored = json!("scalar");
        merge_patch(&mut stored, &json!({"a": {"b": null, "c": 1}}));

        assert_eq!(stored, json!({"a": {"c": 1}}));
    }
}
