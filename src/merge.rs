use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeResult {
    Created,
    Updated,
}

/// Reconciles a freshly parsed record with the stored one under the same key.
///
/// Values accumulate rather than overwrite, so a separate enrichment pass
/// never erases fields written by an earlier one.
pub fn merge(existing: Option<Value>, incoming: Value) -> (Value, MergeResult) {
    match existing {
        None => (incoming, MergeResult::Created),
        Some(existing) => (merge_values(existing, incoming), MergeResult::Updated),
    }
}

/// Field-by-field union of two values.
///
/// - equal values are kept once;
/// - two objects merge key by key with these same rules;
/// - if either side is an array the two are concatenated, existing first,
///   without deduplication;
/// - two differing scalars become `[existing, incoming]`;
/// - `null` on one side yields the other side.
pub fn merge_values(existing: Value, incoming: Value) -> Value {
    if existing == incoming {
        return existing;
    }

    match (existing, incoming) {
        (Value::Null, incoming) => incoming,
        (existing, Value::Null) => existing,
        (Value::Object(existing), Value::Object(incoming)) => Value::Object(merge_objects(existing, incoming)),
        (Value::Array(mut existing), Value::Array(incoming)) => {
            existing.extend(incoming);
            Value::Array(existing)
        }
        (Value::Array(mut existing), incoming) => {
            existing.push(incoming);
            Value::Array(existing)
        }
        (existing, Value::Array(incoming)) => {
            let mut merged = Vec::with_capacity(incoming.len() + 1);
            merged.push(existing);
            merged.extend(incoming);
            Value::Array(merged)
        }
        (existing, incoming) => Value::Array(vec![existing, incoming]),
    }
}

fn merge_objects(mut existing: Map<String, Value>, incoming: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in incoming {
        let merged = match existing.remove(&key) {
            Some(current) => merge_values(current, value),
            None => value,
        };
        existing.insert(key, merged);
    }
    existing
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_existing_record_is_created_verbatim() {
        let incoming = json!({"key": "4e9c", "grade": 0});
        let (merged, result) = merge(None, incoming.clone());

        assert_eq!(result, MergeResult::Created);
        assert_eq!(merged, incoming);
    }

    #[test]
    fn merging_identical_records_is_idempotent() {
        let record = json!({
            "key": "4e9c",
            "stroke_counts": [6, 7],
            "meanings": {"en": ["Asia"]},
            "grade": 0
        });

        let (merged, result) = merge(Some(record.clone()), record.clone());
        assert_eq!(result, MergeResult::Updated);
        assert_eq!(merged, record);
    }

    #[test]
    fn differing_scalars_become_a_pair() {
        let (merged, _) = merge(Some(json!({"a": 1})), json!({"a": 2}));
        assert_eq!(merged, json!({"a": [1, 2]}));
    }

    #[test]
    fn lists_concatenate_with_existing_first() {
        let (merged, _) = merge(Some(json!({"a": [1, 2]})), json!({"a": 3}));
        assert_eq!(merged, json!({"a": [1, 2, 3]}));

        let (merged, _) = merge(Some(json!({"a": 0})), json!({"a": [1, 2]}));
        assert_eq!(merged, json!({"a": [0, 1, 2]}));

        let (merged, _) = merge(Some(json!({"a": [1, 2]})), json!({"a": [2, 3]}));
        assert_eq!(merged, json!({"a": [1, 2, 2, 3]}));
    }

    #[test]
    fn one_sided_fields_carry_through() {
        let existing = json!({"key": "4e9c", "decomposition": ["一", "口"], "freq": null});
        let incoming = json!({"key": "4e9c", "jlpt": 1, "freq": 1509});

        let (merged, _) = merge(Some(existing), incoming);
        assert_eq!(
            merged,
            json!({"key": "4e9c", "decomposition": ["一", "口"], "jlpt": 1, "freq": 1509})
        );
    }

    #[test]
    fn nested_objects_merge_by_key() {
        let existing = json!({"readings": {"ja_on": ["ア"], "nanori": ["や"]}});
        let incoming = json!({"readings": {"ja_on": ["ア"], "ja_kun": ["つ.ぐ"]}});

        let (merged, _) = merge(Some(existing), incoming);
        assert_eq!(
            merged,
            json!({"readings": {"ja_on": ["ア"], "nanori": ["や"], "ja_kun": ["つ.ぐ"]}})
        );
    }
}
