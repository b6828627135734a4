use serde_json::Value as JsonValue;

/// Apply a partial document onto `target`.
///
/// Objects merge key by key, arrays and scalars replace, and `null` removes
/// the key so the typed default applies on the next read.
pub fn merge_json(target: &mut JsonValue, patch: &JsonValue) {
    match (target, patch) {
        (JsonValue::Object(base), JsonValue::Object(changes)) => {
            for (key, change) in changes {
                if change.is_null() {
                    base.remove(key);
                    continue;
                }
                match base.get_mut(key) {
                    Some(existing) if existing.is_object() && change.is_object() => {
                        merge_json(existing, change);
                    }
                    _ => {
                        base.insert(key.clone(), change.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}
