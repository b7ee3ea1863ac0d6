use serde_json::Value;

/// Field presence with explicit null kept apart from absence, so updates can
/// distinguish "leave unchanged" from "clear".
pub enum Patch<T> {
    Unchanged,
    Clear,
    Set(T),
}

pub fn required_str(params: &Value, key: &str) -> Result<String, String> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        Some(_) => Err(format!("{} must not be empty", key)),
        None => Err(format!("missing {}", key)),
    }
}

pub fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

pub fn nullable_str(params: &Value, key: &str) -> Result<Patch<String>, String> {
    match params.get(key) {
        None => Ok(Patch::Unchanged),
        Some(Value::Null) => Ok(Patch::Clear),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(Patch::Clear),
        Some(Value::String(s)) => Ok(Patch::Set(s.trim().to_string())),
        Some(_) => Err(format!("{} must be a string or null", key)),
    }
}

pub fn string_list(params: &Value, key: &str) -> Result<Vec<String>, String> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| format!("{} must contain only strings", key))
            })
            .collect(),
        Some(_) => Err(format!("{} must be an array", key)),
    }
}

/// Views the UI should refresh after a mutation. Fire and forget: the daemon
/// only announces them and never waits for the host to react.
pub fn revalidate(views: &[&str]) -> Value {
    tracing::debug!(views = ?views, "revalidate");
    Value::from(views.to_vec())
}
