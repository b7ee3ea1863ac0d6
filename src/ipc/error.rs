use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Log an unexpected failure and answer with a generic Indonesian message;
/// the underlying cause travels in `details.cause`.
pub fn failed(
    id: &str,
    code: &str,
    message: impl Into<String>,
    cause: impl std::fmt::Display,
) -> serde_json::Value {
    let message = message.into();
    tracing::error!(code, cause = %cause, "{}", message);
    err(id, code, message, Some(json!({ "cause": cause.to_string() })))
}
