use serde::Serialize;
use serde_json::json;

use crate::error::GradeError;

/// Success envelope: `{id, ok: true, result}`.
pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

/// Failure envelope: `{id, ok: false, error: {code, message, details?}}`.
pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let error = ErrorBody {
        code,
        message: message.into(),
        details,
    };
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn grade_err(id: &str, e: &GradeError) -> serde_json::Value {
    if let GradeError::Db(db) = e {
        tracing::error!(request_id = id, error = %db, "query failed");
    }
    err(id, e.code(), e.to_string(), e.details())
}

pub fn no_workspace(id: &str) -> serde_json::Value {
    err(id, "no_workspace", "select a workspace first", None)
}
