use rusqlite::Connection;
use serde_json::Value;

use crate::error::GradeError;
use crate::ipc::error::{grade_err, no_workspace, ok};
use crate::ipc::types::{AppState, Request};

pub fn get_required_str(params: &Value, key: &str) -> Result<String, GradeError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| GradeError::bad_params(format!("missing {}", key)))
}

pub fn get_required_bool(params: &Value, key: &str) -> Result<bool, GradeError> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| GradeError::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, GradeError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(GradeError::bad_params(format!("{} must be a string", key))),
    }
}

pub fn get_optional_usize(params: &Value, key: &str) -> Result<Option<usize>, GradeError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| GradeError::bad_params(format!("{} must be a non-negative integer", key))),
    }
}

/// Grade argument of `grades.equivalence`: a number, a numeric string, or
/// anything else for "no grade".
pub fn grade_arg(params: &Value) -> Option<f64> {
    match params.get("grade") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

pub type HandlerFn = fn(&Connection, &Value) -> Result<Value, GradeError>;

/// Runs `f` against the open workspace and wraps the outcome in a response.
pub fn with_conn(state: &AppState, req: &Request, f: HandlerFn) -> Value {
    let Some(conn) = state.conn() else {
        return no_workspace(&req.id);
    };
    match f(conn, &req.params) {
        Ok(v) => ok(&req.id, v),
        Err(e) => grade_err(&req.id, &e),
    }
}
