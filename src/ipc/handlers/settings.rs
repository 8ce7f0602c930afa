use crate::config::{self, GradingPolicy};
use crate::error::GradeError;
use crate::ipc::helpers::{get_required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::save;
use crate::store::SqliteStore;
use rusqlite::Connection;
use serde_json::json;

fn settings_get_policy(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, GradeError> {
    let teacher_id = get_required_str(params, "teacherId")?;
    Ok(json!({ "policy": config::load_policy(conn, &teacher_id) }))
}

// The cached final grades of every class the teacher owns are recomputed
// under the new policy before the change commits.
fn settings_set_policy(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, GradeError> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let Some(raw) = params.get("policy") else {
        return Err(GradeError::bad_params("missing policy"));
    };
    let policy: GradingPolicy = serde_json::from_value(raw.clone())
        .map_err(|e| GradeError::bad_params(format!("invalid policy: {}", e)))?;

    let tx = conn.unchecked_transaction()?;
    config::store_policy(&tx, &teacher_id, &policy).map_err(|e| GradeError::Persistence {
        message: e.to_string(),
        failed_count: 1,
    })?;
    let refreshed = save::refresh_teacher_final_grades(&SqliteStore::new(&tx), &policy, &teacher_id)?;
    tx.commit()?;
    tracing::info!(teacher_id = %teacher_id, ?policy, classes = refreshed, "grading policy updated");
    Ok(json!({ "policy": policy, "refreshedClasses": refreshed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.getPolicy" => Some(with_conn(state, req, settings_get_policy)),
        "settings.setPolicy" => Some(with_conn(state, req, settings_set_policy)),
        _ => None,
    }
}
