use crate::error::GradeError;
use crate::ipc::helpers::{get_required_bool, get_required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::locks;
use crate::store::SqliteStore;
use rusqlite::Connection;
use serde_json::json;

fn locks_toggle(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, GradeError> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let component_id = get_required_str(params, "componentId")?;
    let desired = get_required_bool(params, "desiredLocked")?;
    let outcome = locks::toggle(&SqliteStore::new(conn), &teacher_id, &component_id, desired)?;
    Ok(json!(outcome))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "locks.toggle" => Some(with_conn(state, req, locks_toggle)),
        _ => None,
    }
}
