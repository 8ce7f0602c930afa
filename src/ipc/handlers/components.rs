use crate::config;
use crate::error::GradeError;
use crate::ipc::helpers::{get_required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::registry::{self, ComponentDraft, ComponentPatch};
use crate::save;
use crate::store::SqliteStore;
use rusqlite::Connection;
use serde_json::json;

fn components_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, GradeError> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let class_id = get_required_str(params, "classId")?;
    let components = registry::list_components(&SqliteStore::new(conn), &teacher_id, &class_id)?;
    Ok(json!({ "components": components }))
}

fn components_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, GradeError> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let class_id = get_required_str(params, "classId")?;
    let draft = ComponentDraft::from_params(params)?;
    let policy = config::load_policy(conn, &teacher_id);

    let tx = conn.unchecked_transaction()?;
    let store = SqliteStore::new(&tx);
    let (component, class) = registry::create_component(&store, &teacher_id, &class_id, draft)?;
    save::refresh_class_final_grades(&store, &policy, &class, &teacher_id)?;
    tx.commit()?;
    tracing::info!(component_id = %component.id, class_id = %class_id, "component created");
    Ok(json!({ "component": component }))
}

// Any component change alters what existing scores mean, so the cached
// final grades are rewritten in the same transaction.
fn components_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, GradeError> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let component_id = get_required_str(params, "componentId")?;
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(GradeError::bad_params("missing patch"));
    };
    let patch = ComponentPatch::from_params(patch)?;
    let policy = config::load_policy(conn, &teacher_id);

    let tx = conn.unchecked_transaction()?;
    let store = SqliteStore::new(&tx);
    let (component, class) = registry::update_component(&store, &teacher_id, &component_id, patch)?;
    save::refresh_class_final_grades(&store, &policy, &class, &teacher_id)?;
    tx.commit()?;
    Ok(json!({ "component": component }))
}

fn components_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, GradeError> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let component_id = get_required_str(params, "componentId")?;
    let policy = config::load_policy(conn, &teacher_id);

    let tx = conn.unchecked_transaction()?;
    let store = SqliteStore::new(&tx);
    let class = registry::delete_component(&store, &teacher_id, &component_id)?;
    save::refresh_class_final_grades(&store, &policy, &class, &teacher_id)?;
    tx.commit()?;
    Ok(json!({ "ok": true }))
}

fn components_ensure_attendance(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, GradeError> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let class_id = get_required_str(params, "classId")?;
    let tx = conn.unchecked_transaction()?;
    let created = registry::ensure_attendance_components(&SqliteStore::new(&tx), &teacher_id, &class_id)?;
    tx.commit()?;
    Ok(json!({ "created": created }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "components.list" => Some(with_conn(state, req, components_list)),
        "components.create" => Some(with_conn(state, req, components_create)),
        "components.update" => Some(with_conn(state, req, components_update)),
        "components.delete" => Some(with_conn(state, req, components_delete)),
        "components.ensureAttendance" => Some(with_conn(state, req, components_ensure_attendance)),
        _ => None,
    }
}
