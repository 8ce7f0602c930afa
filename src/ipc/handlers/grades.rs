use crate::calc::resolve_equivalence;
use crate::config;
use crate::error::GradeError;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_str, grade_arg, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::report;
use crate::save::{self, BatchSaveRequest};
use crate::store::SqliteStore;
use rusqlite::Connection;
use serde_json::json;

fn grades_save_batch(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, GradeError> {
    let req = BatchSaveRequest::from_params(params)?;
    let policy = config::load_policy(conn, &req.teacher_id);
    let outcome = save::save_batch(conn, &policy, &req)?;
    Ok(json!(outcome))
}

fn grades_student_report(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, GradeError> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let class_id = get_required_str(params, "classId")?;
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    let policy = config::load_policy(conn, &teacher_id);
    let report = report::student_report(&SqliteStore::new(conn), &policy, &teacher_id, &class_id, &enrollment_id)?;
    Ok(json!(report))
}

fn grades_class_report(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, GradeError> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let class_id = get_required_str(params, "classId")?;
    let policy = config::load_policy(conn, &teacher_id);
    let report = report::class_report(&SqliteStore::new(conn), &policy, &teacher_id, &class_id)?;
    Ok(json!(report))
}

// Stateless: answers without a workspace.
fn handle_equivalence(req: &Request) -> serde_json::Value {
    ok(&req.id, json!(resolve_equivalence(grade_arg(&req.params))))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.saveBatch" => Some(with_conn(state, req, grades_save_batch)),
        "grades.studentReport" => Some(with_conn(state, req, grades_student_report)),
        "grades.classReport" => Some(with_conn(state, req, grades_class_report)),
        "grades.equivalence" => Some(handle_equivalence(req)),
        _ => None,
    }
}
