use crate::calc::GradingMode;
use crate::error::GradeError;
use crate::ipc::helpers::{get_optional_str, get_required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::registry;
use crate::store::{authorize_class, ClassInfo, GradeStore, SqliteStore};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn classes_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, GradeError> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(GradeError::bad_params("name must not be empty"));
    }
    let grading_mode = match get_optional_str(params, "gradingMode")? {
        None => GradingMode::default(),
        Some(raw) => GradingMode::parse(&raw)
            .ok_or_else(|| GradeError::bad_params(format!("unknown gradingMode: {}", raw)))?,
    };

    let class = ClassInfo {
        id: Uuid::new_v4().to_string(),
        teacher_id,
        name,
        grading_mode,
    };

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO classes(id, teacher_id, name, grading_mode) VALUES(?, ?, ?, ?)",
        (&class.id, &class.teacher_id, &class.name, class.grading_mode.as_str()),
    )?;
    // Terminal classes cannot be graded without their synthetic component.
    let created = if class.grading_mode == GradingMode::Terminal {
        registry::ensure_virtual_components(&SqliteStore::new(&tx), &class)?
    } else {
        Vec::new()
    };
    tx.commit()?;

    tracing::info!(class_id = %class.id, teacher_id = %class.teacher_id, mode = class.grading_mode.as_str(), "class created");
    Ok(json!({
        "classId": class.id,
        "name": class.name,
        "gradingMode": class.grading_mode,
        "components": created
    }))
}

fn classes_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, GradeError> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let mut stmt = conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.grading_mode,
           (SELECT COUNT(*) FROM enrollments e WHERE e.class_id = c.id) AS enrollment_count,
           (SELECT COUNT(*) FROM grade_components g WHERE g.class_id = c.id) AS component_count
         FROM classes c
         WHERE c.teacher_id = ?
         ORDER BY c.name",
    )?;
    let classes = stmt
        .query_map([&teacher_id], |row| {
            let mode: String = row.get(2)?;
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "gradingMode": GradingMode::parse(&mode).unwrap_or_default(),
                "enrollmentCount": row.get::<_, i64>(3)?,
                "componentCount": row.get::<_, i64>(4)?
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "classes": classes }))
}

/// Enrollment methods take an optional `teacherId`; when present the class
/// must belong to it.
fn load_enrollment_class(store: &dyn GradeStore, params: &serde_json::Value) -> Result<ClassInfo, GradeError> {
    let class_id = get_required_str(params, "classId")?;
    match get_optional_str(params, "teacherId")? {
        Some(teacher_id) => authorize_class(store, &class_id, &teacher_id),
        None => store.load_class(&class_id)?.ok_or(GradeError::NotFound("class")),
    }
}

fn enrollments_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, GradeError> {
    let class = load_enrollment_class(&SqliteStore::new(conn), params)?;
    let student_name = get_required_str(params, "studentName")?.trim().to_string();
    if student_name.is_empty() {
        return Err(GradeError::bad_params("studentName must not be empty"));
    }

    let sort_order: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM enrollments WHERE class_id = ?",
        [&class.id],
        |r| r.get(0),
    )?;
    let enrollment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO enrollments(id, class_id, student_name, sort_order) VALUES(?, ?, ?, ?)",
        (&enrollment_id, &class.id, &student_name, sort_order),
    )?;
    Ok(json!({ "enrollmentId": enrollment_id, "sortOrder": sort_order }))
}

fn enrollments_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, GradeError> {
    let store = SqliteStore::new(conn);
    let class = load_enrollment_class(&store, params)?;
    Ok(json!({ "enrollments": store.load_enrollments(&class.id)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.create" => Some(with_conn(state, req, classes_create)),
        "classes.list" => Some(with_conn(state, req, classes_list)),
        "enrollments.add" => Some(with_conn(state, req, enrollments_add)),
        "enrollments.list" => Some(with_conn(state, req, enrollments_list)),
        _ => None,
    }
}
