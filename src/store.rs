//! Storage seam for the grading engine.
//!
//! The engine only talks to [`GradeStore`]; [`SqliteStore`] is the workspace
//! implementation and works equally over a plain connection or an open
//! transaction (both deref to `rusqlite::Connection`).

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashMap;

use crate::calc::{GradeComponent, GradingMode, Period, RawValue};
use crate::error::GradeError;
use crate::ledger::{HistoryEntry, NewHistoryEntry};

pub type StoreResult<T> = Result<T, GradeError>;

/// (enrollment_id, component_id) -> stored value.
pub type ScoreTable = HashMap<(String, String), RawValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub id: String,
    pub teacher_id: String,
    pub name: String,
    pub grading_mode: GradingMode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: String,
    pub class_id: String,
    pub student_name: String,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalGradeRecord {
    pub enrollment_id: String,
    pub class_id: String,
    pub overall_final_grade: Option<f64>,
    pub remarks: String,
}

pub trait GradeStore {
    fn load_class(&self, class_id: &str) -> StoreResult<Option<ClassInfo>>;

    fn load_teacher_classes(&self, teacher_id: &str) -> StoreResult<Vec<ClassInfo>>;

    fn load_enrollments(&self, class_id: &str) -> StoreResult<Vec<Enrollment>>;

    fn load_components(&self, class_id: &str) -> StoreResult<Vec<GradeComponent>>;

    fn load_component(&self, component_id: &str) -> StoreResult<Option<GradeComponent>>;

    fn insert_component(&self, component: &GradeComponent) -> StoreResult<()>;

    /// Rewrites the editable columns of an existing component.
    fn update_component(&self, component: &GradeComponent) -> StoreResult<()>;

    /// Removes the component and the scores recorded against it.
    fn delete_component(&self, component_id: &str) -> StoreResult<()>;

    fn set_component_locked(&self, component_id: &str, locked: bool) -> StoreResult<()>;

    fn load_scores(&self, enrollment_ids: &[String], component_ids: &[String]) -> StoreResult<ScoreTable>;

    /// Single-statement upsert keyed by (enrollment_id, component_id).
    fn upsert_score(&self, enrollment_id: &str, component_id: &str, value: &str) -> StoreResult<()>;

    fn load_final_grade(&self, enrollment_id: &str, class_id: &str) -> StoreResult<Option<FinalGradeRecord>>;

    fn upsert_final_grade(&self, record: &FinalGradeRecord) -> StoreResult<()>;

    fn append_history(&self, entry: &NewHistoryEntry<'_>) -> StoreResult<HistoryEntry>;

    /// Newest first. `limit` truncates after ordering.
    fn load_history(&self, enrollment_id: &str, class_id: &str, limit: Option<usize>) -> StoreResult<Vec<HistoryEntry>>;
}

/// Loads the class and checks it belongs to `teacher_id`.
pub fn authorize_class(store: &dyn GradeStore, class_id: &str, teacher_id: &str) -> StoreResult<ClassInfo> {
    let class = store
        .load_class(class_id)?
        .ok_or(GradeError::NotFound("class"))?;
    if class.teacher_id != teacher_id {
        return Err(GradeError::Forbidden {
            what: "class",
            id: class_id.to_string(),
            teacher_id: teacher_id.to_string(),
        });
    }
    Ok(class)
}

/// Loads the component and checks its class belongs to `teacher_id`.
pub fn authorize_component(
    store: &dyn GradeStore,
    component_id: &str,
    teacher_id: &str,
) -> StoreResult<(GradeComponent, ClassInfo)> {
    let component = store
        .load_component(component_id)?
        .ok_or(GradeError::NotFound("component"))?;
    let class = authorize_class(store, &component.class_id, teacher_id).map_err(|e| match e {
        GradeError::Forbidden { teacher_id, .. } => GradeError::Forbidden {
            what: "component",
            id: component_id.to_string(),
            teacher_id,
        },
        other => other,
    })?;
    Ok((component, class))
}

pub fn now_timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.6fZ")
        .to_string()
}

pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

const COMPONENT_COLUMNS: &str =
    "id, class_id, name, period, max_score, weight, is_attendance_based, is_locked, sort_order";

fn component_from_row(r: &Row<'_>) -> rusqlite::Result<GradeComponent> {
    let period: Option<String> = r.get(3)?;
    Ok(GradeComponent {
        id: r.get(0)?,
        class_id: r.get(1)?,
        name: r.get(2)?,
        period: period.as_deref().and_then(Period::parse),
        max_score: r.get(4)?,
        weight: r.get(5)?,
        is_attendance_based: r.get::<_, i64>(6)? != 0,
        is_locked: r.get::<_, i64>(7)? != 0,
        sort_order: r.get(8)?,
    })
}

fn history_from_row(r: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    Ok(HistoryEntry {
        id: r.get(0)?,
        enrollment_id: r.get(1)?,
        class_id: r.get(2)?,
        teacher_id: r.get(3)?,
        component_id: r.get(4)?,
        grade_type: r.get(5)?,
        old_value: r.get(6)?,
        new_value: r.get(7)?,
        timestamp: r.get(8)?,
    })
}

impl GradeStore for SqliteStore<'_> {
    fn load_class(&self, class_id: &str) -> StoreResult<Option<ClassInfo>> {
        let row: Option<(String, String, String, String)> = self
            .conn
            .query_row(
                "SELECT id, teacher_id, name, grading_mode FROM classes WHERE id = ?",
                [class_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;
        Ok(row.map(|(id, teacher_id, name, mode)| ClassInfo {
            id,
            teacher_id,
            name,
            grading_mode: GradingMode::parse(&mode).unwrap_or_default(),
        }))
    }

    fn load_teacher_classes(&self, teacher_id: &str) -> StoreResult<Vec<ClassInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, teacher_id, name, grading_mode
             FROM classes
             WHERE teacher_id = ?
             ORDER BY name, id",
        )?;
        let rows = stmt
            .query_map([teacher_id], |r| {
                let mode: String = r.get(3)?;
                Ok(ClassInfo {
                    id: r.get(0)?,
                    teacher_id: r.get(1)?,
                    name: r.get(2)?,
                    grading_mode: GradingMode::parse(&mode).unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn load_enrollments(&self, class_id: &str) -> StoreResult<Vec<Enrollment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, class_id, student_name, sort_order
             FROM enrollments
             WHERE class_id = ?
             ORDER BY sort_order",
        )?;
        let rows = stmt
            .query_map([class_id], |r| {
                Ok(Enrollment {
                    id: r.get(0)?,
                    class_id: r.get(1)?,
                    student_name: r.get(2)?,
                    sort_order: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn load_components(&self, class_id: &str) -> StoreResult<Vec<GradeComponent>> {
        let sql = format!(
            "SELECT {} FROM grade_components WHERE class_id = ? ORDER BY sort_order",
            COMPONENT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([class_id], component_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn load_component(&self, component_id: &str) -> StoreResult<Option<GradeComponent>> {
        let sql = format!(
            "SELECT {} FROM grade_components WHERE id = ?",
            COMPONENT_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, [component_id], component_from_row)
            .optional()?)
    }

    fn insert_component(&self, c: &GradeComponent) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO grade_components(id, class_id, name, period, max_score, weight, is_attendance_based, is_locked, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &c.id,
                &c.class_id,
                &c.name,
                c.period.map(|p| p.as_str()),
                c.max_score,
                c.weight,
                c.is_attendance_based as i64,
                c.is_locked as i64,
                c.sort_order,
            ),
        )?;
        Ok(())
    }

    fn update_component(&self, c: &GradeComponent) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE grade_components
             SET name = ?, period = ?, max_score = ?, weight = ?, is_attendance_based = ?
             WHERE id = ?",
            (
                &c.name,
                c.period.map(|p| p.as_str()),
                c.max_score,
                c.weight,
                c.is_attendance_based as i64,
                &c.id,
            ),
        )?;
        Ok(())
    }

    fn delete_component(&self, component_id: &str) -> StoreResult<()> {
        self.conn
            .execute("DELETE FROM raw_scores WHERE component_id = ?", [component_id])?;
        self.conn
            .execute("DELETE FROM grade_components WHERE id = ?", [component_id])?;
        Ok(())
    }

    fn set_component_locked(&self, component_id: &str, locked: bool) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE grade_components SET is_locked = ? WHERE id = ?",
            (locked as i64, component_id),
        )?;
        Ok(())
    }

    fn load_scores(&self, enrollment_ids: &[String], component_ids: &[String]) -> StoreResult<ScoreTable> {
        let mut table = ScoreTable::new();
        if enrollment_ids.is_empty() || component_ids.is_empty() {
            return Ok(table);
        }

        let enroll_placeholders = vec!["?"; enrollment_ids.len()].join(",");
        let comp_placeholders = vec!["?"; component_ids.len()].join(",");
        let sql = format!(
            "SELECT enrollment_id, component_id, value
             FROM raw_scores
             WHERE enrollment_id IN ({}) AND component_id IN ({})",
            enroll_placeholders, comp_placeholders
        );
        let mut bind_values: Vec<Value> =
            Vec::with_capacity(enrollment_ids.len() + component_ids.len());
        for id in enrollment_ids {
            bind_values.push(Value::Text(id.clone()));
        }
        for id in component_ids {
            bind_values.push(Value::Text(id.clone()));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bind_values), |r| {
            let enrollment_id: String = r.get(0)?;
            let component_id: String = r.get(1)?;
            let value: String = r.get(2)?;
            Ok((enrollment_id, component_id, value))
        })?;
        for row in rows {
            let (enrollment_id, component_id, value) = row?;
            table.insert((enrollment_id, component_id), RawValue::parse(&value));
        }
        Ok(table)
    }

    fn upsert_score(&self, enrollment_id: &str, component_id: &str, value: &str) -> StoreResult<()> {
        let score_id = uuid::Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO raw_scores(id, enrollment_id, component_id, value, updated_at)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(enrollment_id, component_id) DO UPDATE SET
               value = excluded.value,
               updated_at = excluded.updated_at",
            (&score_id, enrollment_id, component_id, value, now_timestamp()),
        )?;
        Ok(())
    }

    fn load_final_grade(&self, enrollment_id: &str, class_id: &str) -> StoreResult<Option<FinalGradeRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT enrollment_id, class_id, overall_final_grade, remarks
                 FROM final_grades
                 WHERE enrollment_id = ? AND class_id = ?",
                (enrollment_id, class_id),
                |r| {
                    Ok(FinalGradeRecord {
                        enrollment_id: r.get(0)?,
                        class_id: r.get(1)?,
                        overall_final_grade: r.get(2)?,
                        remarks: r.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    fn upsert_final_grade(&self, record: &FinalGradeRecord) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO final_grades(enrollment_id, class_id, overall_final_grade, remarks, updated_at)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(enrollment_id, class_id) DO UPDATE SET
               overall_final_grade = excluded.overall_final_grade,
               remarks = excluded.remarks,
               updated_at = excluded.updated_at",
            (
                &record.enrollment_id,
                &record.class_id,
                record.overall_final_grade,
                &record.remarks,
                now_timestamp(),
            ),
        )?;
        Ok(())
    }

    fn append_history(&self, entry: &NewHistoryEntry<'_>) -> StoreResult<HistoryEntry> {
        let stored = HistoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            enrollment_id: entry.enrollment_id.to_string(),
            class_id: entry.class_id.to_string(),
            teacher_id: entry.teacher_id.to_string(),
            component_id: entry.component_id.map(str::to_string),
            grade_type: entry.grade_type.to_string(),
            old_value: entry.old_value.map(str::to_string),
            new_value: entry.new_value.to_string(),
            timestamp: now_timestamp(),
        };
        self.conn.execute(
            "INSERT INTO grade_history(id, enrollment_id, class_id, teacher_id, component_id, grade_type, old_value, new_value, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &stored.id,
                &stored.enrollment_id,
                &stored.class_id,
                &stored.teacher_id,
                &stored.component_id,
                &stored.grade_type,
                &stored.old_value,
                &stored.new_value,
                &stored.timestamp,
            ),
        )?;
        Ok(stored)
    }

    fn load_history(&self, enrollment_id: &str, class_id: &str, limit: Option<usize>) -> StoreResult<Vec<HistoryEntry>> {
        // LIMIT -1 means "no limit" in SQLite.
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        let mut stmt = self.conn.prepare(
            "SELECT id, enrollment_id, class_id, teacher_id, component_id, grade_type, old_value, new_value, created_at
             FROM grade_history
             WHERE enrollment_id = ? AND class_id = ?
             ORDER BY created_at DESC, seq DESC
             LIMIT ?",
        )?;
        let rows = stmt
            .query_map((enrollment_id, class_id, limit), history_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
