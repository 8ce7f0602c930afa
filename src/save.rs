//! Batch grade saving.
//!
//! One request carries `enrollment -> component -> raw value` for a whole
//! class. Scores, cached final grades and history entries are written inside a
//! single transaction: either the batch commits as a whole or nothing does.
//! Individual bad rows are counted and reported without aborting the batch.

use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::calc::{clamp_score, format_score, GradeComponent, RawValue};
use crate::config::GradingPolicy;
use crate::error::GradeError;
use crate::ledger::{self, NewHistoryEntry, FINAL_GRADE_LABEL};
use crate::locks::{self, WriteDecision};
use crate::report::{compute_student_grades, final_grade_text, final_record, scores_for};
use crate::store::{authorize_class, ClassInfo, GradeStore, SqliteStore};

pub type ScoreBatch = BTreeMap<String, BTreeMap<String, serde_json::Value>>;

#[derive(Debug, Clone)]
pub struct BatchSaveRequest {
    pub teacher_id: String,
    pub class_id: String,
    pub scores: ScoreBatch,
}

impl BatchSaveRequest {
    pub fn from_params(params: &serde_json::Value) -> Result<BatchSaveRequest, GradeError> {
        let teacher_id = required_str(params, "teacherId")?;
        let class_id = required_str(params, "classId")?;
        let Some(raw) = params.get("scores").and_then(|v| v.as_object()) else {
            return Err(GradeError::bad_params("missing scores"));
        };
        let mut scores = ScoreBatch::new();
        for (enrollment_id, row) in raw {
            let Some(row) = row.as_object() else {
                return Err(GradeError::bad_params(format!(
                    "scores.{} must be an object of componentId -> value",
                    enrollment_id
                )));
            };
            let cells = row
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<BTreeMap<_, _>>();
            scores.insert(enrollment_id.clone(), cells);
        }
        Ok(BatchSaveRequest {
            teacher_id,
            class_id,
            scores,
        })
    }

    fn cell_count(&self) -> usize {
        self.scores.values().map(|row| row.len()).sum()
    }
}

fn required_str(params: &serde_json::Value, key: &str) -> Result<String, GradeError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| GradeError::bad_params(format!("missing {}", key)))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSaveOutcome {
    pub saved_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
    pub errors: Vec<String>,
}

impl BatchSaveOutcome {
    fn fail(&mut self, message: String) {
        self.failed_count += 1;
        self.errors.push(message);
    }
}

/// Canonical stored text for a submitted cell.
///
/// Numbers are clamped to `[0, max_score]`. Text on a regular component is
/// kept as typed and scores as 0; that coercion is logged.
fn normalize_value(component: &GradeComponent, enrollment_id: &str, raw: RawValue) -> String {
    match raw {
        RawValue::Number(v) => {
            let clamped = clamp_score(v, component.max_score);
            if clamped != v {
                tracing::debug!(
                    component_id = %component.id,
                    enrollment_id,
                    value = v,
                    clamped,
                    "score clamped into range"
                );
            }
            format_score(clamped)
        }
        RawValue::Mark(s) if component.is_attendance_based => {
            if s.eq_ignore_ascii_case("a") || s.eq_ignore_ascii_case("na") {
                s.to_ascii_uppercase()
            } else {
                s
            }
        }
        RawValue::Mark(s) => {
            tracing::warn!(
                component_id = %component.id,
                enrollment_id,
                value = %s,
                "non-numeric score on a numeric component, counted as 0"
            );
            s
        }
        RawValue::Blank => String::new(),
    }
}

/// Saves one batch atomically.
///
/// Authorization failure aborts before anything is written. A storage failure
/// rolls the whole transaction back, including any history already appended
/// for this batch.
pub fn save_batch(
    conn: &Connection,
    policy: &GradingPolicy,
    req: &BatchSaveRequest,
) -> Result<BatchSaveOutcome, GradeError> {
    let total = req.cell_count();
    let persistence = |e: GradeError| match e {
        GradeError::Db(db) => {
            tracing::error!(class_id = %req.class_id, error = %db, "grade batch rolled back");
            GradeError::Persistence {
                message: db.to_string(),
                failed_count: total,
            }
        }
        other => other,
    };

    let tx = conn.unchecked_transaction().map_err(GradeError::from).map_err(persistence)?;
    let store = SqliteStore::new(&tx);
    let outcome = apply_batch(&store, policy, req).map_err(persistence)?;
    tx.commit().map_err(GradeError::from).map_err(persistence)?;

    tracing::info!(
        class_id = %req.class_id,
        teacher_id = %req.teacher_id,
        saved = outcome.saved_count,
        skipped = outcome.skipped_count,
        failed = outcome.failed_count,
        "grade batch committed"
    );
    Ok(outcome)
}

/// The body of [`save_batch`], run against whatever store the caller opened
/// (normally a transaction).
pub fn apply_batch(
    store: &dyn GradeStore,
    policy: &GradingPolicy,
    req: &BatchSaveRequest,
) -> Result<BatchSaveOutcome, GradeError> {
    let class = authorize_class(store, &req.class_id, &req.teacher_id)?;
    let components = store.load_components(&class.id)?;
    let by_id: HashMap<&str, &GradeComponent> =
        components.iter().map(|c| (c.id.as_str(), c)).collect();
    let enrolled: HashSet<String> = store
        .load_enrollments(&class.id)?
        .into_iter()
        .map(|e| e.id)
        .collect();

    let mut outcome = BatchSaveOutcome::default();

    let batch_enrollments: Vec<String> = req
        .scores
        .keys()
        .filter(|id| enrolled.contains(*id))
        .cloned()
        .collect();
    let component_ids: Vec<String> = components.iter().map(|c| c.id.clone()).collect();
    let previous = store.load_scores(&batch_enrollments, &component_ids)?;

    for (enrollment_id, row) in &req.scores {
        if !enrolled.contains(enrollment_id) {
            for component_id in row.keys() {
                outcome.fail(format!(
                    "enrollment {} is not in class {} (component {})",
                    enrollment_id, class.id, component_id
                ));
            }
            continue;
        }

        for (component_id, raw_json) in row {
            let Some(component) = by_id.get(component_id.as_str()).copied() else {
                outcome.fail(format!(
                    "component {} is not in class {} (enrollment {})",
                    component_id, class.id, enrollment_id
                ));
                continue;
            };

            match locks::gate(component, policy.locked_write) {
                WriteDecision::Accept => {}
                WriteDecision::Skip => {
                    tracing::debug!(component_id = %component.id, enrollment_id = %enrollment_id, "locked component skipped");
                    outcome.skipped_count += 1;
                    continue;
                }
                WriteDecision::Reject => {
                    tracing::warn!(component_id = %component.id, enrollment_id = %enrollment_id, "write to locked component rejected");
                    outcome.fail(format!(
                        "component {} is locked (enrollment {})",
                        component.name, enrollment_id
                    ));
                    continue;
                }
            }

            let Some(raw) = RawValue::from_json(raw_json) else {
                outcome.fail(format!(
                    "value for component {} (enrollment {}) must be a number, string or null",
                    component.name, enrollment_id
                ));
                continue;
            };

            let new_value = normalize_value(component, enrollment_id, raw);
            let old_value = previous
                .get(&(enrollment_id.clone(), component.id.clone()))
                .map(RawValue::to_stored);

            if old_value.as_deref() != Some(new_value.as_str()) {
                store.upsert_score(enrollment_id, &component.id, &new_value)?;
                ledger::record(
                    store,
                    &NewHistoryEntry {
                        enrollment_id,
                        class_id: &class.id,
                        teacher_id: &req.teacher_id,
                        component_id: Some(&component.id),
                        grade_type: &component.name,
                        old_value: old_value.as_deref(),
                        new_value: &new_value,
                    },
                )?;
            }
            outcome.saved_count += 1;
        }
    }

    refresh_final_grades(store, policy, &class, &components, &req.teacher_id, &batch_enrollments)?;
    Ok(outcome)
}

/// Recomputes and rewrites the cached final grade for each enrollment,
/// appending a "Final Grade" history entry when its text changes.
pub fn refresh_final_grades(
    store: &dyn GradeStore,
    policy: &GradingPolicy,
    class: &ClassInfo,
    components: &[GradeComponent],
    teacher_id: &str,
    enrollment_ids: &[String],
) -> Result<(), GradeError> {
    if enrollment_ids.is_empty() {
        return Ok(());
    }
    let component_ids: Vec<String> = components.iter().map(|c| c.id.clone()).collect();
    let table = store.load_scores(enrollment_ids, &component_ids)?;

    for enrollment_id in enrollment_ids {
        let grades = compute_student_grades(class, components, &scores_for(&table, enrollment_id), policy);
        let record = final_record(&class.id, enrollment_id, &grades);
        let previous = store.load_final_grade(enrollment_id, &class.id)?;
        store.upsert_final_grade(&record)?;

        let old_text = previous.map(|p| final_grade_text(p.overall_final_grade));
        let new_text = final_grade_text(record.overall_final_grade);
        ledger::record(
            store,
            &NewHistoryEntry {
                enrollment_id,
                class_id: &class.id,
                teacher_id,
                component_id: None,
                grade_type: FINAL_GRADE_LABEL,
                old_value: old_text.as_deref(),
                new_value: &new_text,
            },
        )?;
    }
    Ok(())
}

/// Refreshes every enrollment of a class, used after registry changes that
/// alter what the scores mean (max score, period, deletion).
pub fn refresh_class_final_grades(
    store: &dyn GradeStore,
    policy: &GradingPolicy,
    class: &ClassInfo,
    teacher_id: &str,
) -> Result<(), GradeError> {
    let components = store.load_components(&class.id)?;
    let enrollment_ids: Vec<String> = store
        .load_enrollments(&class.id)?
        .into_iter()
        .map(|e| e.id)
        .collect();
    refresh_final_grades(store, policy, class, &components, teacher_id, &enrollment_ids)
}

/// Refreshes every class a teacher owns, used when that teacher's grading
/// policy changes. Returns the number of classes rewritten.
pub fn refresh_teacher_final_grades(
    store: &dyn GradeStore,
    policy: &GradingPolicy,
    teacher_id: &str,
) -> Result<usize, GradeError> {
    let classes = store.load_teacher_classes(teacher_id)?;
    for class in &classes {
        refresh_class_final_grades(store, policy, class, teacher_id)?;
    }
    Ok(classes.len())
}
