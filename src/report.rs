use serde::Serialize;
use std::collections::HashMap;

use crate::calc::{
    compute_final_grade, compute_period_grade, resolve_equivalence, terminal_final_grade,
    terminal_remarks, Equivalence, GradeComponent, GradingMode, Period, PeriodBreakdown, RawValue,
};
use crate::config::GradingPolicy;
use crate::error::GradeError;
use crate::registry::TERMINAL_COMPONENT_NAME;
use crate::store::{authorize_class, ClassInfo, Enrollment, FinalGradeRecord, GradeStore, ScoreTable};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodGrades {
    pub preliminary: PeriodBreakdown,
    pub mid_term: PeriodBreakdown,
    pub pre_final: PeriodBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGrades {
    pub grading_mode: GradingMode,
    /// Only present for three-period classes.
    pub periods: Option<PeriodGrades>,
    pub final_grade: Option<f64>,
    pub equivalence: Equivalence,
    pub remarks: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentReport {
    pub enrollment_id: String,
    pub student_name: String,
    #[serde(flatten)]
    pub grades: StudentGrades,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassReport {
    pub class: ClassInfo,
    pub components: Vec<GradeComponent>,
    pub students: Vec<StudentReport>,
}

/// Slice of the score table belonging to one enrollment, keyed by component id.
pub fn scores_for(table: &ScoreTable, enrollment_id: &str) -> HashMap<String, RawValue> {
    table
        .iter()
        .filter(|((e, _), _)| e == enrollment_id)
        .map(|((_, c), v)| (c.clone(), v.clone()))
        .collect()
}

fn terminal_value(components: &[GradeComponent], scores: &HashMap<String, RawValue>) -> Option<f64> {
    components
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(TERMINAL_COMPONENT_NAME))
        .and_then(|c| scores.get(&c.id))
        .and_then(RawValue::as_number)
}

/// Period grades, final grade and its equivalents for one student. The
/// grading mode comes from the class, never from the shape of the scores.
pub fn compute_student_grades(
    class: &ClassInfo,
    components: &[GradeComponent],
    scores: &HashMap<String, RawValue>,
    policy: &GradingPolicy,
) -> StudentGrades {
    match class.grading_mode {
        GradingMode::ThreePeriod => {
            let [prelim, mid, pre_final] =
                Period::ALL.map(|p| compute_period_grade(components, scores, p, policy.empty_bucket));
            let final_grade = compute_final_grade(prelim.grade, mid.grade, pre_final.grade);
            let equivalence = resolve_equivalence(Some(final_grade));
            let remarks = equivalence.description.clone();
            StudentGrades {
                grading_mode: class.grading_mode,
                periods: Some(PeriodGrades {
                    preliminary: prelim,
                    mid_term: mid,
                    pre_final,
                }),
                final_grade: Some(final_grade),
                equivalence,
                remarks,
            }
        }
        GradingMode::Terminal => {
            let final_grade = terminal_value(components, scores).map(terminal_final_grade);
            StudentGrades {
                grading_mode: class.grading_mode,
                periods: None,
                final_grade,
                equivalence: resolve_equivalence(final_grade),
                remarks: terminal_remarks(final_grade).to_string(),
            }
        }
    }
}

pub fn final_record(class_id: &str, enrollment_id: &str, grades: &StudentGrades) -> FinalGradeRecord {
    FinalGradeRecord {
        enrollment_id: enrollment_id.to_string(),
        class_id: class_id.to_string(),
        overall_final_grade: grades.final_grade,
        remarks: grades.remarks.clone(),
    }
}

/// Text form of a cached final grade as written to the history ledger.
pub fn final_grade_text(grade: Option<f64>) -> String {
    match grade {
        Some(g) => format!("{:.2}", g),
        None => String::new(),
    }
}

fn build_reports(
    store: &dyn GradeStore,
    class: &ClassInfo,
    components: &[GradeComponent],
    enrollments: &[Enrollment],
    policy: &GradingPolicy,
) -> Result<Vec<StudentReport>, GradeError> {
    let enrollment_ids: Vec<String> = enrollments.iter().map(|e| e.id.clone()).collect();
    let component_ids: Vec<String> = components.iter().map(|c| c.id.clone()).collect();
    let table = store.load_scores(&enrollment_ids, &component_ids)?;
    Ok(enrollments
        .iter()
        .map(|e| StudentReport {
            enrollment_id: e.id.clone(),
            student_name: e.student_name.clone(),
            grades: compute_student_grades(class, components, &scores_for(&table, &e.id), policy),
        })
        .collect())
}

pub fn student_report(
    store: &dyn GradeStore,
    policy: &GradingPolicy,
    teacher_id: &str,
    class_id: &str,
    enrollment_id: &str,
) -> Result<StudentReport, GradeError> {
    let class = authorize_class(store, class_id, teacher_id)?;
    let enrollment = store
        .load_enrollments(class_id)?
        .into_iter()
        .find(|e| e.id == enrollment_id)
        .ok_or(GradeError::NotFound("enrollment"))?;
    let components = store.load_components(class_id)?;
    let mut reports = build_reports(store, &class, &components, &[enrollment], policy)?;
    reports.pop().ok_or(GradeError::NotFound("enrollment"))
}

pub fn class_report(
    store: &dyn GradeStore,
    policy: &GradingPolicy,
    teacher_id: &str,
    class_id: &str,
) -> Result<ClassReport, GradeError> {
    let class = authorize_class(store, class_id, teacher_id)?;
    let components = store.load_components(class_id)?;
    let enrollments = store.load_enrollments(class_id)?;
    let students = build_reports(store, &class, &components, &enrollments, policy)?;
    Ok(ClassReport {
        class,
        components,
        students,
    })
}
