use serde_json::Map;

use crate::calc::{GradeComponent, GradingMode, Period};
use crate::error::GradeError;
use crate::store::{authorize_class, authorize_component, ClassInfo, GradeStore};

pub const PRELIM_ATTENDANCE_NAME: &str = "Preliminary-Attendance";
pub const MIDTERM_ATTENDANCE_NAME: &str = "Mid-Term-Attendance";
/// Synthetic component that carries the single entered grade of a terminal-score class.
pub const TERMINAL_COMPONENT_NAME: &str = "Pre-Final Grade";

/// (name, period, locked by default)
const ATTENDANCE_COMPONENTS: &[(&str, Period, bool)] = &[
    (PRELIM_ATTENDANCE_NAME, Period::Preliminary, false),
    (MIDTERM_ATTENDANCE_NAME, Period::MidTerm, true),
];

const ATTENDANCE_MAX_SCORE: f64 = 100.0;
const TERMINAL_MAX_SCORE: f64 = 100.0;

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentDraft {
    pub name: String,
    pub period: Option<Period>,
    pub max_score: f64,
    pub weight: f64,
    pub is_attendance_based: bool,
}

/// Fields a teacher may change on an existing component. `period: Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentPatch {
    pub name: Option<String>,
    pub period: Option<Option<Period>>,
    pub max_score: Option<f64>,
    pub weight: Option<f64>,
    pub is_attendance_based: Option<bool>,
}

fn parse_period_value(v: &serde_json::Value) -> Result<Option<Period>, GradeError> {
    if v.is_null() {
        return Ok(None);
    }
    let Some(s) = v.as_str() else {
        return Err(GradeError::bad_params("period must be a string or null"));
    };
    if s.trim().is_empty() {
        return Ok(None);
    }
    Period::parse(s)
        .map(Some)
        .ok_or_else(|| GradeError::bad_params(format!("unknown period: {}", s)))
}

fn validate_name(name: &str) -> Result<String, GradeError> {
    let t = name.trim();
    if t.is_empty() {
        return Err(GradeError::bad_params("name must not be empty"));
    }
    Ok(t.to_string())
}

fn validate_number(key: &str, v: f64) -> Result<f64, GradeError> {
    if !v.is_finite() || v < 0.0 {
        return Err(GradeError::bad_params(format!("{} must be a number >= 0", key)));
    }
    Ok(v)
}

impl ComponentDraft {
    pub fn from_params(params: &serde_json::Value) -> Result<ComponentDraft, GradeError> {
        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GradeError::bad_params("missing name"))?;
        let max_score = params
            .get("maxScore")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| GradeError::bad_params("missing maxScore"))?;
        let period = match params.get("period") {
            Some(v) => parse_period_value(v)?,
            None => None,
        };
        let weight = match params.get("weight") {
            None | Some(serde_json::Value::Null) => 0.0,
            Some(v) => v
                .as_f64()
                .ok_or_else(|| GradeError::bad_params("weight must be a number"))?,
        };
        if !(0.0..=100.0).contains(&weight) {
            return Err(GradeError::bad_params("weight must be between 0 and 100"));
        }
        Ok(ComponentDraft {
            name: validate_name(name)?,
            period,
            max_score: validate_number("maxScore", max_score)?,
            weight,
            is_attendance_based: params
                .get("isAttendanceBased")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        })
    }
}

impl ComponentPatch {
    pub fn from_params(patch: &Map<String, serde_json::Value>) -> Result<ComponentPatch, GradeError> {
        let mut out = ComponentPatch::default();
        for (key, value) in patch {
            match key.as_str() {
                "name" => {
                    let s = value
                        .as_str()
                        .ok_or_else(|| GradeError::bad_params("patch.name must be a string"))?;
                    out.name = Some(validate_name(s)?);
                }
                "period" => out.period = Some(parse_period_value(value)?),
                "maxScore" => {
                    let v = value
                        .as_f64()
                        .ok_or_else(|| GradeError::bad_params("patch.maxScore must be a number"))?;
                    out.max_score = Some(validate_number("maxScore", v)?);
                }
                "weight" => {
                    let v = value
                        .as_f64()
                        .ok_or_else(|| GradeError::bad_params("patch.weight must be a number"))?;
                    if !(0.0..=100.0).contains(&v) {
                        return Err(GradeError::bad_params("weight must be between 0 and 100"));
                    }
                    out.weight = Some(v);
                }
                "isAttendanceBased" => {
                    let v = value.as_bool().ok_or_else(|| {
                        GradeError::bad_params("patch.isAttendanceBased must be a boolean")
                    })?;
                    out.is_attendance_based = Some(v);
                }
                other => {
                    return Err(GradeError::bad_params(format!(
                        "unknown patch field: {}",
                        other
                    )))
                }
            }
        }
        Ok(out)
    }
}

fn next_sort_order(components: &[GradeComponent]) -> i64 {
    components
        .iter()
        .map(|c| c.sort_order)
        .max()
        .map(|m| m + 1)
        .unwrap_or(0)
}

fn insert_new(
    store: &dyn GradeStore,
    class_id: &str,
    draft: ComponentDraft,
    is_locked: bool,
    sort_order: i64,
) -> Result<GradeComponent, GradeError> {
    let component = GradeComponent {
        id: uuid::Uuid::new_v4().to_string(),
        class_id: class_id.to_string(),
        name: draft.name,
        period: draft.period,
        max_score: draft.max_score,
        weight: draft.weight,
        is_attendance_based: draft.is_attendance_based,
        is_locked,
        sort_order,
    };
    store.insert_component(&component)?;
    Ok(component)
}

pub fn list_components(
    store: &dyn GradeStore,
    teacher_id: &str,
    class_id: &str,
) -> Result<Vec<GradeComponent>, GradeError> {
    authorize_class(store, class_id, teacher_id)?;
    store.load_components(class_id)
}

pub fn create_component(
    store: &dyn GradeStore,
    teacher_id: &str,
    class_id: &str,
    draft: ComponentDraft,
) -> Result<(GradeComponent, ClassInfo), GradeError> {
    let class = authorize_class(store, class_id, teacher_id)?;
    let existing = store.load_components(class_id)?;
    let component = insert_new(store, class_id, draft, false, next_sort_order(&existing))?;
    Ok((component, class))
}

fn is_terminal_component(class: &ClassInfo, component: &GradeComponent) -> bool {
    class.grading_mode == GradingMode::Terminal && component.name.eq_ignore_ascii_case(TERMINAL_COMPONENT_NAME)
}

/// Applies `patch` and returns the updated component together with its class,
/// so callers can refresh cached final grades.
pub fn update_component(
    store: &dyn GradeStore,
    teacher_id: &str,
    component_id: &str,
    patch: ComponentPatch,
) -> Result<(GradeComponent, ClassInfo), GradeError> {
    let (mut component, class) = authorize_component(store, component_id, teacher_id)?;
    // Terminal grades are read from this component by name.
    if is_terminal_component(&class, &component)
        && patch
            .name
            .as_deref()
            .is_some_and(|n| !n.eq_ignore_ascii_case(TERMINAL_COMPONENT_NAME))
    {
        return Err(GradeError::bad_params(format!(
            "the {} component of a terminal class cannot be renamed",
            TERMINAL_COMPONENT_NAME
        )));
    }
    if let Some(name) = patch.name {
        component.name = name;
    }
    if let Some(period) = patch.period {
        component.period = period;
    }
    if let Some(max_score) = patch.max_score {
        component.max_score = max_score;
    }
    if let Some(weight) = patch.weight {
        component.weight = weight;
    }
    if let Some(flag) = patch.is_attendance_based {
        component.is_attendance_based = flag;
    }
    store.update_component(&component)?;
    Ok((component, class))
}

pub fn delete_component(
    store: &dyn GradeStore,
    teacher_id: &str,
    component_id: &str,
) -> Result<ClassInfo, GradeError> {
    let (component, class) = authorize_component(store, component_id, teacher_id)?;
    if is_terminal_component(&class, &component) {
        return Err(GradeError::bad_params(format!(
            "the {} component of a terminal class cannot be deleted",
            TERMINAL_COMPONENT_NAME
        )));
    }
    store.delete_component(&component.id)?;
    tracing::info!(component_id, class_id = %class.id, "component deleted");
    Ok(class)
}

/// Creates the components every attendance-graded class needs, when missing:
/// the two attendance slots (prelim open, midterm locked) and, for terminal
/// classes, the single "Pre-Final Grade" component. Returns what was created.
pub fn ensure_virtual_components(
    store: &dyn GradeStore,
    class: &ClassInfo,
) -> Result<Vec<GradeComponent>, GradeError> {
    let mut existing = store.load_components(&class.id)?;
    let mut created = Vec::new();

    let mut wanted: Vec<(ComponentDraft, bool)> = ATTENDANCE_COMPONENTS
        .iter()
        .map(|(name, period, locked)| {
            (
                ComponentDraft {
                    name: name.to_string(),
                    period: Some(*period),
                    max_score: ATTENDANCE_MAX_SCORE,
                    weight: 0.0,
                    is_attendance_based: true,
                },
                *locked,
            )
        })
        .collect();
    if class.grading_mode == GradingMode::Terminal {
        wanted.push((
            ComponentDraft {
                name: TERMINAL_COMPONENT_NAME.to_string(),
                period: Some(Period::PreFinal),
                max_score: TERMINAL_MAX_SCORE,
                weight: 0.0,
                is_attendance_based: false,
            },
            false,
        ));
    }

    for (draft, locked) in wanted {
        if existing.iter().any(|c| c.name.eq_ignore_ascii_case(&draft.name)) {
            continue;
        }
        let component = insert_new(store, &class.id, draft, locked, next_sort_order(&existing))?;
        existing.push(component.clone());
        created.push(component);
    }
    Ok(created)
}

pub fn ensure_attendance_components(
    store: &dyn GradeStore,
    teacher_id: &str,
    class_id: &str,
) -> Result<Vec<GradeComponent>, GradeError> {
    let class = authorize_class(store, class_id, teacher_id)?;
    ensure_virtual_components(store, &class)
}
