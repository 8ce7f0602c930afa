use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::EmptyBucketPolicy;

pub const CLASS_STANDING_WEIGHT: f64 = 0.60;
pub const EXAM_WEIGHT: f64 = 0.40;

pub const PRELIM_WEIGHT: f64 = 0.30;
pub const MIDTERM_WEIGHT: f64 = 0.30;
pub const PREFINAL_WEIGHT: f64 = 0.40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "Preliminary")]
    Preliminary,
    #[serde(rename = "Mid-Term")]
    MidTerm,
    #[serde(rename = "Pre-Final")]
    PreFinal,
}

impl Period {
    pub const ALL: [Period; 3] = [Period::Preliminary, Period::MidTerm, Period::PreFinal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Preliminary => "Preliminary",
            Period::MidTerm => "Mid-Term",
            Period::PreFinal => "Pre-Final",
        }
    }

    /// Accepts the display labels plus the short forms teachers type
    /// ("prelim", "midterm", "prefinal"), case-insensitive.
    pub fn parse(raw: &str) -> Option<Period> {
        let key: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "preliminary" | "prelim" => Some(Period::Preliminary),
            "midterm" => Some(Period::MidTerm),
            "prefinal" => Some(Period::PreFinal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GradingMode {
    #[default]
    ThreePeriod,
    Terminal,
}

impl GradingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GradingMode::ThreePeriod => "three_period",
            GradingMode::Terminal => "terminal",
        }
    }

    pub fn parse(raw: &str) -> Option<GradingMode> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "three_period" | "threeperiod" => Some(GradingMode::ThreePeriod),
            "terminal" => Some(GradingMode::Terminal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeComponent {
    pub id: String,
    pub class_id: String,
    pub name: String,
    pub period: Option<Period>,
    pub max_score: f64,
    /// Informational only; aggregation never reads it.
    pub weight: f64,
    pub is_attendance_based: bool,
    pub is_locked: bool,
    pub sort_order: i64,
}

/// One stored cell of the score grid.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Number(f64),
    /// Attendance marks ("A", "NA") or any other text a teacher typed.
    Mark(String),
    Blank,
}

impl RawValue {
    pub fn parse(raw: &str) -> RawValue {
        let t = raw.trim();
        if t.is_empty() {
            return RawValue::Blank;
        }
        match t.parse::<f64>() {
            Ok(v) if v.is_finite() => RawValue::Number(v),
            _ => RawValue::Mark(t.to_string()),
        }
    }

    /// `None` for JSON shapes that cannot be a cell value (arrays, objects, bools).
    pub fn from_json(v: &serde_json::Value) -> Option<RawValue> {
        match v {
            serde_json::Value::Null => Some(RawValue::Blank),
            serde_json::Value::Number(n) => n.as_f64().map(RawValue::Number),
            serde_json::Value::String(s) => Some(RawValue::parse(s)),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            RawValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Canonical text form used for storage and for old/new comparison in the ledger.
    pub fn to_stored(&self) -> String {
        match self {
            RawValue::Number(v) => format_score(*v),
            RawValue::Mark(s) => s.clone(),
            RawValue::Blank => String::new(),
        }
    }
}

pub fn format_score(v: f64) -> String {
    // Normalize -0 so "0" and "-0" never register as a change.
    let v = if v == 0.0 { 0.0 } else { v };
    format!("{}", v)
}

/// Half-away-from-zero rounding to 2 decimals, applied to the decimal value
/// the float stands for: 1.005 becomes 1.01 even though its binary form sits
/// just below the midpoint.
pub fn round2(x: f64) -> f64 {
    let scaled = x * 100.0;
    // Snap to 15 significant digits first to drop binary representation error.
    let snapped = format!("{:.14e}", scaled).parse::<f64>().unwrap_or(scaled);
    snapped.round() / 100.0
}

pub fn clamp_score(v: f64, max_score: f64) -> f64 {
    v.clamp(0.0, max_score.max(0.0))
}

/// Exam vs class-standing classification. Name-based on purpose: any
/// component whose name contains "exam" (which also covers "examination")
/// lands in the exam bucket.
pub fn is_exam_component(name: &str) -> bool {
    name.to_ascii_lowercase().contains("exam")
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Bucket {
    achieved: f64,
    possible: f64,
    present: bool,
}

impl Bucket {
    fn add(&mut self, achieved: f64, possible: f64) {
        self.achieved += achieved;
        self.possible += possible;
        self.present = true;
    }

    fn percent(&self) -> Option<f64> {
        if self.present && self.possible > 0.0 {
            Some(100.0 * self.achieved / self.possible)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodBreakdown {
    pub class_standing_pct: f64,
    pub exam_pct: f64,
    pub has_class_standing: bool,
    pub has_exam: bool,
    pub grade: f64,
}

/// Period grade on a 0-100 scale, rounded to 2 decimals, together with the
/// bucket percentages it was built from.
pub fn compute_period_grade(
    components: &[GradeComponent],
    scores: &HashMap<String, RawValue>,
    period: Period,
    empty_bucket: EmptyBucketPolicy,
) -> PeriodBreakdown {
    let mut standing = Bucket::default();
    let mut exam = Bucket::default();

    for c in components.iter().filter(|c| c.period == Some(period)) {
        if c.max_score <= 0.0 {
            continue;
        }
        let raw = scores.get(&c.id);
        let achieved = match raw.and_then(RawValue::as_number) {
            Some(v) => v,
            // Non-numeric attendance marks are left out of both totals.
            None if c.is_attendance_based => continue,
            None => 0.0,
        };
        let achieved = clamp_score(achieved, c.max_score);
        if is_exam_component(&c.name) {
            exam.add(achieved, c.max_score);
        } else {
            standing.add(achieved, c.max_score);
        }
    }

    let class_standing_pct = standing.percent().unwrap_or(0.0);
    let exam_pct = exam.percent().unwrap_or(0.0);

    let weighted = match empty_bucket {
        EmptyBucketPolicy::CountAsZero => {
            CLASS_STANDING_WEIGHT * class_standing_pct + EXAM_WEIGHT * exam_pct
        }
        EmptyBucketPolicy::Renormalize => match (standing.present, exam.present) {
            (true, true) => CLASS_STANDING_WEIGHT * class_standing_pct + EXAM_WEIGHT * exam_pct,
            (true, false) => class_standing_pct,
            (false, true) => exam_pct,
            (false, false) => 0.0,
        },
    };

    PeriodBreakdown {
        class_standing_pct: round2(class_standing_pct),
        exam_pct: round2(exam_pct),
        has_class_standing: standing.present,
        has_exam: exam.present,
        grade: round2(weighted),
    }
}

pub fn compute_final_grade(prelim: f64, midterm: f64, prefinal: f64) -> f64 {
    round2(PRELIM_WEIGHT * prelim + MIDTERM_WEIGHT * midterm + PREFINAL_WEIGHT * prefinal)
}

/// Terminal-score classes carry the final grade as a single entered value.
pub fn terminal_final_grade(value: f64) -> f64 {
    round2(value)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Equivalence {
    pub point: String,
    pub description: String,
}

pub const NO_GRADE_POINT: &str = "NGS";
pub const NO_GRADE_DESCRIPTION: &str = "No Grade Yet";

const EQUIVALENCE_TABLE: &[(f64, &str, &str)] = &[
    (99.0, "4.00", "Excellent"),
    (97.0, "3.75", "Excellent"),
    (95.0, "3.50", "Outstanding"),
    (92.0, "3.25", "Outstanding"),
    (90.0, "3.00", "Very Satisfactory"),
    (88.0, "2.75", "Very Satisfactory"),
    (86.0, "2.50", "Very Satisfactory"),
    (84.0, "2.25", "Satisfactory"),
    (82.0, "2.00", "Satisfactory"),
    (80.0, "1.75", "Satisfactory"),
    (78.0, "1.50", "Fair"),
    (76.0, "1.25", "Fair"),
    (75.0, "1.00", "Passed"),
    (0.0, "0.00", "Failed"),
];

const REMARKS_TABLE: &[(f64, &str)] = &[
    (97.0, "Excellent"),
    (92.0, "Outstanding"),
    (86.0, "Very Satisfactory"),
    (80.0, "Satisfactory"),
    (76.0, "Fair"),
    (75.0, "Passed"),
    (0.0, "Failed"),
];

/// Point/description lookup. Thresholds are inclusive lower bounds, first match wins.
pub fn resolve_equivalence(grade: Option<f64>) -> Equivalence {
    if let Some(g) = grade.filter(|g| g.is_finite()) {
        for (floor, point, description) in EQUIVALENCE_TABLE {
            if g >= *floor {
                return Equivalence {
                    point: point.to_string(),
                    description: description.to_string(),
                };
            }
        }
    }
    Equivalence {
        point: NO_GRADE_POINT.to_string(),
        description: NO_GRADE_DESCRIPTION.to_string(),
    }
}

/// Coarser descriptions used as remarks for terminal-score classes.
pub fn terminal_remarks(grade: Option<f64>) -> &'static str {
    if let Some(g) = grade.filter(|g| g.is_finite()) {
        for (floor, description) in REMARKS_TABLE {
            if g >= *floor {
                return *description;
            }
        }
    }
    NO_GRADE_DESCRIPTION
}
