//! Append-only grade change history.
//!
//! Entries are only written when a value actually changes, are never
//! updated or deleted (the table carries triggers that abort both), and read
//! back newest first.

use serde::{Deserialize, Serialize};

use crate::error::GradeError;
use crate::store::GradeStore;

/// Label written for changes to the cached final grade.
pub const FINAL_GRADE_LABEL: &str = "Final Grade";

/// How consumers render an `old_value` of `None`.
pub const INITIAL_VALUE_TEXT: &str = "initial value";

#[derive(Debug, Clone, Copy)]
pub struct NewHistoryEntry<'a> {
    pub enrollment_id: &'a str,
    pub class_id: &'a str,
    pub teacher_id: &'a str,
    pub component_id: Option<&'a str>,
    pub grade_type: &'a str,
    pub old_value: Option<&'a str>,
    pub new_value: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub enrollment_id: String,
    pub class_id: String,
    pub teacher_id: String,
    pub component_id: Option<String>,
    pub grade_type: String,
    pub old_value: Option<String>,
    pub new_value: String,
    pub timestamp: String,
}

impl HistoryEntry {
    pub fn old_value_display(&self) -> &str {
        self.old_value.as_deref().unwrap_or(INITIAL_VALUE_TEXT)
    }
}

/// Appends `entry` unless old and new compare equal as strings.
/// Returns the stored entry, or `None` for a no-op.
pub fn record(store: &dyn GradeStore, entry: &NewHistoryEntry<'_>) -> Result<Option<HistoryEntry>, GradeError> {
    if entry.old_value == Some(entry.new_value) {
        return Ok(None);
    }
    store.append_history(entry).map(Some)
}

pub fn history(
    store: &dyn GradeStore,
    enrollment_id: &str,
    class_id: &str,
    limit: Option<usize>,
) -> Result<Vec<HistoryEntry>, GradeError> {
    store.load_history(enrollment_id, class_id, limit)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Component,
    Label,
}

impl GroupBy {
    pub fn parse(raw: &str) -> Option<GroupBy> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "component" => Some(GroupBy::Component),
            "label" | "grade_type" | "gradetype" => Some(GroupBy::Label),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryGroup {
    pub key: String,
    pub label: String,
    pub entries: Vec<HistoryEntry>,
}

/// Groups entries that are already ordered newest first. Groups appear in
/// order of their newest entry and keep the input order inside each group.
pub fn group_history(entries: Vec<HistoryEntry>, by: GroupBy) -> Vec<HistoryGroup> {
    let mut groups: Vec<HistoryGroup> = Vec::new();
    for e in entries {
        let key = match by {
            GroupBy::Component => e
                .component_id
                .clone()
                .unwrap_or_else(|| format!("label:{}", e.grade_type)),
            GroupBy::Label => e.grade_type.clone(),
        };
        match groups.iter_mut().find(|g| g.key == key) {
            Some(g) => g.entries.push(e),
            None => groups.push(HistoryGroup {
                key,
                label: e.grade_type.clone(),
                entries: vec![e],
            }),
        }
    }
    groups
}
