use crate::error::GradeError;
use crate::ipc::helpers::{get_optional_str, get_optional_usize, get_required_str, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, GroupBy, HistoryEntry};
use crate::store::{authorize_class, SqliteStore};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRow<'a> {
    #[serde(flatten)]
    entry: &'a HistoryEntry,
    old_value_display: &'a str,
}

fn rows(entries: &[HistoryEntry]) -> Vec<HistoryRow<'_>> {
    entries
        .iter()
        .map(|entry| HistoryRow {
            entry,
            old_value_display: entry.old_value_display(),
        })
        .collect()
}

fn history_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, GradeError> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let class_id = get_required_str(params, "classId")?;
    let enrollment_id = get_required_str(params, "enrollmentId")?;
    let limit = get_optional_usize(params, "limit")?;
    let group_by = match get_optional_str(params, "groupBy")? {
        None => None,
        Some(raw) => Some(
            GroupBy::parse(&raw)
                .ok_or_else(|| GradeError::bad_params(format!("unknown groupBy: {}", raw)))?,
        ),
    };

    let store = SqliteStore::new(conn);
    authorize_class(&store, &class_id, &teacher_id)?;
    let entries = ledger::history(&store, &enrollment_id, &class_id, limit)?;

    let Some(by) = group_by else {
        return Ok(json!({ "entries": rows(&entries) }));
    };
    let groups: Vec<serde_json::Value> = ledger::group_history(entries, by)
        .iter()
        .map(|g| {
            json!({
                "key": g.key,
                "label": g.label,
                "entries": rows(&g.entries)
            })
        })
        .collect();
    Ok(json!({ "groups": groups }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "history.list" => Some(with_conn(state, req, history_list)),
        _ => None,
    }
}
