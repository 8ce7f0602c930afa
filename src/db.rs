use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("gradebook.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            name TEXT NOT NULL,
            grading_mode TEXT NOT NULL DEFAULT 'three_period'
        )",
        [],
    )?;
    ensure_classes_grading_mode(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_teacher ON classes(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_name TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_class ON enrollments(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_components(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            period TEXT,
            max_score REAL NOT NULL,
            weight REAL NOT NULL DEFAULT 0,
            is_attendance_based INTEGER NOT NULL DEFAULT 0,
            is_locked INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_components_class ON grade_components(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS raw_scores(
            id TEXT PRIMARY KEY,
            enrollment_id TEXT NOT NULL,
            component_id TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id),
            FOREIGN KEY(component_id) REFERENCES grade_components(id),
            UNIQUE(enrollment_id, component_id)
        )",
        [],
    )?;
    ensure_raw_scores_updated_at(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_raw_scores_component ON raw_scores(component_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS final_grades(
            enrollment_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            overall_final_grade REAL,
            remarks TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(enrollment_id, class_id),
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;

    // No foreign key on component_id: history outlives deleted components.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_history(
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            enrollment_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            component_id TEXT,
            grade_type TEXT NOT NULL,
            old_value TEXT,
            new_value TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_history_student
         ON grade_history(enrollment_id, class_id, created_at)",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS grade_history_no_update
         BEFORE UPDATE ON grade_history
         BEGIN SELECT RAISE(ABORT, 'grade_history is append-only'); END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS grade_history_no_delete
         BEFORE DELETE ON grade_history
         BEGIN SELECT RAISE(ABORT, 'grade_history is append-only'); END",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_classes_grading_mode(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "classes", "grading_mode")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE classes ADD COLUMN grading_mode TEXT NOT NULL DEFAULT 'three_period'",
        [],
    )?;
    Ok(())
}

fn ensure_raw_scores_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "raw_scores", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE raw_scores ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}
