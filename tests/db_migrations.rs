use rusqlite::Connection;
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn str_field(value: &serde_json::Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", pointer, value))
        .to_string()
}


fn column_names(conn: &Connection, table: &str) -> Vec<String> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", table))
        .expect("prepare table_info");
    stmt.query_map([], |r| r.get::<_, String>(1))
        .expect("query table_info")
        .collect::<Result<Vec<_>, _>>()
        .expect("collect columns")
}

#[test]
fn workspace_from_before_grading_modes_is_upgraded_in_place() {
    let workspace = temp_dir("gradebook-db-migration");
    let db_path = workspace.join("gradebook.sqlite3");
    {
        let conn = Connection::open(&db_path).expect("create old db");
        conn.execute_batch(
            "CREATE TABLE classes(id TEXT PRIMARY KEY, teacher_id TEXT NOT NULL, name TEXT NOT NULL);
             CREATE TABLE enrollments(id TEXT PRIMARY KEY, class_id TEXT NOT NULL, student_name TEXT NOT NULL, sort_order INTEGER NOT NULL);
             CREATE TABLE raw_scores(
               id TEXT PRIMARY KEY,
               enrollment_id TEXT NOT NULL,
               component_id TEXT NOT NULL,
               value TEXT NOT NULL,
               UNIQUE(enrollment_id, component_id)
             );
             INSERT INTO classes(id, teacher_id, name) VALUES('c-old', 't1', 'Legacy Class');
             INSERT INTO enrollments(id, class_id, student_name, sort_order) VALUES('e-old', 'c-old', 'Old, Student', 0);",
        )
        .expect("old schema");
    }

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "2", "classes.list", json!({ "teacherId": "t1" }));
    assert_eq!(listed["classes"][0]["id"].as_str(), Some("c-old"));
    assert_eq!(listed["classes"][0]["gradingMode"].as_str(), Some("three_period"));
    assert_eq!(listed["classes"][0]["enrollmentCount"].as_i64(), Some(1));

    let component = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "components.create",
        json!({ "teacherId": "t1", "classId": "c-old", "name": "Quiz", "period": "Preliminary", "maxScore": 10 }),
    );
    let component_id = str_field(&component, "/component/id");
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.saveBatch",
        json!({ "teacherId": "t1", "classId": "c-old", "scores": { "e-old": { component_id.clone(): 7 } } }),
    );
    assert_eq!(saved["savedCount"].as_u64(), Some(1));

    drop(stdin);
    let _ = child.wait();

    let conn = Connection::open(&db_path).expect("reopen db");
    assert!(column_names(&conn, "classes").contains(&"grading_mode".to_string()));
    assert!(column_names(&conn, "raw_scores").contains(&"updated_at".to_string()));
    let updated_at: Option<String> = conn
        .query_row(
            "SELECT updated_at FROM raw_scores WHERE enrollment_id = 'e-old'",
            [],
            |r| r.get(0),
        )
        .expect("score row");
    assert!(updated_at.is_some());
    drop(conn);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn history_rows_cannot_be_rewritten() {
    let workspace = temp_dir("gradebook-db-append-only");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    drop(stdin);
    let _ = child.wait();

    let conn = Connection::open(workspace.join("gradebook.sqlite3")).expect("open db");
    conn.execute(
        "INSERT INTO grade_history(id, enrollment_id, class_id, teacher_id, grade_type, new_value, created_at)
         VALUES('h1', 'e1', 'c1', 't1', 'Quiz', '10', '2026-01-01T00:00:00.000000Z')",
        [],
    )
    .expect("append");
    assert!(conn
        .execute("UPDATE grade_history SET new_value = '11' WHERE id = 'h1'", [])
        .is_err());
    assert!(conn.execute("DELETE FROM grade_history WHERE id = 'h1'", []).is_err());
    let value: String = conn
        .query_row("SELECT new_value FROM grade_history WHERE id = 'h1'", [], |r| r.get(0))
        .expect("row");
    assert_eq!(value, "10");
    drop(conn);

    let _ = std::fs::remove_dir_all(workspace);
}
