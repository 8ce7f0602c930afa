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

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn str_field(value: &serde_json::Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", pointer, value))
        .to_string()
}


fn read_raw_line(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, line: &str) -> serde_json::Value {
    writeln!(stdin, "{}", line).expect("write line");
    stdin.flush().expect("flush line");
    let mut out = String::new();
    reader.read_line(&mut out).expect("read response line");
    serde_json::from_str(out.trim()).expect("parse response json")
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("gradebook-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["workspacePath"].is_null());

    let blocked = request(
        &mut stdin,
        &mut reader,
        "2",
        "classes.list",
        json!({ "teacherId": "t1" }),
    );
    assert_eq!(error_code(&blocked), "no_workspace");

    // Stateless, works before a workspace is chosen.
    let eq = request_ok(&mut stdin, &mut reader, "3", "grades.equivalence", json!({ "grade": 74.9 }));
    assert_eq!(eq, json!({ "point": "0.00", "description": "Failed" }));
    let eq = request_ok(&mut stdin, &mut reader, "4", "grades.equivalence", json!({ "grade": null }));
    assert_eq!(eq["point"].as_str(), Some("NGS"));

    let unknown = request(&mut stdin, &mut reader, "5", "grades.teleport", json!({}));
    assert_eq!(error_code(&unknown), "not_implemented");

    let bad = read_raw_line(&mut stdin, &mut reader, "{not json");
    assert_eq!(bad["ok"].as_bool(), Some(false));
    assert_eq!(bad["error"]["code"].as_str(), Some("bad_json"));

    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "classes.create",
        json!({ "teacherId": "t1", "name": "Smoke Class" }),
    );
    let class_id = str_field(&created, "/classId");

    let listed = request_ok(&mut stdin, &mut reader, "8", "classes.list", json!({ "teacherId": "t1" }));
    assert_eq!(listed["classes"].as_array().map(|a| a.len()), Some(1));
    let others = request_ok(&mut stdin, &mut reader, "9", "classes.list", json!({ "teacherId": "t2" }));
    assert_eq!(others["classes"], json!([]));

    let enrolled = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "enrollments.add",
        json!({ "classId": class_id, "studentName": "Smoke, Student" }),
    );
    let enrollment_id = str_field(&enrolled, "/enrollmentId");
    let enrollments = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "enrollments.list",
        json!({ "classId": class_id }),
    );
    assert_eq!(enrollments["enrollments"][0]["id"].as_str(), Some(enrollment_id.as_str()));

    let missing = request(
        &mut stdin,
        &mut reader,
        "12",
        "components.create",
        json!({ "teacherId": "t1", "classId": class_id, "name": "Quiz" }),
    );
    assert_eq!(error_code(&missing), "bad_params");
    let bad_period = request(
        &mut stdin,
        &mut reader,
        "13",
        "components.create",
        json!({ "teacherId": "t1", "classId": class_id, "name": "Quiz", "maxScore": 10, "period": "Finals" }),
    );
    assert_eq!(error_code(&bad_period), "bad_params");
    let created_component = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "components.create",
        json!({ "teacherId": "t1", "classId": class_id, "name": "Quiz", "maxScore": 10, "weight": 20 }),
    );
    let component_id = str_field(&created_component, "/component/id");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "components.update",
        json!({ "teacherId": "t1", "componentId": component_id, "patch": { "name": "Quiz 1" } }),
    );
    let bad_patch = request(
        &mut stdin,
        &mut reader,
        "16",
        "components.update",
        json!({ "teacherId": "t1", "componentId": component_id, "patch": { "isLocked": true } }),
    );
    assert_eq!(error_code(&bad_patch), "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "locks.toggle",
        json!({ "teacherId": "t1", "componentId": component_id, "desiredLocked": true }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "grades.saveBatch",
        json!({ "teacherId": "t1", "classId": class_id, "scores": {} }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "19",
        "grades.classReport",
        json!({ "teacherId": "t1", "classId": class_id }),
    );
    let missing_student = request(
        &mut stdin,
        &mut reader,
        "20",
        "grades.studentReport",
        json!({ "teacherId": "t1", "classId": class_id, "enrollmentId": "nobody" }),
    );
    assert_eq!(error_code(&missing_student), "not_found");
    let bad_group = request(
        &mut stdin,
        &mut reader,
        "21",
        "history.list",
        json!({ "teacherId": "t1", "classId": class_id, "enrollmentId": enrollment_id, "groupBy": "week" }),
    );
    assert_eq!(error_code(&bad_group), "bad_params");
    let _ = request_ok(&mut stdin, &mut reader, "22", "settings.getPolicy", json!({ "teacherId": "t1" }));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "23",
        "components.delete",
        json!({ "teacherId": "t1", "componentId": component_id }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
