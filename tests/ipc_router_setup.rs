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
    let exe = env!("CARGO_BIN_EXE_santrid");
    let mut child = Command::new(exe)
        .env_remove("SANTRID_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn santrid");
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
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn str_field(value: &serde_json::Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, value))
        .to_string()
}

#[test]
fn router_answers_without_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    let classes = request_ok(&mut stdin, &mut reader, "2", "classes.list", json!({}));
    assert_eq!(classes.get("classes"), Some(&json!([])));

    let perform = request(
        &mut stdin,
        &mut reader,
        "3",
        "promotion.perform",
        json!({ "academicYear": "2024/2025", "decisions": [] }),
    );
    assert_eq!(
        perform.pointer("/error/code").and_then(|v| v.as_str()),
        Some("no_workspace")
    );

    let unknown = request(&mut stdin, &mut reader, "4", "grades.rank", json!({}));
    assert_eq!(
        unknown.pointer("/error/code").and_then(|v| v.as_str()),
        Some("not_implemented")
    );

    // Malformed lines get an id-less error and the loop keeps going.
    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json response");
    let bad: serde_json::Value = serde_json::from_str(line.trim()).expect("parse bad_json");
    assert_eq!(bad.pointer("/error/code").and_then(|v| v.as_str()), Some("bad_json"));

    let _ = request_ok(&mut stdin, &mut reader, "5", "health", json!({}));
}

#[test]
fn promotion_setup_supplies_default_academic_year() {
    let workspace = temp_dir("santri-setup-promotion");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let defaults = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(
        defaults.pointer("/promotion/strictAcademicYear"),
        Some(&json!(true))
    );
    assert_eq!(
        defaults.pointer("/promotion/currentAcademicYear"),
        Some(&serde_json::Value::Null)
    );

    let missing = request(
        &mut stdin,
        &mut reader,
        "3",
        "promotion.unprocessed",
        json!({}),
    );
    assert_eq!(
        missing.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "promotion", "patch": { "currentAcademicYear": "2024 - 2025" } }),
    );
    assert_eq!(
        updated.pointer("/value/currentAcademicYear").and_then(|v| v.as_str()),
        Some("2024/2025")
    );

    let pending = request_ok(&mut stdin, &mut reader, "5", "promotion.unprocessed", json!({}));
    assert_eq!(
        pending.get("academicYear").and_then(|v| v.as_str()),
        Some("2024/2025")
    );

    let rejected = request(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({ "section": "promotion", "patch": { "currentAcademicYear": "Genap" } }),
    );
    assert_eq!(
        rejected.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );

    let lenient = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "setup.update",
        json!({
            "section": "promotion",
            "patch": { "strictAcademicYear": false, "currentAcademicYear": "Genap 2024" }
        }),
    );
    assert_eq!(
        lenient.pointer("/value/currentAcademicYear").and_then(|v| v.as_str()),
        Some("Genap 2024")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "setup.update",
        json!({ "section": "school", "patch": { "name": "Pondok Pesantren Al-Hikmah" } }),
    );
    let health = request_ok(&mut stdin, &mut reader, "9", "health", json!({}));
    assert_eq!(
        health.get("schoolName").and_then(|v| v.as_str()),
        Some("Pondok Pesantren Al-Hikmah")
    );

    let unknown = request(
        &mut stdin,
        &mut reader,
        "10",
        "setup.update",
        json!({ "section": "school", "patch": { "motto": "x" } }),
    );
    assert_eq!(
        unknown.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );

    // Promotion fields are unknown to the school section, whatever their value.
    let foreign = request(
        &mut stdin,
        &mut reader,
        "11",
        "setup.update",
        json!({ "section": "school", "patch": { "strictAcademicYear": "x" } }),
    );
    assert_eq!(
        foreign.pointer("/error/message").and_then(|v| v.as_str()),
        Some("unknown school field: strictAcademicYear")
    );

    let _ = std::fs::remove_dir_all(workspace);
}
