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
    let exe = env!("CARGO_BIN_EXE_gradesd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradesd");
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

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value.get("error").cloned().expect("error object")
}

fn mat101_params() -> serde_json::Value {
    json!({
        "subjectCode": "MAT101",
        "assessments": [
            { "id": 1, "code": "MAT101", "title": "Algebra Test", "metaclassID": 7 },
            { "id": 2, "code": "MAT101", "title": "Exam", "metaclassID": 7 }
        ],
        "records": {
            "1": { "marked": true, "weighting": 30.0, "results": { "percentage": 80.0 } },
            "2": { "marked": true, "weighting": 70.0, "results": { "percentage": 90.0 } }
        }
    })
}

#[test]
fn mat101_weighted_prediction_end_to_end() {
    let workspace = temp_dir("gradesd-compute-flow");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "predictions.compute",
        mat101_params(),
    );

    let prediction = result.get("prediction").expect("prediction");
    let grade = prediction
        .get("predictedGrade")
        .and_then(|v| v.as_f64())
        .expect("predictedGrade");
    assert!((grade - 87.0).abs() < 1e-9, "got {}", grade);
    assert_eq!(
        prediction.get("totalWeight").and_then(|v| v.as_f64()),
        Some(100.0)
    );
    assert_eq!(
        prediction.get("assessmentsCount").and_then(|v| v.as_u64()),
        Some(2)
    );
    assert_eq!(result.get("letterGrade").and_then(|v| v.as_str()), Some("A"));
    assert_eq!(result.get("cached").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        result.get("cacheWriteOk").and_then(|v| v.as_bool()),
        Some(true)
    );

    // Breakdown preserves the stub order.
    let titles: Vec<&str> = prediction
        .get("assessments")
        .and_then(|v| v.as_array())
        .expect("assessments array")
        .iter()
        .map(|a| a.get("title").and_then(|v| v.as_str()).expect("title"))
        .collect();
    assert_eq!(titles, vec!["Algebra Test", "Exam"]);

    let outcomes = result.get("outcomes").expect("outcomes");
    assert_eq!(outcomes.get("included").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(
        outcomes.get("skippedFetchError").and_then(|v| v.as_u64()),
        Some(0)
    );

    let _ = child.kill();
}

#[test]
fn eng201_without_weighting_fails_and_writes_nothing() {
    let workspace = temp_dir("gradesd-no-usable-data");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let error = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "predictions.compute",
        json!({
            "subjectCode": "ENG201",
            "assessments": [
                { "id": 10, "code": "ENG201", "title": "Essay", "metaclassID": 3 }
            ],
            "records": {
                "10": { "marked": true, "results": { "percentage": 72.0 } }
            }
        }),
    );
    assert_eq!(
        error.get("code").and_then(|v| v.as_str()),
        Some("no_usable_data")
    );
    let details = error.get("details").expect("error details");
    let outcomes = details.get("outcomes").expect("outcome counts in details");
    assert_eq!(
        outcomes.get("skippedNoWeight").and_then(|v| v.as_u64()),
        Some(1)
    );
    let skipped = details
        .get("skipped")
        .and_then(|v| v.as_array())
        .expect("skipped detail");
    assert_eq!(skipped.len(), 1);
    assert_eq!(
        skipped[0].get("reason").and_then(|v| v.as_str()),
        Some("no_weight")
    );

    // Nothing was cached for the failed subject.
    let load = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "predictions.load",
        json!({ "subjectCode": "ENG201" }),
    );
    assert_eq!(load.get("present").and_then(|v| v.as_bool()), Some(false));

    let _ = child.kill();
}

#[test]
fn per_item_failures_do_not_abort_the_batch() {
    let workspace = temp_dir("gradesd-failure-isolation");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "predictions.compute",
        json!({
            "subjectCode": "SCI303",
            "assessments": [
                { "id": 1, "code": "SCI303", "title": "Prac", "metaclassID": 2 },
                { "id": 2, "code": "SCI303", "title": "Report", "metaclassID": 2 },
                { "id": 3, "code": "SCI303", "title": "Test", "metaclassID": 2 },
                { "id": 4, "code": "SCI303", "title": "Quiz", "metaclassID": 2 }
            ],
            "records": {
                "1": { "marked": true, "weighting": 25.0, "results": { "percentage": 60.0 } },
                "2": { "error": "timeout" },
                "3": { "marked": false, "weighting": 25.0 }
                // id 4 has no record at all
            }
        }),
    );

    let prediction = result.get("prediction").expect("prediction");
    assert_eq!(
        prediction.get("assessmentsCount").and_then(|v| v.as_u64()),
        Some(1)
    );
    assert_eq!(
        prediction.get("totalWeight").and_then(|v| v.as_f64()),
        Some(25.0)
    );
    let outcomes = result.get("outcomes").expect("outcomes");
    assert_eq!(outcomes.get("included").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(
        outcomes.get("skippedFetchError").and_then(|v| v.as_u64()),
        Some(2)
    );
    assert_eq!(
        outcomes.get("skippedNoGrade").and_then(|v| v.as_u64()),
        Some(1)
    );
    let skipped = result
        .get("skipped")
        .and_then(|v| v.as_array())
        .expect("skipped detail");
    let reasons: Vec<&str> = skipped
        .iter()
        .map(|s| s.get("reason").and_then(|v| v.as_str()).expect("reason"))
        .collect();
    assert_eq!(reasons, vec!["fetch_error", "no_grade", "fetch_error"]);
    assert_eq!(
        skipped[0].get("kind").and_then(|v| v.as_str()),
        Some("timeout")
    );
    assert_eq!(
        skipped[2].get("kind").and_then(|v| v.as_str()),
        Some("missing")
    );

    let _ = child.kill();
}

#[test]
fn compute_without_workspace_is_rejected() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let error = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "predictions.compute",
        mat101_params(),
    );
    assert_eq!(
        error.get("code").and_then(|v| v.as_str()),
        Some("no_workspace")
    );

    let _ = child.kill();
}
