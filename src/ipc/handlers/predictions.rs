use crate::cache;
use crate::fetch::{gather_usable, AssessmentOutcome, OutcomeCounts, RecordBatchSource};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::Assessment;
use crate::predict::{inputs_fingerprint, letter_grade, weighted_prediction};
use rusqlite::Connection;
use serde_json::json;

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn parse_assessments(req: &Request) -> Result<Vec<Assessment>, serde_json::Value> {
    let Some(raw) = req.params.get("assessments") else {
        return Err(err(&req.id, "bad_params", "missing assessments", None));
    };
    serde_json::from_value(raw.clone()).map_err(|e| {
        err(
            &req.id,
            "bad_params",
            format!("invalid assessments: {}", e),
            None,
        )
    })
}

fn parse_records(req: &Request) -> Result<serde_json::Map<String, serde_json::Value>, serde_json::Value> {
    let Some(raw) = req.params.get("records") else {
        return Err(err(&req.id, "bad_params", "missing records", None));
    };
    raw.as_object().cloned().ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "records must be an object keyed by assessment id",
            None,
        )
    })
}

/// Per-item skip reasons, so the UI can tell "no data existed" from
/// "fetch broke" without parsing logs.
fn skipped_detail(outcomes: &[AssessmentOutcome]) -> Vec<serde_json::Value> {
    outcomes
        .iter()
        .filter_map(|o| match o {
            AssessmentOutcome::Included { .. } => None,
            AssessmentOutcome::SkippedNoGrade { id } => {
                Some(json!({ "id": id, "reason": "no_grade" }))
            }
            AssessmentOutcome::SkippedNoWeight { id } => {
                Some(json!({ "id": id, "reason": "no_weight" }))
            }
            AssessmentOutcome::SkippedFetchError { id, kind } => {
                Some(json!({ "id": id, "reason": "fetch_error", "kind": kind.as_str() }))
            }
        })
        .collect()
}

fn handle_compute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let subject_code = match required_str(req, "subjectCode") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let stubs = match parse_assessments(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let records = match parse_records(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // Single-flight per subject code; released on every exit path below.
    let Some(_guard) = state.inflight.try_begin(&subject_code) else {
        return err(
            &req.id,
            "calculation_in_flight",
            format!("a calculation for {} is already running", subject_code),
            None,
        );
    };

    let subject_stubs: Vec<Assessment> = stubs
        .into_iter()
        .filter(|a| a.code == subject_code)
        .collect();

    let source = RecordBatchSource::new(&records);
    let (usable, outcomes) = gather_usable(&subject_stubs, &source);
    let counts = OutcomeCounts::tally(&outcomes);
    let skipped = skipped_detail(&outcomes);

    let prediction = match weighted_prediction(&usable) {
        Ok(p) => p,
        Err(e) => {
            return err(
                &req.id,
                &e.code,
                e.message,
                Some(json!({ "outcomes": counts, "skipped": skipped })),
            );
        }
    };
    let fingerprint = inputs_fingerprint(&usable);

    // Serve the cached prediction when its inputs haven't changed.
    let cached = match cache::load_if_current(conn, &subject_code, &fingerprint) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(subject_code = %subject_code, error = %e, "cache read failed, recomputing");
            None
        }
    };
    if let Some(entry) = cached {
        let letter = letter_grade(entry.prediction.predicted_grade);
        // No write happened on this request, so no cacheWriteOk field.
        return ok(
            &req.id,
            json!({
                "subjectCode": subject_code,
                "prediction": entry.prediction,
                "letterGrade": letter,
                "fingerprint": entry.fingerprint,
                "outcomes": counts,
                "skipped": skipped,
                "cached": true,
            }),
        );
    }

    // Best-effort write: a failed save is logged and the prediction is
    // still returned for this session.
    let cache_write_ok = match cache::save(conn, &subject_code, &fingerprint, &prediction) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(subject_code = %subject_code, error = %e, "cache write failed");
            false
        }
    };

    let letter = letter_grade(prediction.predicted_grade);
    ok(
        &req.id,
        json!({
            "subjectCode": subject_code,
            "prediction": prediction,
            "letterGrade": letter,
            "fingerprint": fingerprint,
            "outcomes": counts,
            "skipped": skipped,
            "cached": false,
            "cacheWriteOk": cache_write_ok,
        }),
    )
}

fn handle_load(state: &mut AppState, req: &Request) -> serde_json::Value {
    let subject_code = match required_str(req, "subjectCode") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // Read failure is treated the same as absence.
    let entry = match cache::load(conn, &subject_code) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(subject_code = %subject_code, error = %e, "cache read failed, treating as absent");
            None
        }
    };
    let Some(entry) = entry else {
        return ok(&req.id, json!({ "present": false }));
    };

    // When the caller supplies current inputs, a fingerprint mismatch is
    // reported as absence so the caller recomputes.
    let has_inputs = req.params.get("assessments").is_some() || req.params.get("records").is_some();
    if has_inputs {
        let stubs = match parse_assessments(req) {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let records = match parse_records(req) {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let subject_stubs: Vec<Assessment> = stubs
            .into_iter()
            .filter(|a| a.code == subject_code)
            .collect();
        let source = RecordBatchSource::new(&records);
        let (usable, _outcomes) = gather_usable(&subject_stubs, &source);
        if inputs_fingerprint(&usable) != entry.fingerprint {
            tracing::debug!(subject_code = %subject_code, "cached prediction is stale");
            return ok(&req.id, json!({ "present": false, "stale": true }));
        }
    }

    let letter = letter_grade(entry.prediction.predicted_grade);
    ok(
        &req.id,
        json!({
            "present": true,
            "prediction": entry.prediction,
            "letterGrade": letter,
            "fingerprint": entry.fingerprint,
            "updatedAt": entry.updated_at,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "predictions.compute" => Some(handle_compute(state, req)),
        "predictions.load" => Some(handle_load(state, req)),
        _ => None,
    }
}
