use crate::cache;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{Assessment, Subject};
use crate::predict::letter_grade;
use crate::view::group_by_subject;
use serde_json::json;

fn parse_list<T: serde::de::DeserializeOwned>(
    req: &Request,
    key: &str,
) -> Result<Vec<T>, serde_json::Value> {
    let Some(raw) = req.params.get(key) else {
        return Err(err(&req.id, "bad_params", format!("missing {}", key), None));
    };
    serde_json::from_value(raw.clone())
        .map_err(|e| err(&req.id, "bad_params", format!("invalid {}: {}", key, e), None))
}

fn handle_overview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let subjects: Vec<Subject> = match parse_list(req, "subjects") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let assessments: Vec<Assessment> = match parse_list(req, "assessments") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut groups = group_by_subject(&subjects, &assessments);
    for g in &mut groups {
        // Cached predictions only; a read failure is the same as no cache.
        let entry = match cache::load(conn, &g.code) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(subject_code = %g.code, error = %e, "cache read failed");
                None
            }
        };
        if let Some(entry) = entry {
            g.letter_grade = Some(letter_grade(entry.prediction.predicted_grade).to_string());
            g.prediction = Some(entry.prediction);
        }
        g.expanded = state.expand.is_expanded(&g.code);
    }

    ok(&req.id, json!({ "subjects": groups }))
}

fn handle_toggle_expand(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(subject_code) = req.params.get("subjectCode").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing subjectCode", None);
    };
    let expanded = state.expand.toggle(subject_code);
    ok(
        &req.id,
        json!({ "subjectCode": subject_code, "expanded": expanded }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.overview" => Some(handle_overview(state, req)),
        "subjects.toggleExpand" => Some(handle_toggle_expand(state, req)),
        _ => None,
    }
}
