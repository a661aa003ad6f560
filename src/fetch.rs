use serde::Serialize;
use serde_json::Value;

use crate::model::Assessment;

/// Per-item retrieval failure. The shipped source reads host-supplied
/// record batches, so transport failures arrive as error markers; an
/// in-process HTTP source would produce the same variants itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchError {
    /// No record was supplied for the assessment id.
    Missing,
    Timeout,
    Network,
    /// The record exists but is not a usable JSON object.
    Malformed,
}

impl FetchError {
    pub fn as_str(self) -> &'static str {
        match self {
            FetchError::Missing => "missing",
            FetchError::Timeout => "timeout",
            FetchError::Network => "network",
            FetchError::Malformed => "malformed",
        }
    }
}

/// Retrieval boundary for full assessment detail records.
pub trait AssessmentSource {
    fn fetch_detail(&self, id: i64, metaclass_id: i64) -> Result<Value, FetchError>;
}

/// Source backed by a host-supplied batch of raw detail records keyed by
/// assessment id. The host owns the portal session and reports per-item
/// transport failures as `{"error": "timeout"}`-style markers.
pub struct RecordBatchSource<'a> {
    records: &'a serde_json::Map<String, Value>,
}

impl<'a> RecordBatchSource<'a> {
    pub fn new(records: &'a serde_json::Map<String, Value>) -> Self {
        Self { records }
    }
}

impl AssessmentSource for RecordBatchSource<'_> {
    fn fetch_detail(&self, id: i64, _metaclass_id: i64) -> Result<Value, FetchError> {
        let Some(record) = self.records.get(&id.to_string()) else {
            return Err(FetchError::Missing);
        };
        let Some(obj) = record.as_object() else {
            return Err(FetchError::Malformed);
        };
        if let Some(kind) = obj.get("error").and_then(|v| v.as_str()) {
            return Err(match kind {
                "timeout" => FetchError::Timeout,
                "network" => FetchError::Network,
                _ => FetchError::Network,
            });
        }
        Ok(record.clone())
    }
}

/// What happened to each stub during the gather pass. Kept explicit so
/// callers and tests can tell "no data existed" from "fetch broke".
#[derive(Debug, Clone, PartialEq)]
pub enum AssessmentOutcome {
    Included { id: i64 },
    SkippedNoGrade { id: i64 },
    SkippedNoWeight { id: i64 },
    SkippedFetchError { id: i64, kind: FetchError },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeCounts {
    pub included: usize,
    pub skipped_no_grade: usize,
    pub skipped_no_weight: usize,
    pub skipped_fetch_error: usize,
}

impl OutcomeCounts {
    pub fn tally(outcomes: &[AssessmentOutcome]) -> Self {
        let mut counts = OutcomeCounts::default();
        for o in outcomes {
            match o {
                AssessmentOutcome::Included { .. } => counts.included += 1,
                AssessmentOutcome::SkippedNoGrade { .. } => counts.skipped_no_grade += 1,
                AssessmentOutcome::SkippedNoWeight { .. } => counts.skipped_no_weight += 1,
                AssessmentOutcome::SkippedFetchError { .. } => counts.skipped_fetch_error += 1,
            }
        }
        counts
    }
}

/// An assessment that cleared all the gates: released, marked, with a
/// numeric result and a valid weighting.
#[derive(Debug, Clone, PartialEq)]
pub struct UsableAssessment {
    pub id: i64,
    pub title: String,
    pub weighting: f64,
    pub grade: f64,
}

fn valid_weighting(w: f64) -> bool {
    w.is_finite() && w > 0.0 && w <= 100.0
}

/// Released numeric result, preferring the nested criterion result over
/// the top-level one when both are present.
pub fn extract_released_grade(record: &Value) -> Option<f64> {
    if !record.get("marked").and_then(|v| v.as_bool()).unwrap_or(false) {
        return None;
    }
    if let Some(criteria) = record.get("criteria").and_then(|v| v.as_array()) {
        for c in criteria {
            if let Some(p) = c
                .get("results")
                .and_then(|r| r.get("percentage"))
                .and_then(|v| v.as_f64())
            {
                return Some(p);
            }
        }
    }
    record
        .get("results")
        .and_then(|r| r.get("percentage"))
        .and_then(|v| v.as_f64())
}

/// Weighting percentage from the record metadata: top-level `weighting`
/// first, else the first criterion carrying one. Out-of-range or missing
/// weightings exclude the assessment; they are never defaulted.
pub fn extract_weighting(record: &Value) -> Option<f64> {
    if let Some(w) = record.get("weighting").and_then(|v| v.as_f64()) {
        if valid_weighting(w) {
            return Some(w);
        }
    }
    if let Some(criteria) = record.get("criteria").and_then(|v| v.as_array()) {
        for c in criteria {
            if let Some(w) = c.get("weighting").and_then(|v| v.as_f64()) {
                if valid_weighting(w) {
                    return Some(w);
                }
            }
        }
    }
    None
}

/// Fetch every stub's detail record and keep the usable ones, preserving
/// stub order. One stub's failure never aborts the batch.
pub fn gather_usable(
    stubs: &[Assessment],
    source: &dyn AssessmentSource,
) -> (Vec<UsableAssessment>, Vec<AssessmentOutcome>) {
    let mut usable = Vec::new();
    let mut outcomes = Vec::with_capacity(stubs.len());

    for stub in stubs {
        let record = match source.fetch_detail(stub.id, stub.metaclass_id) {
            Ok(v) => v,
            Err(kind) => {
                outcomes.push(AssessmentOutcome::SkippedFetchError { id: stub.id, kind });
                continue;
            }
        };
        let Some(grade) = extract_released_grade(&record) else {
            outcomes.push(AssessmentOutcome::SkippedNoGrade { id: stub.id });
            continue;
        };
        let Some(weighting) = extract_weighting(&record) else {
            outcomes.push(AssessmentOutcome::SkippedNoWeight { id: stub.id });
            continue;
        };
        outcomes.push(AssessmentOutcome::Included { id: stub.id });
        usable.push(UsableAssessment {
            id: stub.id,
            title: stub.title.clone(),
            weighting,
            grade,
        });
    }

    (usable, outcomes)
}
