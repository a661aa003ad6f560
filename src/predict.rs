use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::fetch::UsableAssessment;
use crate::model::{PredictionEntry, WeightedGradePrediction};

#[derive(Debug, Clone, Serialize)]
pub struct PredictError {
    pub code: String,
    pub message: String,
}

impl PredictError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Weight-normalized mean over the usable assessments of one subject.
///
/// The mean uses only the weights actually available; it is NOT scaled up
/// to a 100-weight total. `total_weight` rides along so callers can judge
/// completeness. Entry order is preserved into the breakdown.
pub fn weighted_prediction(
    entries: &[UsableAssessment],
) -> Result<WeightedGradePrediction, PredictError> {
    let total_weight: f64 = entries.iter().map(|e| e.weighting).sum();
    if total_weight <= 0.0 {
        return Err(PredictError::new(
            "no_usable_data",
            "no released assessments with both a grade and a weighting",
        ));
    }

    let weighted_sum: f64 = entries.iter().map(|e| e.weighting * e.grade).sum();
    let assessments = entries
        .iter()
        .map(|e| PredictionEntry {
            title: e.title.clone(),
            weighting: e.weighting,
            grade: e.grade,
        })
        .collect::<Vec<_>>();

    Ok(WeightedGradePrediction {
        predicted_grade: weighted_sum / total_weight,
        assessments_count: assessments.len(),
        total_weight,
        assessments,
    })
}

/// Fixed ordinal scale over the predicted percentage.
pub fn letter_grade(percentage: f64) -> &'static str {
    if percentage >= 90.0 {
        "A+"
    } else if percentage >= 85.0 {
        "A"
    } else if percentage >= 80.0 {
        "A-"
    } else if percentage >= 75.0 {
        "B+"
    } else if percentage >= 70.0 {
        "B"
    } else if percentage >= 65.0 {
        "B-"
    } else if percentage >= 60.0 {
        "C+"
    } else if percentage >= 50.0 {
        "C-"
    } else if percentage >= 40.0 {
        "D"
    } else {
        "E"
    }
}

/// Content fingerprint of the inputs a prediction was computed from.
///
/// Hashes the `(id, grade, weighting)` tuples sorted by id, with floats
/// encoded bit-exactly, so identical inputs always produce the same
/// fingerprint and any grade or weighting change produces a new one. A
/// cached prediction whose stored fingerprint differs from the current
/// inputs' fingerprint is stale.
pub fn inputs_fingerprint(entries: &[UsableAssessment]) -> String {
    let mut tuples: Vec<(i64, u64, u64)> = entries
        .iter()
        .map(|e| (e.id, e.grade.to_bits(), e.weighting.to_bits()))
        .collect();
    tuples.sort_unstable();

    let mut hasher = Sha256::new();
    for (id, grade_bits, weight_bits) in tuples {
        hasher.update(id.to_be_bytes());
        hasher.update(grade_bits.to_be_bytes());
        hasher.update(weight_bits.to_be_bytes());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
