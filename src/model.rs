use serde::{Deserialize, Serialize};

/// Assessment stub as listed by the portal. Release status and the actual
/// result live on the fetched detail record, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub id: i64,
    pub code: String,
    pub title: String,
    #[serde(rename = "metaclassID")]
    pub metaclass_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub code: String,
    pub title: String,
    #[serde(default)]
    pub colour: Option<String>,
    pub metaclass: i64,
}

/// One contributing line of a prediction breakdown, in display order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionEntry {
    pub title: String,
    pub weighting: f64,
    pub grade: f64,
}

/// Per-subject weighted grade prediction.
///
/// `predicted_grade` is the weight-normalized mean of the entries'
/// grades. `total_weight` is the sum of weights actually used; it can be
/// below 100 when not all of a subject's weights are known, and is never
/// zero (a zero-weight input fails before this is constructed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedGradePrediction {
    pub predicted_grade: f64,
    pub assessments_count: usize,
    pub total_weight: f64,
    pub assessments: Vec<PredictionEntry>,
}
