use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::model::{Assessment, Subject, WeightedGradePrediction};

/// One subject row of the overview: display metadata, the assessments
/// filed under it, and its prediction when one exists.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectGroup {
    pub code: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colour: Option<String>,
    pub metaclass: i64,
    pub assessments: Vec<Assessment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<WeightedGradePrediction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub letter_grade: Option<String>,
    pub expanded: bool,
}

/// Stable partition of assessments under their subjects.
///
/// Every assessment lands under exactly the subject whose code matches;
/// orphans (no matching subject) are dropped and subjects with no
/// assessments are excluded. Subject order and per-subject assessment
/// order both follow input order.
pub fn group_by_subject(subjects: &[Subject], assessments: &[Assessment]) -> Vec<SubjectGroup> {
    let mut by_code: HashMap<&str, Vec<Assessment>> = HashMap::new();
    let known: HashSet<&str> = subjects.iter().map(|s| s.code.as_str()).collect();
    for a in assessments {
        if known.contains(a.code.as_str()) {
            by_code.entry(a.code.as_str()).or_default().push(a.clone());
        }
    }

    let mut out = Vec::new();
    for s in subjects {
        let Some(list) = by_code.remove(s.code.as_str()) else {
            continue;
        };
        out.push(SubjectGroup {
            code: s.code.clone(),
            title: s.title.clone(),
            colour: s.colour.clone(),
            metaclass: s.metaclass,
            assessments: list,
            prediction: None,
            letter_grade: None,
            expanded: false,
        });
    }
    out
}

/// Expand/collapse flags for the per-subject breakdown. Display state
/// only; it never touches the data model or the cache.
#[derive(Debug, Default)]
pub struct ExpandState {
    expanded: HashSet<String>,
}

impl ExpandState {
    pub fn is_expanded(&self, subject_code: &str) -> bool {
        self.expanded.contains(subject_code)
    }

    pub fn toggle(&mut self, subject_code: &str) -> bool {
        if self.expanded.remove(subject_code) {
            false
        } else {
            self.expanded.insert(subject_code.to_string());
            true
        }
    }
}
