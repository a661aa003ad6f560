use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// At most one computation per subject code at a time.
///
/// Check-and-insert happens atomically under the lock; the returned guard
/// releases the code on drop, so failures release it too.
#[derive(Debug, Default, Clone)]
pub struct InFlight {
    codes: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the subject code, or `None` if a computation for it is
    /// already running.
    pub fn try_begin(&self, subject_code: &str) -> Option<InFlightGuard> {
        let mut codes = self.codes.lock().unwrap_or_else(|e| e.into_inner());
        if !codes.insert(subject_code.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            codes: Arc::clone(&self.codes),
            subject_code: subject_code.to_string(),
        })
    }

    #[allow(dead_code)]
    pub fn is_in_flight(&self, subject_code: &str) -> bool {
        self.codes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(subject_code)
    }
}

pub struct InFlightGuard {
    codes: Arc<Mutex<HashSet<String>>>,
    subject_code: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.codes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.subject_code);
    }
}
