use std::sync::{Arc, Mutex, PoisonError};

/// One recorded step outcome.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct StepRecord {
    label: String,
    passed: bool,
    note: Option<String>,
}

impl StepRecord {
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.passed
    }

    #[must_use]
    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }
}

/// Ordered step outcomes of one scenario, shared by every session it drives.
#[derive(Debug, Clone, Default)]
pub struct StepLog {
    records: Arc<Mutex<Vec<StepRecord>>>,
}

impl StepLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, label: impl Into<String>, passed: bool, note: Option<String>) {
        self.lock().push(StepRecord {
            label: label.into(),
            passed,
            note,
        });
    }

    /// Snapshot of every record in order.
    #[must_use]
    pub fn records(&self) -> Vec<StepRecord> {
        self.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// First failing step, if any.
    #[must_use]
    pub fn first_failure(&self) -> Option<StepRecord> {
        self.lock().iter().find(|record| !record.passed).cloned()
    }

    /// Most recent failing step, if any.
    #[must_use]
    pub fn last_failure(&self) -> Option<StepRecord> {
        self.lock().iter().rev().find(|record| !record.passed).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<StepRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn first_and_last_failures_are_found_in_order() {
        let steps = StepLog::new();
        steps.record("connect", true, None);
        steps.record("write major", false, Some("timed out".to_string()));
        steps.record("write minor", false, None);

        assert_eq!(Some("write major"), steps.first_failure().as_ref().map(StepRecord::label));
        assert_eq!(Some("write minor"), steps.last_failure().as_ref().map(StepRecord::label));
        assert_eq!(3, steps.len());
    }
}
