//! Per-item failure history and the bounded-retry state machine.
//!
//! An item is `Healthy` while it has no record, `Failing(n)` after `n`
//! consecutive failed runs, and `Permanent` once `n` reaches
//! [`PERMANENT_AFTER_RUNS`]. Only a success or an operator editing the ledger
//! file clears a record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ItemId;

/// Number of failed runs after which an item is abandoned.
pub const PERMANENT_AFTER_RUNS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    #[serde(default)]
    pub consecutive_run_failures: u32,
    #[serde(default)]
    pub permanent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureState {
    Healthy,
    Failing(u32),
    Permanent,
}

impl FailureRecord {
    pub fn state(&self) -> FailureState {
        if self.permanent {
            FailureState::Permanent
        } else if self.consecutive_run_failures == 0 {
            FailureState::Healthy
        } else {
            FailureState::Failing(self.consecutive_run_failures)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorLedger {
    records: BTreeMap<ItemId, FailureRecord>,
}

impl ErrorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, id: &ItemId) -> FailureState {
        self.records
            .get(id)
            .map(FailureRecord::state)
            .unwrap_or(FailureState::Healthy)
    }

    pub fn is_permanent(&self, id: &ItemId) -> bool {
        matches!(self.state(id), FailureState::Permanent)
    }

    pub fn get(&self, id: &ItemId) -> Option<&FailureRecord> {
        self.records.get(id)
    }

    /// Records one failed run (initial attempt and immediate retry both
    /// failed) and returns the resulting state.
    ///
    /// A permanent record is left untouched.
    pub fn record_failure(
        &mut self,
        id: &ItemId,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) -> FailureState {
        let record = self
            .records
            .entry(id.clone())
            .or_insert_with(|| FailureRecord {
                consecutive_run_failures: 0,
                permanent: false,
                last_error: None,
                last_failure: None,
            });
        if record.permanent {
            return FailureState::Permanent;
        }
        record.consecutive_run_failures += 1;
        record.last_error = Some(message.into());
        record.last_failure = Some(at);
        if record.consecutive_run_failures >= PERMANENT_AFTER_RUNS {
            record.permanent = true;
        }
        record.state()
    }

    /// Drops the record for `id`. Returns whether anything was removed.
    pub fn record_success(&mut self, id: &ItemId) -> bool {
        self.records.remove(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ItemId, &FailureRecord)> {
        self.records.iter()
    }

    pub fn permanent_ids(&self) -> impl Iterator<Item = &ItemId> {
        self.records
            .iter()
            .filter(|(_, record)| record.permanent)
            .map(|(id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> ItemId {
        value.parse().unwrap()
    }

    #[test]
    fn escalates_on_third_failed_run() {
        let mut ledger = ErrorLedger::new();
        let item = id("A");
        let now = Utc::now();

        assert_eq!(ledger.state(&item), FailureState::Healthy);
        assert_eq!(ledger.record_failure(&item, "exit 1", now), FailureState::Failing(1));
        assert_eq!(ledger.record_failure(&item, "exit 1", now), FailureState::Failing(2));
        assert!(!ledger.is_permanent(&item));
        assert_eq!(ledger.record_failure(&item, "exit 1", now), FailureState::Permanent);
        assert!(ledger.is_permanent(&item));
        assert_eq!(ledger.get(&item).unwrap().consecutive_run_failures, 3);
    }

    #[test]
    fn permanent_is_terminal() {
        let mut ledger = ErrorLedger::new();
        let item = id("A");
        let now = Utc::now();
        for _ in 0..3 {
            ledger.record_failure(&item, "exit 1", now);
        }
        assert_eq!(ledger.record_failure(&item, "exit 2", now), FailureState::Permanent);
        assert_eq!(ledger.get(&item).unwrap().consecutive_run_failures, 3);
        assert_eq!(ledger.get(&item).unwrap().last_error.as_deref(), Some("exit 1"));
    }

    #[test]
    fn success_clears_history() {
        let mut ledger = ErrorLedger::new();
        let item = id("A");
        ledger.record_failure(&item, "exit 1", Utc::now());
        assert!(ledger.record_success(&item));
        assert_eq!(ledger.state(&item), FailureState::Healthy);
        assert!(ledger.is_empty());
        assert!(!ledger.record_success(&item));
    }

    #[test]
    fn hand_edited_record_without_metadata_parses() {
        let raw = r#"{"A": {"consecutive_run_failures": 2, "permanent": false}, "B": {"permanent": true}}"#;
        let ledger: ErrorLedger = serde_json::from_str(raw).unwrap();
        assert_eq!(ledger.state(&id("A")), FailureState::Failing(2));
        assert_eq!(ledger.state(&id("B")), FailureState::Permanent);
        assert_eq!(ledger.permanent_ids().count(), 1);
    }

    #[test]
    fn zero_count_record_reads_as_healthy() {
        let raw = r#"{"A": {"consecutive_run_failures": 0, "permanent": false}}"#;
        let ledger: ErrorLedger = serde_json::from_str(raw).unwrap();
        assert_eq!(ledger.state(&id("A")), FailureState::Healthy);
    }
}
