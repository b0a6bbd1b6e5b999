//! Per-series bookkeeping of when new episodes last appeared.
//!
//! Records never block downloads. They only produce advisories that suggest
//! marking a long-quiet series as complete.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ItemId;

pub const DEFAULT_STALE_DAYS: u32 = 365;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub checks_without_new_episode: u32,
    #[serde(default)]
    pub last_new_episode_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StalenessAdvisory {
    pub series: ItemId,
    pub name: String,
    pub days_since_new_episode: i64,
    pub checks_without_new_episode: u32,
}

impl StalenessAdvisory {
    pub fn message(&self) -> String {
        format!(
            "\"{}\" has had no new episodes for {} days (checked {} times); consider `mark-complete {}`",
            self.name, self.days_since_new_episode, self.checks_without_new_episode, self.series
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StalenessTracker {
    records: BTreeMap<ItemId, SeriesRecord>,
}

impl StalenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, series: &ItemId) -> Option<&SeriesRecord> {
        self.records.get(series)
    }

    /// Folds one check of `series` into its record and reports whether the
    /// series now looks stale.
    pub fn observe(
        &mut self,
        series: &ItemId,
        name: &str,
        new_episode_count: usize,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Option<StalenessAdvisory> {
        let record = self.records.entry(series.clone()).or_default();
        if !name.is_empty() {
            record.name = Some(name.to_string());
        }
        if new_episode_count > 0 {
            record.checks_without_new_episode = 0;
            record.last_new_episode_at = Some(now);
        } else {
            record.checks_without_new_episode = record.checks_without_new_episode.saturating_add(1);
        }
        self.advisory_for(series, now, threshold)
    }

    /// Read-only staleness check, used by dry runs and the status report.
    pub fn advisory_for(
        &self,
        series: &ItemId,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Option<StalenessAdvisory> {
        let record = self.records.get(series)?;
        let last = record.last_new_episode_at?;
        let elapsed = now.signed_duration_since(last);
        if elapsed < threshold {
            return None;
        }
        Some(StalenessAdvisory {
            series: series.clone(),
            name: record
                .name
                .clone()
                .unwrap_or_else(|| series.slug().to_string()),
            days_since_new_episode: elapsed.num_days(),
            checks_without_new_episode: record.checks_without_new_episode,
        })
    }

    pub fn advisories(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> impl Iterator<Item = StalenessAdvisory> + '_ {
        self.records
            .keys()
            .filter_map(move |series| self.advisory_for(series, now, threshold))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub fn threshold_from_days(days: u32) -> Duration {
    Duration::days(i64::from(days))
}
