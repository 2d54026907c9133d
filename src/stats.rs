//! Per-user statistics over judgment history
//!
//! Summaries are always derived from the stored judgments and never stored
//! themselves. An empty history is reported as `NoData`, which callers can
//! tell apart from a history with zero good and zero bad nights.

use crate::types::{Judgment, SleepQuality};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// How many of the most recent judgments the window covers
pub const RECENT_WINDOW: usize = 7;

/// Label counts for one calendar day of the recent window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyBreakdown {
    pub date: NaiveDate,
    pub total: usize,
    pub counts: BTreeMap<String, usize>,
}

/// The newest judgment at a glance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestJudgment {
    pub quality: SleepQuality,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSummary {
    pub total: usize,
    pub per_label_counts: BTreeMap<String, usize>,
    pub recent_window: Vec<DailyBreakdown>,
    pub feature_averages: BTreeMap<String, f64>,
    pub latest: LatestJudgment,
}

/// Output of `summarize`
#[derive(Debug, Clone, PartialEq)]
pub enum StatsOutcome {
    NoData,
    Summary(StatsSummary),
}

impl StatsOutcome {
    pub fn has_data(&self) -> bool {
        matches!(self, StatsOutcome::Summary(_))
    }

    pub fn summary(&self) -> Option<&StatsSummary> {
        match self {
            StatsOutcome::Summary(s) => Some(s),
            StatsOutcome::NoData => None,
        }
    }
}

/// `{"has_data": false}` or `{"has_data": true, ...summary}`
impl Serialize for StatsOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            has_data: bool,
            #[serde(flatten, skip_serializing_if = "Option::is_none")]
            summary: Option<&'a StatsSummary>,
        }

        Wire {
            has_data: self.has_data(),
            summary: self.summary(),
        }
        .serialize(serializer)
    }
}

fn zeroed_counts() -> BTreeMap<String, usize> {
    [SleepQuality::Good, SleepQuality::Bad]
        .iter()
        .map(|q| (q.name().to_string(), 0))
        .collect()
}

/// Summarize a user's judgment history (oldest first, as stored)
pub fn summarize(judgments: &[Judgment]) -> StatsOutcome {
    if judgments.is_empty() {
        return StatsOutcome::NoData;
    }

    let mut per_label_counts = zeroed_counts();
    for j in judgments {
        *per_label_counts.entry(j.quality.name().to_string()).or_insert(0) += 1;
    }

    // Most recent first; the sort is stable, so equal timestamps keep
    // insertion order
    let mut by_recency: Vec<(usize, &Judgment)> = judgments.iter().enumerate().collect();
    by_recency.sort_by(|(ia, a), (ib, b)| b.timestamp.cmp(&a.timestamp).then(ia.cmp(ib)));
    let window = &by_recency[..by_recency.len().min(RECENT_WINDOW)];

    let mut days: BTreeMap<NaiveDate, DailyBreakdown> = BTreeMap::new();
    for (_, j) in window {
        let date = j.timestamp.date_naive();
        let day = days.entry(date).or_insert_with(|| DailyBreakdown {
            date,
            total: 0,
            counts: zeroed_counts(),
        });
        day.total += 1;
        *day.counts.entry(j.quality.name().to_string()).or_insert(0) += 1;
    }

    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for j in judgments {
        for feature in j.features.iter() {
            let entry = sums.entry(feature.name.clone()).or_insert((0.0, 0));
            entry.0 += feature.value;
            entry.1 += 1;
        }
    }
    let feature_averages = sums
        .into_iter()
        .map(|(name, (sum, n))| (name, sum / n as f64))
        .collect();

    let newest = by_recency[0].1;

    StatsOutcome::Summary(StatsSummary {
        total: judgments.len(),
        per_label_counts,
        recent_window: days.into_values().collect(),
        feature_averages,
        latest: LatestJudgment {
            quality: newest.quality,
            timestamp: newest.timestamp,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeatureVector, Label, PredictionSource};
    use chrono::{Duration, TimeZone};

    fn judgment(day: u32, hour: u32, quality: SleepQuality, sleep: f64) -> Judgment {
        let features: FeatureVector =
            [("sleep_duration", sleep), ("stress_level", 0.5)].into_iter().collect();
        Judgment {
            id: format!("{day}-{hour}-{sleep}"),
            features,
            label: Label::Category(quality),
            quality,
            recommendations: vec!["header".to_string()],
            source: PredictionSource::Fallback,
            timestamp: Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_empty_history_is_no_data() {
        let outcome = summarize(&[]);
        assert_eq!(outcome, StatsOutcome::NoData);
        assert_eq!(serde_json::to_value(&outcome).unwrap(), serde_json::json!({"has_data": false}));
    }

    #[test]
    fn test_counts_sum_to_total() {
        let history = vec![
            judgment(1, 8, SleepQuality::Good, 8.0),
            judgment(2, 8, SleepQuality::Bad, 5.0),
            judgment(3, 8, SleepQuality::Bad, 6.0),
        ];
        let outcome = summarize(&history);
        let summary = outcome.summary().unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.per_label_counts["good"], 1);
        assert_eq!(summary.per_label_counts["bad"], 2);
        assert_eq!(summary.per_label_counts.values().sum::<usize>(), summary.total);
    }

    #[test]
    fn test_both_labels_always_present() {
        let summary = summarize(&[judgment(1, 8, SleepQuality::Good, 8.0)]);
        let summary = summary.summary().unwrap();
        assert_eq!(summary.per_label_counts["bad"], 0);
    }

    #[test]
    fn test_recent_window_is_last_seven_grouped_by_date() {
        // Ten judgments over ten days, then two more on the last day
        let mut history: Vec<Judgment> = (1..=10)
            .map(|d| judgment(d, 8, SleepQuality::Good, 7.0 + d as f64 / 10.0))
            .collect();
        history.push(judgment(10, 12, SleepQuality::Bad, 5.0));
        history.push(judgment(10, 20, SleepQuality::Bad, 4.0));

        let outcome = summarize(&history);
        let summary = outcome.summary().unwrap();
        let window_total: usize = summary.recent_window.iter().map(|d| d.total).sum();
        assert_eq!(window_total, RECENT_WINDOW);

        // Days 6..=10; day 10 holds three judgments
        let dates: Vec<u32> = summary
            .recent_window
            .iter()
            .map(|d| d.date.format("%d").to_string().parse().unwrap())
            .collect();
        assert_eq!(dates, vec![6, 7, 8, 9, 10]);
        let last = summary.recent_window.last().unwrap();
        assert_eq!(last.total, 3);
        assert_eq!(last.counts["bad"], 2);
        assert_eq!(last.counts["good"], 1);
    }

    #[test]
    fn test_window_uses_timestamps_not_insertion_order() {
        // Inserted newest first
        let history: Vec<Judgment> = (1..=9)
            .rev()
            .map(|d| judgment(d, 8, SleepQuality::Good, 8.0))
            .collect();
        let outcome = summarize(&history);
        let summary = outcome.summary().unwrap();
        let first = summary.recent_window.first().unwrap();
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2026, 3, 3).unwrap());
        assert_eq!(summary.latest.timestamp, Utc.with_ymd_and_hms(2026, 3, 9, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_timestamp_ties_keep_insertion_order() {
        let base = judgment(5, 8, SleepQuality::Good, 8.0);
        let mut history = Vec::new();
        for i in 0..9 {
            let mut j = base.clone();
            j.id = format!("tie-{i}");
            j.quality = if i < 2 { SleepQuality::Bad } else { SleepQuality::Good };
            history.push(j);
        }
        // Ties resolve to the first seven inserted: two bad, five good
        let outcome = summarize(&history);
        let summary = outcome.summary().unwrap();
        assert_eq!(summary.recent_window.len(), 1);
        assert_eq!(summary.recent_window[0].counts["bad"], 2);
        assert_eq!(summary.recent_window[0].counts["good"], 5);
        assert_eq!(summary.latest.quality, SleepQuality::Bad);
    }

    #[test]
    fn test_feature_averages_cover_full_history() {
        let history: Vec<Judgment> = (1..=10)
            .map(|d| judgment(d, 8, SleepQuality::Good, d as f64))
            .collect();
        let outcome = summarize(&history);
        let averages = &outcome.summary().unwrap().feature_averages;
        assert_eq!(averages["sleep_duration"], 5.5);
        assert_eq!(averages["stress_level"], 0.5);
    }

    #[test]
    fn test_features_missing_from_old_judgments() {
        let mut newer = judgment(2, 8, SleepQuality::Good, 8.0);
        newer.features.insert("screen_time", 0.4);
        let history = vec![judgment(1, 8, SleepQuality::Good, 6.0), newer];
        let outcome = summarize(&history);
        let averages = &outcome.summary().unwrap().feature_averages;
        assert_eq!(averages["screen_time"], 0.4);
        assert_eq!(averages["sleep_duration"], 7.0);
    }

    #[test]
    fn test_summarize_is_idempotent() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 22, 30, 0).unwrap();
        let history: Vec<Judgment> = (0..20)
            .map(|i| {
                let mut j = judgment(1, 8, SleepQuality::Good, 4.0 + (i as f64) * 0.37);
                j.timestamp = start + Duration::hours(i * 13);
                j.quality = if i % 3 == 0 { SleepQuality::Bad } else { SleepQuality::Good };
                j
            })
            .collect();
        let a = serde_json::to_string(&summarize(&history)).unwrap();
        let b = serde_json::to_string(&summarize(&history)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_summary_wire_format() {
        let outcome = summarize(&[judgment(1, 8, SleepQuality::Bad, 5.0)]);
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["has_data"], true);
        assert_eq!(value["total"], 1);
        assert_eq!(value["per_label_counts"]["bad"], 1);
        assert_eq!(value["recent_window"][0]["date"], "2026-03-01");
        assert_eq!(value["feature_averages"]["sleep_duration"], 5.0);
        assert_eq!(value["latest"]["quality"], "bad");
    }
}
