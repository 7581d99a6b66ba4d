//! Aggregation engine over the reconciled analytic table.
//!
//! Every computation degrades to an empty/zero/default result when a
//! required field is absent or the table is empty. Failures never
//! propagate past this module's boundary: a sub-analysis that cannot be
//! computed yields its documented default instead of aborting siblings.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::model::{AnalyticRecord, Granularity};

/// Default meeting length in minutes, used when no real duration data is
/// available for a cohort.
const DEFAULT_EVENT_DURATION_MINUTES: f64 = 30.0;

/// Absolute z-score above which a day counts as a high-activity outlier.
const OUTLIER_Z_THRESHOLD: f64 = 2.0;

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsReport {
    pub granularity: Granularity,
    pub summary: SummaryMetrics,
    pub internal_notes_analysis: BTreeMap<String, InternalNoteAnalysis>,
    pub temporal_analysis: TemporalAnalysis,
    pub conversion_analysis: ConversionAnalysis,
    pub question_analysis: QuestionAnalysis,
    pub correlation_analysis: CorrelationAnalysis,
    pub trend_analysis: TrendAnalysis,
    pub outlier_analysis: OutlierAnalysis,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryMetrics {
    pub total_events: usize,
    pub total_invitees: usize,
    pub status_distribution: BTreeMap<String, u64>,
    pub internal_note_distribution: BTreeMap<String, u64>,
    pub date_range: Option<DateRange>,
    pub avg_events_per_day: f64,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DateRange {
    pub start: String,
    pub end: String,
    /// Whole days between min and max, floored, never negative.
    pub days_span: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InternalNoteAnalysis {
    pub internal_note: String,
    pub total_events: usize,
    pub total_invitees: usize,
    pub status_distribution: BTreeMap<String, u64>,
    pub conversion_rate: f64,
    pub popular_services: BTreeMap<String, u64>,
    pub discovery_channels: BTreeMap<String, u64>,
    pub avg_event_duration: f64,
    pub peak_hours: Vec<u32>,
    pub response_time_stats: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TemporalAnalysis {
    pub hourly_distribution: BTreeMap<u32, u64>,
    pub daily_distribution: BTreeMap<String, u64>,
    pub monthly_distribution: BTreeMap<String, u64>,
    pub weekday_vs_weekend: WeekdaySplit,
    pub seasonal_trends: SeasonalTrends,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WeekdaySplit {
    pub weekday: u64,
    pub weekend: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeasonalTrends {
    pub monthly_counts: BTreeMap<String, u64>,
    pub trend: String,
}

impl Default for SeasonalTrends {
    fn default() -> Self {
        SeasonalTrends {
            monthly_counts: BTreeMap::new(),
            trend: "insufficient_data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionAnalysis {
    pub overall_conversion_rate: f64,
    pub conversion_by_internal_note: BTreeMap<String, f64>,
    pub conversion_by_service: BTreeMap<String, u64>,
    pub conversion_by_channel: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QuestionAnalysis {
    pub service_interests: ServiceInterests,
    pub discovery_channels: DiscoveryChannels,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceInterests {
    pub distribution: BTreeMap<String, u64>,
    pub top_services: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryChannels {
    pub distribution: BTreeMap<String, u64>,
    pub top_channels: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CorrelationAnalysis {
    /// Per-cohort success rate as a fraction in [0, 1].
    pub internal_note_success_rates: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendAnalysis {
    pub monthly_trends: BTreeMap<String, u64>,
    pub growth_metrics: GrowthMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrowthMetrics {
    pub growth_rate: f64,
    pub trend: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OutlierAnalysis {
    pub high_activity_days: BTreeMap<String, u64>,
    pub anomaly_detection: bool,
}

/// Computes all analysis families over one reconciled table.
pub struct AnalyticsEngine<'a> {
    granularity: Granularity,
    rows: &'a [AnalyticRecord],
}

impl<'a> AnalyticsEngine<'a> {
    pub fn new(granularity: Granularity, rows: &'a [AnalyticRecord]) -> Self {
        AnalyticsEngine { granularity, rows }
    }

    pub fn report(&self) -> AnalyticsReport {
        AnalyticsReport {
            granularity: self.granularity,
            summary: self.summary(),
            internal_notes_analysis: self.internal_notes_analysis(),
            temporal_analysis: self.temporal_analysis(),
            conversion_analysis: self.conversion_analysis(),
            question_analysis: self.question_analysis(),
            correlation_analysis: self.correlation_analysis(),
            trend_analysis: self.trend_analysis(),
            outlier_analysis: self.outlier_analysis(),
        }
    }

    fn dates(&self) -> Vec<DateTime<Utc>> {
        self.rows
            .iter()
            .filter_map(|r| r.analysis_date(self.granularity))
            .collect()
    }

    fn summary(&self) -> SummaryMetrics {
        let dates = self.dates();
        let date_range = match (dates.iter().min(), dates.iter().max()) {
            (Some(min), Some(max)) => Some(DateRange {
                start: min.to_rfc3339(),
                end: max.to_rfc3339(),
                days_span: (*max - *min).num_days().max(0),
            }),
            _ => None,
        };

        let avg_events_per_day = if dates.len() < 2 {
            self.rows.len() as f64
        } else {
            let span = date_range.as_ref().map(|r| r.days_span).unwrap_or(0);
            dates.len() as f64 / span.max(1) as f64
        };

        SummaryMetrics {
            total_events: self.rows.len(),
            total_invitees: distinct_invitees(self.rows),
            status_distribution: count_by(self.rows.iter().filter_map(|r| r.status.as_deref())),
            internal_note_distribution: count_by(
                self.rows.iter().filter_map(|r| r.internal_note.as_deref()),
            ),
            date_range,
            avg_events_per_day,
            completion_rate: completion_rate(self.rows),
        }
    }

    fn internal_notes_analysis(&self) -> BTreeMap<String, InternalNoteAnalysis> {
        let mut groups: HashMap<&str, Vec<&AnalyticRecord>> = HashMap::new();
        for row in self.rows {
            if let Some(note) = row.internal_note.as_deref() {
                groups.entry(note).or_default().push(row);
            }
        }

        let mut analysis = BTreeMap::new();
        for (note, rows) in groups {
            let owned: Vec<AnalyticRecord> = rows.iter().map(|r| (*r).clone()).collect();
            analysis.insert(
                note.to_string(),
                InternalNoteAnalysis {
                    internal_note: note.to_string(),
                    total_events: owned.len(),
                    total_invitees: distinct_invitees(&owned),
                    status_distribution: count_by(
                        owned.iter().filter_map(|r| r.status.as_deref()),
                    ),
                    conversion_rate: completion_rate(&owned),
                    popular_services: top_n(
                        owned.iter().filter_map(|r| r.interested_service.as_deref()),
                        5,
                    ),
                    discovery_channels: top_n(
                        owned.iter().filter_map(|r| r.discovery_channel.as_deref()),
                        5,
                    ),
                    avg_event_duration: avg_duration(&owned),
                    peak_hours: self.peak_hours(&owned),
                    response_time_stats: response_time_stats(&owned),
                },
            );
        }
        analysis
    }

    fn peak_hours(&self, rows: &[AnalyticRecord]) -> Vec<u32> {
        let mut counts: HashMap<u32, u64> = HashMap::new();
        for row in rows {
            if let Some(date) = row.analysis_date(self.granularity) {
                *counts.entry(date.hour()).or_insert(0) += 1;
            }
        }
        let mut ranked: Vec<(u32, u64)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.into_iter().take(3).map(|(hour, _)| hour).collect()
    }

    fn temporal_analysis(&self) -> TemporalAnalysis {
        let dates = self.dates();
        if dates.is_empty() {
            return TemporalAnalysis::default();
        }

        let mut hourly: BTreeMap<u32, u64> = BTreeMap::new();
        let mut daily: BTreeMap<String, u64> = BTreeMap::new();
        let mut monthly: BTreeMap<String, u64> = BTreeMap::new();
        let mut split = WeekdaySplit::default();
        for date in &dates {
            *hourly.entry(date.hour()).or_insert(0) += 1;
            *daily.entry(date.format("%A").to_string()).or_insert(0) += 1;
            *monthly.entry(date.format("%B").to_string()).or_insert(0) += 1;
            if date.weekday().num_days_from_monday() >= 5 {
                split.weekend += 1;
            } else {
                split.weekday += 1;
            }
        }

        let monthly_counts = monthly_counts(&dates);
        let trend = match monthly_counts.len() {
            0 => "insufficient_data".to_string(),
            1 => "stable".to_string(),
            _ => {
                let first = monthly_counts.values().next().copied().unwrap_or(0);
                let last = monthly_counts.values().last().copied().unwrap_or(0);
                if last > first {
                    "increasing".to_string()
                } else if last < first {
                    "declining".to_string()
                } else {
                    "stable".to_string()
                }
            }
        };

        TemporalAnalysis {
            hourly_distribution: hourly,
            daily_distribution: daily,
            monthly_distribution: monthly,
            weekday_vs_weekend: split,
            seasonal_trends: SeasonalTrends {
                monthly_counts,
                trend,
            },
        }
    }

    fn conversion_analysis(&self) -> ConversionAnalysis {
        let has_status = self.rows.iter().any(|r| r.status.is_some());
        if !has_status {
            return ConversionAnalysis::default();
        }

        let active: Vec<&AnalyticRecord> = self
            .rows
            .iter()
            .filter(|r| r.status.as_deref() == Some("active"))
            .collect();

        let mut by_note: BTreeMap<String, f64> = BTreeMap::new();
        let mut note_totals: HashMap<&str, (u64, u64)> = HashMap::new();
        for row in self.rows {
            if let Some(note) = row.internal_note.as_deref() {
                let entry = note_totals.entry(note).or_insert((0, 0));
                entry.1 += 1;
                if row.status.as_deref() == Some("active") {
                    entry.0 += 1;
                }
            }
        }
        for (note, (active_count, total)) in note_totals {
            let rate = if total > 0 {
                active_count as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            by_note.insert(note.to_string(), rate);
        }

        let overall = if self.rows.is_empty() {
            0.0
        } else {
            active.len() as f64 / self.rows.len() as f64 * 100.0
        };

        ConversionAnalysis {
            overall_conversion_rate: overall,
            conversion_by_internal_note: by_note,
            conversion_by_service: top_n(
                active.iter().filter_map(|r| r.interested_service.as_deref()),
                10,
            ),
            conversion_by_channel: top_n(
                active.iter().filter_map(|r| r.discovery_channel.as_deref()),
                10,
            ),
        }
    }

    fn question_analysis(&self) -> QuestionAnalysis {
        let services = top_n(
            self.rows.iter().filter_map(|r| r.interested_service.as_deref()),
            15,
        );
        let channels = top_n(
            self.rows.iter().filter_map(|r| r.discovery_channel.as_deref()),
            15,
        );
        QuestionAnalysis {
            service_interests: ServiceInterests {
                top_services: top_values(&services, 5),
                distribution: services,
            },
            discovery_channels: DiscoveryChannels {
                top_channels: top_values(&channels, 5),
                distribution: channels,
            },
        }
    }

    fn correlation_analysis(&self) -> CorrelationAnalysis {
        let mut totals: HashMap<&str, (u64, u64)> = HashMap::new();
        for row in self.rows {
            if let Some(note) = row.internal_note.as_deref() {
                let entry = totals.entry(note).or_insert((0, 0));
                entry.1 += 1;
                if row.status.as_deref() == Some("active") {
                    entry.0 += 1;
                }
            }
        }
        let mut rates = BTreeMap::new();
        for (note, (active, total)) in totals {
            if total > 0 {
                rates.insert(note.to_string(), active as f64 / total as f64);
            }
        }
        CorrelationAnalysis {
            internal_note_success_rates: rates,
        }
    }

    fn trend_analysis(&self) -> TrendAnalysis {
        let dates = self.dates();
        let monthly = monthly_counts(&dates);

        let growth_metrics = if monthly.len() < 2 {
            GrowthMetrics {
                growth_rate: 0.0,
                trend: "insufficient_data".to_string(),
            }
        } else {
            let first = monthly.values().next().copied().unwrap_or(0) as f64;
            let last = monthly.values().last().copied().unwrap_or(0) as f64;
            let growth_rate = (last - first) / first.max(1.0) * 100.0;
            GrowthMetrics {
                growth_rate,
                trend: if growth_rate > 0.0 {
                    "growing".to_string()
                } else {
                    "declining".to_string()
                },
            }
        };

        TrendAnalysis {
            monthly_trends: monthly,
            growth_metrics,
        }
    }

    fn outlier_analysis(&self) -> OutlierAnalysis {
        let dates = self.dates();
        let observed_days: HashSet<NaiveDate> = dates.iter().map(|d| d.date_naive()).collect();
        if observed_days.len() < 3 {
            return OutlierAnalysis::default();
        }

        let daily = daily_counts(&dates);
        let values: Vec<f64> = daily.values().map(|&v| v as f64).collect();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance =
            values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
        let std_dev = variance.sqrt();
        if std_dev == 0.0 {
            return OutlierAnalysis::default();
        }

        let mut high_activity_days = BTreeMap::new();
        for (day, count) in &daily {
            let z = (*count as f64 - mean) / std_dev;
            if z.abs() > OUTLIER_Z_THRESHOLD {
                high_activity_days.insert(day.clone(), *count);
            }
        }

        OutlierAnalysis {
            anomaly_detection: !high_activity_days.is_empty(),
            high_activity_days,
        }
    }
}

/// Distinct invitee count: by email when any email is present, falling
/// back to invitee id.
fn distinct_invitees(rows: &[AnalyticRecord]) -> usize {
    let emails: HashSet<&str> = rows
        .iter()
        .filter_map(|r| r.invitee_email.as_deref())
        .collect();
    if !emails.is_empty() {
        return emails.len();
    }
    rows.iter()
        .filter_map(|r| r.invitee_id.as_deref())
        .collect::<HashSet<&str>>()
        .len()
}

/// Fraction of rows with `active` status, as a percentage. Zero rows or
/// no status data yields 0.0, never a division error.
fn completion_rate(rows: &[AnalyticRecord]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let active = rows
        .iter()
        .filter(|r| r.status.as_deref() == Some("active"))
        .count();
    active as f64 / rows.len() as f64 * 100.0
}

fn avg_duration(rows: &[AnalyticRecord]) -> f64 {
    let durations: Vec<f64> = rows.iter().filter_map(|r| r.duration).collect();
    if durations.is_empty() {
        return DEFAULT_EVENT_DURATION_MINUTES;
    }
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;
    if mean.is_nan() {
        DEFAULT_EVENT_DURATION_MINUTES
    } else {
        mean
    }
}

/// Mean/median/min/max hours between event creation and event start.
/// Empty map when the required timestamps are missing.
fn response_time_stats(rows: &[AnalyticRecord]) -> BTreeMap<String, f64> {
    let mut hours: Vec<f64> = rows
        .iter()
        .filter_map(|r| {
            match (r.scheduled_event_created_at, r.scheduled_event_start_time) {
                (Some(created), Some(start)) => {
                    Some((start - created).num_seconds() as f64 / 3600.0)
                }
                _ => None,
            }
        })
        .collect();
    if hours.is_empty() {
        return BTreeMap::new();
    }
    hours.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mean = hours.iter().sum::<f64>() / hours.len() as f64;
    let median = if hours.len() % 2 == 1 {
        hours[hours.len() / 2]
    } else {
        (hours[hours.len() / 2 - 1] + hours[hours.len() / 2]) / 2.0
    };

    let mut stats = BTreeMap::new();
    stats.insert("mean".to_string(), mean);
    stats.insert("median".to_string(), median);
    stats.insert("min".to_string(), hours[0]);
    stats.insert("max".to_string(), hours[hours.len() - 1]);
    stats
}

fn count_by<'a>(values: impl Iterator<Item = &'a str>) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for value in values {
        *counts.entry(value.to_string()).or_insert(0u64) += 1;
    }
    counts
}

/// Top `n` most frequent values, ties broken by key for determinism.
fn top_n<'a>(values: impl Iterator<Item = &'a str>, n: usize) -> BTreeMap<String, u64> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    let mut ranked: Vec<(&str, u64)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(n)
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// The `n` most frequent keys of an already-counted distribution.
fn top_values(distribution: &BTreeMap<String, u64>, n: usize) -> Vec<String> {
    let mut ranked: Vec<(&String, &u64)> = distribution.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    ranked.into_iter().take(n).map(|(k, _)| k.clone()).collect()
}

/// Events per calendar month keyed "YYYY-MM", with gap months zero-filled
/// across the observed range.
fn monthly_counts(dates: &[DateTime<Utc>]) -> BTreeMap<String, u64> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    if dates.is_empty() {
        return counts;
    }
    let months: Vec<i32> = dates
        .iter()
        .map(|d| d.year() * 12 + d.month0() as i32)
        .collect();
    let first = *months.iter().min().unwrap_or(&0);
    let last = *months.iter().max().unwrap_or(&0);
    for month in first..=last {
        counts.insert(format!("{:04}-{:02}", month.div_euclid(12), month.rem_euclid(12) + 1), 0);
    }
    for date in dates {
        *counts
            .entry(format!("{:04}-{:02}", date.year(), date.month()))
            .or_insert(0) += 1;
    }
    counts
}

/// Events per day keyed "YYYY-MM-DD", with gap days zero-filled across the
/// observed range.
fn daily_counts(dates: &[DateTime<Utc>]) -> BTreeMap<String, u64> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let days: Vec<NaiveDate> = dates.iter().map(|d| d.date_naive()).collect();
    let (Some(&first), Some(&last)) = (days.iter().min(), days.iter().max()) else {
        return counts;
    };
    let mut day = first;
    while day <= last {
        counts.insert(day.format("%Y-%m-%d").to_string(), 0);
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    for day in days {
        *counts
            .entry(day.format("%Y-%m-%d").to_string())
            .or_insert(0) += 1;
    }
    counts
}
