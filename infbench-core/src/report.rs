//! Turns raw lifecycle records into the client-side report: an overall
//! summary, per-stage summaries, and (optionally) a per-request dump.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::loadgen::LoadStage;
use crate::recorder::{LifecycleRecord, Outcome};

/// Statistical summary of one observed quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SummaryStats {
    pub mean: f64,
    pub min: f64,
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
    pub max: f64,
}

/// Linear-interpolated percentile over a sorted slice, matching the usual
/// numpy definition. `p` is in [0, 100].
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let rank = p / 100.0 * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// `None` when there is nothing to summarize, never a zero-filled summary.
pub fn summarize(items: &[f64]) -> Option<SummaryStats> {
    if items.is_empty() {
        return None;
    }
    let mut sorted = items.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;
    Some(SummaryStats {
        mean,
        min: sorted[0],
        p10: percentile(&sorted, 10.0),
        p50: percentile(&sorted, 50.0),
        p90: percentile(&sorted, 90.0),
        p99: percentile(&sorted, 99.0),
        max: sorted[sorted.len() - 1],
    })
}

#[derive(Debug, Serialize)]
pub struct LoadSummary {
    pub count: u64,
    /// Configured arrival rate for this group, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_rate: Option<f64>,
    /// Dispatched count over the group's configured duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub achieved_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_duration: Option<f64>,
    /// Gap between scheduled and actual dispatch, in seconds. Grows when the
    /// concurrency bound throttles the schedule.
    pub schedule_delay: Option<SummaryStats>,
}

#[derive(Debug, Serialize)]
pub struct SuccessSummary {
    pub count: u64,
    pub request_latency: Option<SummaryStats>,
    pub time_to_first_token: Option<SummaryStats>,
    pub output_len: Option<SummaryStats>,
    pub normalized_time_per_output_token: Option<SummaryStats>,
}

#[derive(Debug, Serialize)]
pub struct FailureSummary {
    pub count: u64,
    pub request_latency: Option<SummaryStats>,
    pub errors_by_type: BTreeMap<String, u64>,
}

#[derive(Debug, Serialize)]
pub struct ResponsesSummary {
    pub load: LoadSummary,
    pub successes: SuccessSummary,
    pub failures: FailureSummary,
}

#[derive(Debug, Serialize)]
pub struct StageSummary {
    pub stage_id: usize,
    #[serde(flatten)]
    pub summary: ResponsesSummary,
}

#[derive(Debug, Serialize)]
pub struct LifecycleReport {
    pub overall: ResponsesSummary,
    pub stages: Vec<StageSummary>,
}

fn secs(d: Duration) -> f64 {
    d.as_secs_f64()
}

/// Summarizes one group of records, partitioned into successes and failures.
pub fn summarize_records(records: &[LifecycleRecord]) -> ResponsesSummary {
    let successes: Vec<&LifecycleRecord> = records.iter().filter(|r| r.is_success()).collect();
    let failures: Vec<&LifecycleRecord> = records.iter().filter(|r| !r.is_success()).collect();

    let schedule_delays: Vec<f64> = records
        .iter()
        .map(|r| secs(r.start_time.saturating_sub(r.scheduled_time)))
        .collect();

    let success_latencies: Vec<f64> = successes.iter().map(|r| secs(r.latency())).collect();
    let ttfts: Vec<f64> = successes
        .iter()
        .filter_map(|r| r.time_to_first_token.map(secs))
        .collect();
    let output_lens: Vec<f64> = successes
        .iter()
        .filter_map(|r| match &r.outcome {
            Outcome::Success(info) => info.number("output_len"),
            Outcome::Failure(_) => None,
        })
        .collect();

    // Per-request latency divided by its own output length; zero tokens out
    // yields zero rather than a division blowup.
    let normalized: Vec<f64> = successes
        .iter()
        .map(|r| {
            let output_len = match &r.outcome {
                Outcome::Success(info) => info.number("output_len"),
                Outcome::Failure(_) => None,
            };
            match output_len {
                Some(len) if len != 0.0 => secs(r.latency()) / len,
                _ => 0.0,
            }
        })
        .collect();

    let failure_latencies: Vec<f64> = failures.iter().map(|r| secs(r.latency())).collect();
    let mut errors_by_type = BTreeMap::new();
    for record in &failures {
        if let Outcome::Failure(error) = &record.outcome {
            *errors_by_type.entry(error.error_type.clone()).or_insert(0) += 1;
        }
    }

    ResponsesSummary {
        load: LoadSummary {
            count: records.len() as u64,
            requested_rate: None,
            achieved_rate: None,
            stage_duration: None,
            schedule_delay: summarize(&schedule_delays),
        },
        successes: SuccessSummary {
            count: successes.len() as u64,
            request_latency: summarize(&success_latencies),
            time_to_first_token: summarize(&ttfts),
            output_len: summarize(&output_lens),
            normalized_time_per_output_token: summarize(&normalized),
        },
        failures: FailureSummary {
            count: failures.len() as u64,
            request_latency: summarize(&failure_latencies),
            errors_by_type,
        },
    }
}

fn fill_load_rates(summary: &mut ResponsesSummary, rate: Option<f64>, duration: Option<Duration>) {
    summary.load.requested_rate = rate;
    if let Some(duration) = duration.filter(|d| !d.is_zero()) {
        summary.load.stage_duration = Some(duration.as_secs_f64());
        summary.load.achieved_rate = Some(summary.load.count as f64 / duration.as_secs_f64());
    }
}

/// Overall summary plus one summary per stage, in stage order. `stages` is
/// the configured load profile; it supplies the requested rate and duration
/// each achieved rate is measured against.
pub fn build_lifecycle_report(records: &[LifecycleRecord], stages: &[LoadStage]) -> LifecycleReport {
    let mut by_stage: BTreeMap<usize, Vec<LifecycleRecord>> = BTreeMap::new();
    for record in records {
        by_stage.entry(record.stage_id).or_default().push(record.clone());
    }

    let mut overall = summarize_records(records);
    let total: Duration = stages.iter().map(|s| s.duration).sum();
    fill_load_rates(&mut overall, None, Some(total));

    LifecycleReport {
        overall,
        stages: by_stage
            .into_iter()
            .map(|(stage_id, records)| {
                let mut summary = summarize_records(&records);
                let stage = stages.get(stage_id);
                fill_load_rates(
                    &mut summary,
                    stage.map(|s| s.rate),
                    stage.map(|s| s.duration),
                );
                StageSummary { stage_id, summary }
            })
            .collect(),
    }
}

/// Flat per-request row for the optional raw dump.
#[derive(Debug, Serialize)]
pub struct PerRequestRow<'a> {
    pub stage_id: usize,
    pub scheduled_time: f64,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_first_token: Option<f64>,
    pub request: &'a crate::api::RequestDescriptor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<&'a crate::api::ResponseInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a crate::backend::ErrorInfo>,
}

impl<'a> From<&'a LifecycleRecord> for PerRequestRow<'a> {
    fn from(record: &'a LifecycleRecord) -> Self {
        let (info, error) = match &record.outcome {
            Outcome::Success(info) => (Some(info), None),
            Outcome::Failure(error) => (None, Some(error)),
        };
        Self {
            stage_id: record.stage_id,
            scheduled_time: secs(record.scheduled_time),
            start_time: secs(record.start_time),
            end_time: secs(record.end_time),
            time_to_first_token: record.time_to_first_token.map(secs),
            request: &record.request,
            info,
            error,
        }
    }
}

/// A report artifact ready to be written out. `name` is a bare file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFile {
    pub name: String,
    pub contents: String,
}

impl ReportFile {
    pub fn json(name: &str, value: &impl Serialize) -> serde_json::Result<Self> {
        Ok(Self {
            name: name.to_string(),
            contents: serde_json::to_string_pretty(value)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{RequestDescriptor, ResponseInfo};
    use crate::backend::ErrorInfo;

    fn success(stage_id: usize, start_ms: u64, latency_ms: u64, output_len: u64) -> LifecycleRecord {
        let mut info = ResponseInfo::new();
        info.insert("output_len", output_len);
        LifecycleRecord {
            stage_id,
            scheduled_time: Duration::from_millis(start_ms),
            start_time: Duration::from_millis(start_ms),
            end_time: Duration::from_millis(start_ms + latency_ms),
            time_to_first_token: Some(Duration::from_millis(latency_ms / 2)),
            outcome: Outcome::Success(info),
            request: RequestDescriptor::Completion {
                prompt: String::new(),
                max_tokens: output_len,
            },
        }
    }

    fn failure(stage_id: usize, start_ms: u64, latency_ms: u64) -> LifecycleRecord {
        LifecycleRecord {
            stage_id,
            scheduled_time: Duration::from_millis(start_ms),
            start_time: Duration::from_millis(start_ms),
            end_time: Duration::from_millis(start_ms + latency_ms),
            time_to_first_token: None,
            outcome: Outcome::Failure(ErrorInfo {
                error_type: "timeout".to_string(),
                message: "timed out".to_string(),
            }),
            request: RequestDescriptor::Completion {
                prompt: String::new(),
                max_tokens: 1,
            },
        }
    }

    #[test]
    fn percentiles_interpolate_like_numpy() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 50.0), 2.5);
        assert_eq!(percentile(&sorted, 100.0), 4.0);
        assert!((percentile(&sorted, 10.0) - 1.3).abs() < 1e-9);

        assert_eq!(percentile(&[7.0], 90.0), 7.0);
    }

    #[test]
    fn empty_input_summarizes_to_none() {
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn partitions_successes_and_failures() {
        let records = vec![
            success(0, 0, 100, 10),
            success(0, 10, 200, 20),
            failure(0, 20, 50),
        ];
        let summary = summarize_records(&records);

        assert_eq!(summary.load.count, 3);
        assert_eq!(summary.successes.count, 2);
        assert_eq!(summary.failures.count, 1);

        let latency = summary
            .successes
            .request_latency
            .unwrap_or_else(|| panic!("missing latency summary"));
        assert!((latency.mean - 0.15).abs() < 1e-9);
        assert_eq!(latency.min, 0.1);
        assert_eq!(latency.max, 0.2);

        let failed = summary
            .failures
            .request_latency
            .unwrap_or_else(|| panic!("missing failure summary"));
        assert_eq!(failed.mean, 0.05);
    }

    #[test]
    fn zero_output_len_normalizes_to_zero() {
        let records = vec![success(0, 0, 100, 0)];
        let summary = summarize_records(&records);
        let normalized = summary
            .successes
            .normalized_time_per_output_token
            .unwrap_or_else(|| panic!("missing summary"));
        assert_eq!(normalized.mean, 0.0);
    }

    #[test]
    fn report_groups_by_stage_and_rolls_up() {
        let records = vec![success(0, 0, 100, 10), success(1, 0, 100, 10), failure(1, 0, 50)];
        let stages = [
            LoadStage {
                rate: 2.0,
                duration: Duration::from_secs(10),
            },
            LoadStage {
                rate: 4.0,
                duration: Duration::from_secs(5),
            },
        ];
        let report = build_lifecycle_report(&records, &stages);

        assert_eq!(report.overall.load.count, 3);
        assert_eq!(report.overall.load.achieved_rate, Some(3.0 / 15.0));
        assert_eq!(report.stages.len(), 2);
        assert_eq!(report.stages[0].stage_id, 0);
        assert_eq!(report.stages[0].summary.load.count, 1);
        assert_eq!(report.stages[0].summary.load.requested_rate, Some(2.0));
        assert_eq!(report.stages[0].summary.load.achieved_rate, Some(0.1));
        assert_eq!(report.stages[1].summary.failures.count, 1);
        assert_eq!(
            report.stages[1].summary.failures.errors_by_type.get("timeout"),
            Some(&1)
        );
    }

    #[test]
    fn per_request_rows_split_outcome_into_info_or_error() {
        let records = vec![success(0, 0, 100, 10), failure(0, 10, 50)];
        let rows: Vec<PerRequestRow> = records.iter().map(PerRequestRow::from).collect();
        let json = serde_json::to_value(&rows).unwrap_or_else(|e| panic!("serialize failed: {e}"));

        assert_eq!(json[0]["stage_id"], 0);
        assert_eq!(json[0]["info"]["output_len"], 10);
        assert!(json[0].get("error").is_none());

        assert_eq!(json[1]["error"]["error_type"], "timeout");
        assert!(json[1].get("info").is_none());
        assert!(json[1].get("time_to_first_token").is_none());
    }
}
