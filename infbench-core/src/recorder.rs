use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use hdrhistogram::Histogram;
use tokio::sync::Notify;

use crate::api::{RequestDescriptor, ResponseInfo};
use crate::backend::ErrorInfo;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(ResponseInfo),
    Failure(ErrorInfo),
}

/// Timing and outcome of one dispatched request. All times are offsets from
/// the run start on the monotonic clock. Written once at completion, then
/// immutable.
#[derive(Debug, Clone)]
pub struct LifecycleRecord {
    pub stage_id: usize,
    pub scheduled_time: Duration,
    pub start_time: Duration,
    pub end_time: Duration,
    pub time_to_first_token: Option<Duration>,
    pub outcome: Outcome,
    pub request: RequestDescriptor,
}

impl LifecycleRecord {
    pub fn latency(&self) -> Duration {
        self.end_time.saturating_sub(self.start_time)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }
}

/// Append-only accumulator for lifecycle records, safe for one concurrent
/// writer per in-flight request. Completion order is unordered relative to
/// dispatch order and nothing downstream may rely on it.
#[derive(Debug)]
pub struct RequestRecorder {
    records: Mutex<Vec<LifecycleRecord>>,
    dispatched_total: AtomicU64,
    completed_total: AtomicU64,
    success_total: AtomicU64,
    failure_total: AtomicU64,
    dispatch_done: AtomicBool,
    latency_us: Mutex<Histogram<u64>>,
    notify: Notify,
}

impl Default for RequestRecorder {
    fn default() -> Self {
        // Track up to 10 minutes in microseconds (with 3 sigfigs).
        let hist = Histogram::<u64>::new_with_bounds(1, 600_000_000, 3)
            .unwrap_or_else(|err| panic!("failed to init histogram: {err}"));

        Self {
            records: Mutex::new(Vec::new()),
            dispatched_total: AtomicU64::new(0),
            completed_total: AtomicU64::new(0),
            success_total: AtomicU64::new(0),
            failure_total: AtomicU64::new(0),
            dispatch_done: AtomicBool::new(false),
            latency_us: Mutex::new(hist),
            notify: Notify::new(),
        }
    }
}

impl RequestRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_dispatched(&self) {
        self.dispatched_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record(&self, record: LifecycleRecord) {
        debug_assert!(record.start_time <= record.end_time);

        if record.is_success() {
            self.success_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure_total.fetch_add(1, Ordering::Relaxed);
        }

        let us = record.latency().as_micros().min(u64::MAX as u128) as u64;
        if us != 0 {
            let mut h = self
                .latency_us
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let _ = h.record(us);
        }

        {
            let mut records = self
                .records
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            records.push(record);
        }

        self.completed_total.fetch_add(1, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Marks the dispatch phase finished; `wait_complete` can resolve once
    /// every dispatched request has completed.
    pub fn mark_dispatch_done(&self) {
        self.dispatch_done.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn dispatched_total(&self) -> u64 {
        self.dispatched_total.load(Ordering::Relaxed)
    }

    pub fn completed_total(&self) -> u64 {
        self.completed_total.load(Ordering::Acquire)
    }

    pub fn success_total(&self) -> u64 {
        self.success_total.load(Ordering::Relaxed)
    }

    pub fn failure_total(&self) -> u64 {
        self.failure_total.load(Ordering::Relaxed)
    }

    /// Resolves once dispatch is done and all in-flight requests have been
    /// recorded.
    pub async fn wait_complete(&self) {
        loop {
            let notified = self.notify.notified();
            if self.dispatch_done.load(Ordering::Acquire)
                && self.completed_total() >= self.dispatched_total()
            {
                return;
            }
            notified.await;
        }
    }

    /// Live latency percentiles in milliseconds, for progress reporting.
    pub fn latency_percentiles_ms(&self) -> Option<(f64, f64, f64)> {
        let h = self
            .latency_us
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        #[allow(clippy::len_zero)]
        if h.len() == 0 {
            return None;
        }
        Some((
            h.value_at_quantile(0.50) as f64 / 1000.0,
            h.value_at_quantile(0.90) as f64 / 1000.0,
            h.value_at_quantile(0.99) as f64 / 1000.0,
        ))
    }

    /// Hands the accumulated records to the report aggregator.
    pub fn take_records(&self) -> Vec<LifecycleRecord> {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::take(&mut *records)
    }
}
