use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use rand::SeedableRng as _;
use rand::rngs::StdRng;
use rand_distr::{Distribution as _, Exp};
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::backend::{ErrorInfo, ModelServerClient, RequestError};
use crate::datagen::WorkloadGenerator;
use crate::error::{Error, Result};
use crate::recorder::{LifecycleRecord, Outcome, RequestRecorder};

/// Arrival process for the open-loop dispatcher.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoadType {
    /// Evenly spaced arrivals at the stage rate.
    Constant,
    /// Exponentially distributed inter-arrival gaps with the stage rate as
    /// the mean arrival rate.
    Poisson,
}

/// One segment of the load profile: hold `rate` requests per second for
/// `duration`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadStage {
    pub rate: f64,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct LoadConfig {
    pub load_type: LoadType,
    pub stages: Vec<LoadStage>,

    /// Upper bound on simultaneously in-flight requests. When the bound is
    /// reached the dispatcher stalls, so observed throughput can fall below
    /// the configured rate; the gap is visible in the report as scheduled
    /// vs actual start times.
    pub max_concurrency: usize,

    /// Per-request timeout. Expired requests are recorded as failures.
    pub request_timeout: Option<Duration>,

    /// Hard wall-clock cap on the whole run. Dispatch stops at the cap.
    pub max_run_duration: Option<Duration>,

    /// Also abort requests still in flight at `max_run_duration`, recording
    /// them as cancelled, instead of letting them drain.
    pub cancel_on_deadline: bool,

    /// Seed for the Poisson arrival process. Fixed seed, fixed schedule.
    pub seed: Option<u64>,
}

impl LoadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() {
            return Err(Error::InvalidStages);
        }
        for stage in &self.stages {
            if !stage.rate.is_finite() || stage.rate <= 0.0 {
                return Err(Error::InvalidRate);
            }
        }
        if self.max_concurrency == 0 {
            return Err(Error::InvalidConcurrency);
        }
        Ok(())
    }
}

/// A dispatch slot: which stage it belongs to and when (relative to run
/// start) it should fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledSlot {
    pub stage_id: usize,
    pub offset: Duration,
}

/// Materializes the full arrival schedule up front. Offsets are
/// nondecreasing within and across stages.
pub fn build_schedule(config: &LoadConfig) -> Result<Vec<ScheduledSlot>> {
    config.validate()?;

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut slots = Vec::new();
    let mut stage_start = Duration::ZERO;

    for (stage_id, stage) in config.stages.iter().enumerate() {
        let stage_end = stage_start + stage.duration;

        match config.load_type {
            LoadType::Constant => {
                let gap = Duration::from_secs_f64(1.0 / stage.rate);
                let mut offset = stage_start;
                while offset < stage_end {
                    slots.push(ScheduledSlot { stage_id, offset });
                    offset += gap;
                }
            }
            LoadType::Poisson => {
                let exp = Exp::new(stage.rate).map_err(|_| Error::InvalidRate)?;
                let mut offset = stage_start + Duration::from_secs_f64(exp.sample(&mut rng));
                while offset < stage_end {
                    slots.push(ScheduledSlot { stage_id, offset });
                    offset += Duration::from_secs_f64(exp.sample(&mut rng));
                }
            }
        }

        stage_start = stage_end;
    }

    Ok(slots)
}

/// Wall-clock window the run covered, used to bound time-series metric
/// queries afterwards.
#[derive(Debug, Clone, Copy)]
pub struct RunWindow {
    pub started_at: SystemTime,
    pub duration: Duration,
}

/// Drives the full benchmark: paces dispatch along the schedule, bounds
/// concurrency with a semaphore, and records one lifecycle record per
/// dispatched request. Request failures never abort the run.
pub async fn run_benchmark<C, G>(
    config: &LoadConfig,
    client: Arc<C>,
    generator: &mut G,
    recorder: Arc<RequestRecorder>,
) -> Result<RunWindow>
where
    C: ModelServerClient + 'static,
    G: WorkloadGenerator + ?Sized,
{
    let schedule = build_schedule(config)?;

    let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
    let started_at = SystemTime::now();
    let run_start = Instant::now();
    let cancel_at = config
        .max_run_duration
        .filter(|_| config.cancel_on_deadline)
        .map(|d| tokio::time::Instant::from_std(run_start + d));

    let mut handles = Vec::with_capacity(schedule.len());

    'dispatch: for slot in schedule {
        if let Some(cap) = config.max_run_duration
            && slot.offset >= cap
        {
            break;
        }
        let Some(descriptor) = generator.next_descriptor() else {
            break;
        };

        tokio::time::sleep_until(tokio::time::Instant::from_std(run_start + slot.offset))
            .await;

        // Blocks while the concurrency bound is saturated.
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break 'dispatch;
        };

        // The permit wait can outlast the hard cap; no new requests go out
        // past it.
        if let Some(cap) = config.max_run_duration
            && run_start.elapsed() >= cap
        {
            break 'dispatch;
        }

        recorder.note_dispatched();
        handles.push(tokio::spawn(execute_one(
            client.clone(),
            recorder.clone(),
            descriptor,
            slot,
            run_start,
            config.request_timeout,
            cancel_at,
            permit,
        )));
    }

    recorder.mark_dispatch_done();

    for handle in handles {
        handle.await.map_err(Error::Join)?;
    }
    recorder.wait_complete().await;

    Ok(RunWindow {
        started_at,
        duration: run_start.elapsed(),
    })
}

#[allow(clippy::too_many_arguments)]
async fn execute_one<C: ModelServerClient>(
    client: Arc<C>,
    recorder: Arc<RequestRecorder>,
    descriptor: crate::api::RequestDescriptor,
    slot: ScheduledSlot,
    run_start: Instant,
    request_timeout: Option<Duration>,
    cancel_at: Option<tokio::time::Instant>,
    permit: OwnedSemaphorePermit,
) {
    let start_time = run_start.elapsed();

    let attempt = async {
        match request_timeout {
            Some(t) => match tokio::time::timeout(t, client.process_request(&descriptor)).await
            {
                Ok(result) => result,
                Err(_) => Err(RequestError::Timeout(t)),
            },
            None => client.process_request(&descriptor).await,
        }
    };

    let result = match cancel_at {
        Some(deadline) => {
            tokio::select! {
                result = attempt => result,
                _ = tokio::time::sleep_until(deadline) => Err(RequestError::Cancelled),
            }
        }
        None => attempt.await,
    };

    let end_time = run_start.elapsed();
    let (outcome, time_to_first_token) = match result {
        Ok(completed) => (Outcome::Success(completed.info), completed.time_to_first_token),
        Err(err) => {
            tracing::debug!(stage = slot.stage_id, error = %err, "request failed");
            (Outcome::Failure(ErrorInfo::from(&err)), None)
        }
    };

    recorder.record(LifecycleRecord {
        stage_id: slot.stage_id,
        scheduled_time: slot.offset,
        start_time,
        end_time,
        time_to_first_token,
        outcome,
        request: descriptor,
    });

    drop(permit);
}
