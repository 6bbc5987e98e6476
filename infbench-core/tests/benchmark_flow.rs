use std::sync::Arc;
use std::time::Duration;

use infbench_core::{
    ApiKind, LoadConfig, LoadStage, LoadType, MockGenerator, MockModelServerClient, Outcome,
    RequestRecorder, build_lifecycle_report, run_benchmark,
};

fn load_config(rate: f64, duration: Duration, max_concurrency: usize) -> LoadConfig {
    LoadConfig {
        load_type: LoadType::Constant,
        stages: vec![LoadStage { rate, duration }],
        max_concurrency,
        request_timeout: None,
        max_run_duration: None,
        cancel_on_deadline: false,
        seed: Some(1),
    }
}

#[tokio::test(start_paused = true)]
async fn concurrency_bound_is_never_exceeded() {
    // 100 rps for 200ms schedules 20 requests; each takes 100ms, so the
    // bound of 5 forces queuing.
    let config = load_config(100.0, Duration::from_millis(200), 5);
    let client = Arc::new(MockModelServerClient::new(Duration::from_millis(100), 0.0));
    let recorder = Arc::new(RequestRecorder::new());
    let mut generator = MockGenerator::new(ApiKind::Completion, 16);

    run_benchmark(&config, client.clone(), &mut generator, recorder.clone())
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));

    assert_eq!(recorder.dispatched_total(), 20);
    assert_eq!(recorder.completed_total(), 20);
    assert_eq!(recorder.success_total(), 20);
    assert!(
        client.max_in_flight() <= 5,
        "observed {} in flight",
        client.max_in_flight()
    );
}

#[tokio::test(start_paused = true)]
async fn failures_are_recorded_not_fatal() {
    let config = load_config(100.0, Duration::from_millis(200), 32);
    let client = Arc::new(MockModelServerClient::new(Duration::from_millis(10), 0.3));
    let recorder = Arc::new(RequestRecorder::new());
    let mut generator = MockGenerator::new(ApiKind::Completion, 16);

    run_benchmark(&config, client, &mut generator, recorder.clone())
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));

    assert_eq!(recorder.completed_total(), 20);
    assert_eq!(recorder.failure_total(), 6);
    assert_eq!(recorder.success_total(), 14);
}

#[tokio::test(start_paused = true)]
async fn request_timeout_marks_requests_failed() {
    let mut config = load_config(50.0, Duration::from_millis(100), 16);
    config.request_timeout = Some(Duration::from_millis(50));

    // The mock takes 200ms per request, well past the timeout.
    let client = Arc::new(MockModelServerClient::new(Duration::from_millis(200), 0.0));
    let recorder = Arc::new(RequestRecorder::new());
    let mut generator = MockGenerator::new(ApiKind::Completion, 16);

    run_benchmark(&config, client, &mut generator, recorder.clone())
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));

    let records = recorder.take_records();
    assert_eq!(records.len(), 5);
    for record in &records {
        match &record.outcome {
            Outcome::Failure(error) => assert_eq!(error.error_type, "timeout"),
            Outcome::Success(_) => panic!("request should have timed out"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn deadline_cancels_in_flight_requests() {
    let mut config = load_config(100.0, Duration::from_secs(10), 64);
    config.max_run_duration = Some(Duration::from_millis(100));
    config.cancel_on_deadline = true;

    // Requests would take an hour; the deadline aborts them.
    let client = Arc::new(MockModelServerClient::new(Duration::from_secs(3600), 0.0));
    let recorder = Arc::new(RequestRecorder::new());
    let mut generator = MockGenerator::new(ApiKind::Completion, 16);

    let window = run_benchmark(&config, client, &mut generator, recorder.clone())
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));

    // Dispatch stops at the cap: 100 rps for 100ms.
    assert_eq!(recorder.dispatched_total(), 10);
    assert_eq!(recorder.completed_total(), 10);
    assert_eq!(recorder.failure_total(), 10);
    for record in recorder.take_records() {
        match record.outcome {
            Outcome::Failure(error) => assert_eq!(error.error_type, "cancelled"),
            Outcome::Success(_) => panic!("request should have been cancelled"),
        }
    }
    assert!(window.duration < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn deadline_stops_dispatch_even_when_saturated() {
    // With a bound of 1 and hour-long requests, every slot after the first
    // stalls on a permit until well past the cap. None of them may go out,
    // even though their scheduled offsets fall before it.
    let mut config = load_config(100.0, Duration::from_secs(10), 1);
    config.max_run_duration = Some(Duration::from_millis(100));

    let client = Arc::new(MockModelServerClient::new(Duration::from_secs(3600), 0.0));
    let recorder = Arc::new(RequestRecorder::new());
    let mut generator = MockGenerator::new(ApiKind::Completion, 16);

    run_benchmark(&config, client, &mut generator, recorder.clone())
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));

    assert_eq!(recorder.dispatched_total(), 1);
    assert_eq!(recorder.completed_total(), 1);
    assert_eq!(recorder.success_total(), 1, "drain mode lets it finish");
}

#[tokio::test(start_paused = true)]
async fn bounded_generator_ends_the_run_early() {
    struct FiveRequests(u64);
    impl infbench_core::WorkloadGenerator for FiveRequests {
        fn supported_apis(&self) -> &[ApiKind] {
            &[ApiKind::Completion]
        }
        fn supports_io_distribution(&self) -> bool {
            false
        }
        fn supports_shared_prefix(&self) -> bool {
            false
        }
        fn next_descriptor(&mut self) -> Option<infbench_core::RequestDescriptor> {
            if self.0 == 0 {
                return None;
            }
            self.0 -= 1;
            Some(infbench_core::RequestDescriptor::Completion {
                prompt: "p".to_string(),
                max_tokens: 1,
            })
        }
    }

    let config = load_config(100.0, Duration::from_secs(1), 8);
    let client = Arc::new(MockModelServerClient::new(Duration::from_millis(1), 0.0));
    let recorder = Arc::new(RequestRecorder::new());
    let mut generator = FiveRequests(5);

    run_benchmark(&config, client, &mut generator, recorder.clone())
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));

    assert_eq!(recorder.dispatched_total(), 5);
    assert_eq!(recorder.completed_total(), 5);
}

#[tokio::test(start_paused = true)]
async fn report_rolls_up_the_recorded_run() {
    let mut config = load_config(100.0, Duration::from_millis(100), 32);
    config.stages.push(LoadStage {
        rate: 50.0,
        duration: Duration::from_millis(100),
    });

    let client = Arc::new(
        MockModelServerClient::new(Duration::from_millis(5), 0.0)
            .with_time_to_first_token(Duration::from_millis(2)),
    );
    let recorder = Arc::new(RequestRecorder::new());
    let mut generator = MockGenerator::new(ApiKind::Completion, 16);

    run_benchmark(&config, client, &mut generator, recorder.clone())
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));

    let records = recorder.take_records();
    let report = build_lifecycle_report(&records, &config.stages);

    assert_eq!(report.overall.load.count, 15);
    assert_eq!(report.stages.len(), 2);
    assert_eq!(report.stages[0].stage_id, 0);
    assert_eq!(report.stages[0].summary.load.count, 10);
    assert_eq!(report.stages[1].summary.load.count, 5);

    let successes = &report.overall.successes;
    assert_eq!(successes.count, 15);
    assert!(successes.request_latency.is_some());
    assert!(successes.time_to_first_token.is_some());
    assert!(successes.output_len.is_some());
}
