use anyhow::Context as _;
use std::path::Path;
use std::sync::Arc;

use infbench_core::config::{Config, ServerConfig};
use infbench_core::prometheus::{ModelServerMetricsMetadata, PrometheusCollector};
use infbench_core::{
    ApiKind, DataGenKind, HttpModelServerClient, LoadConfig, MockGenerator, MockModelServerClient,
    ModelServerClient as _, OpenAiAdapter, PerRequestRow, ReportFile, RequestRecorder, RunWindow,
    SyntheticGenerator, Tokenizer, WhitespaceTokenizer, WorkloadGenerator, run_benchmark,
    write_report_files,
};

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let config = load_config(&args.config, &args)?;
    let load = apply_overrides(&config, &args);
    let out = output::formatter(args.output);

    let tokenizer: Arc<dyn Tokenizer> = Arc::new(WhitespaceTokenizer::new());
    let mut generator = build_generator(&config, tokenizer.clone()).map_err(RunError::InvalidInput)?;

    let server = config
        .server
        .clone()
        .ok_or_else(|| RunError::InvalidInput(anyhow::anyhow!("config has no `server` section")))?;

    out.print_header(&args.config, &load);

    let recorder = Arc::new(RequestRecorder::new());
    let (window, metadata) = match server {
        ServerConfig::Vllm {
            model_name,
            base_url,
            ignore_eos,
            streaming,
        } => {
            let adapter = OpenAiAdapter::new(model_name, ignore_eos, streaming, tokenizer);
            let client = Arc::new(HttpModelServerClient::new(base_url, Box::new(adapter)));
            check_api_support(client.as_ref(), config.api)?;
            let metadata = client.metrics_metadata();
            let window = run_benchmark(&load, client, generator.as_mut(), recorder.clone())
                .await
                .context("benchmark run failed")
                .map_err(RunError::RuntimeError)?;
            (window, metadata)
        }
        ServerConfig::Mock {
            delay,
            failure_ratio,
        } => {
            let client = Arc::new(MockModelServerClient::new(delay, failure_ratio));
            check_api_support(client.as_ref(), config.api)?;
            let window = run_benchmark(&load, client, generator.as_mut(), recorder.clone())
                .await
                .context("benchmark run failed")
                .map_err(RunError::RuntimeError)?;
            (window, None)
        }
    };

    let (p50, p90, p99) = recorder.latency_percentiles_ms().unwrap_or_default();
    tracing::info!(
        dispatched = recorder.dispatched_total(),
        ok = recorder.success_total(),
        failed = recorder.failure_total(),
        duration_s = window.duration.as_secs_f64(),
        latency_ms_p50 = p50,
        latency_ms_p90 = p90,
        latency_ms_p99 = p99,
        "run complete"
    );

    let records = recorder.take_records();
    let lifecycle = infbench_core::build_lifecycle_report(&records, &load.stages);

    let model_server = collect_model_server_report(&config, metadata, &window).await;

    let per_request = args.per_request || config.report.per_request;
    let mut files = Vec::new();
    if config.report.summary {
        files.push(
            ReportFile::json("summary_lifecycle.json", &lifecycle)
                .context("failed to encode lifecycle summary")
                .map_err(RunError::RuntimeError)?,
        );
    }
    if per_request {
        let rows: Vec<PerRequestRow> = records.iter().map(PerRequestRow::from).collect();
        files.push(
            ReportFile::json("per_request_lifecycle.json", &rows)
                .context("failed to encode per-request report")
                .map_err(RunError::RuntimeError)?,
        );
    }
    if let Some(report) = &model_server {
        files.push(
            ReportFile::json("summary_model_server.json", report)
                .context("failed to encode model server summary")
                .map_err(RunError::RuntimeError)?,
        );
    }

    let report_dir = args
        .report_dir
        .clone()
        .unwrap_or_else(|| config.storage.report_dir());
    write_report_files(
        Path::new(&report_dir),
        config.storage.report_file_prefix.as_deref(),
        &files,
    )
    .with_context(|| format!("failed to write reports to {report_dir}"))
    .map_err(RunError::RuntimeError)?;
    eprintln!("reports written to {report_dir}");

    out.print_summary(&lifecycle, model_server.as_ref())
        .map_err(RunError::RuntimeError)?;

    if recorder.dispatched_total() > 0 && recorder.success_total() == 0 {
        return Ok(ExitCode::NoSuccessfulRequests);
    }
    Ok(ExitCode::Success)
}

pub fn validate(config_path: &Path) -> Result<ExitCode, RunError> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("invalid config: {}", config_path.display()))
        .map_err(RunError::InvalidInput)?;
    build_generator(&config, Arc::new(WhitespaceTokenizer::new()))
        .map_err(RunError::InvalidInput)?;
    eprintln!("config ok: {}", config_path.display());
    Ok(ExitCode::Success)
}

fn load_config(path: &Path, args: &RunArgs) -> Result<Config, RunError> {
    let config = Config::from_file(path)
        .with_context(|| format!("invalid config: {}", path.display()))
        .map_err(RunError::InvalidInput)?;
    if let Some(0) = args.max_concurrency {
        return Err(RunError::InvalidInput(anyhow::anyhow!(
            "--max-concurrency must be a positive integer"
        )));
    }
    Ok(config)
}

fn apply_overrides(config: &Config, args: &RunArgs) -> LoadConfig {
    let mut load = config.load.to_load_config();
    if let Some(seed) = args.seed {
        load.seed = Some(seed);
    }
    if let Some(max_concurrency) = args.max_concurrency {
        load.max_concurrency = max_concurrency;
    }
    if let Some(cap) = args.max_run_duration {
        load.max_run_duration = Some(cap);
    }
    load
}

fn build_generator(
    config: &Config,
    tokenizer: Arc<dyn Tokenizer>,
) -> anyhow::Result<Box<dyn WorkloadGenerator>> {
    match config.data.kind {
        DataGenKind::Synthetic => {
            let generator = SyntheticGenerator::new(
                config.api,
                config.data.input_distribution,
                config.data.output_distribution,
                tokenizer,
                config.load.seed,
            )
            .context("invalid synthetic data config")?;
            Ok(Box::new(generator))
        }
        DataGenKind::Mock => Ok(Box::new(MockGenerator::new(
            config.api,
            config.data.max_tokens,
        ))),
    }
}

fn check_api_support(
    client: &impl infbench_core::ModelServerClient,
    api: ApiKind,
) -> Result<(), RunError> {
    if !client.supported_apis().contains(&api) {
        return Err(RunError::InvalidInput(anyhow::anyhow!(
            "server does not support the `{api}` API"
        )));
    }
    Ok(())
}

async fn collect_model_server_report(
    config: &Config,
    metadata: Option<ModelServerMetricsMetadata>,
    window: &RunWindow,
) -> Option<infbench_core::prometheus::ModelServerReport> {
    let prometheus = config.metrics.prometheus.as_ref()?;
    let Some(metadata) = metadata else {
        tracing::warn!("prometheus configured but the server exports no metric metadata");
        return None;
    };
    let collector = PrometheusCollector::new(&prometheus.to_prometheus_config());
    Some(collector.collect(&metadata, window).await)
}
