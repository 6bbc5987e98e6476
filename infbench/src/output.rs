use std::path::Path;

use infbench_core::prometheus::ModelServerReport;
use infbench_core::{LifecycleReport, LoadConfig, SummaryStats};

use crate::cli::OutputFormat;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, config_path: &Path, load: &LoadConfig);
    fn print_summary(
        &self,
        lifecycle: &LifecycleReport,
        model_server: Option<&ModelServerReport>,
    ) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(HumanReadableOutput),
        OutputFormat::Json => Box::new(JsonOutput),
    }
}

struct HumanReadableOutput;

fn stats_line(label: &str, stats: &Option<SummaryStats>) -> String {
    match stats {
        Some(s) => format!(
            "  {label}: mean={:.4} min={:.4} p50={:.4} p90={:.4} p99={:.4} max={:.4}",
            s.mean, s.min, s.p50, s.p90, s.p99, s.max
        ),
        None => format!("  {label}: -"),
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, config_path: &Path, load: &LoadConfig) {
        let total: std::time::Duration = load.stages.iter().map(|s| s.duration).sum();
        eprintln!(
            "config={} load={} stages={} total_duration={} max_concurrency={}",
            config_path.display(),
            load.load_type,
            load.stages.len(),
            humantime::format_duration(total),
            load.max_concurrency,
        );
    }

    fn print_summary(
        &self,
        lifecycle: &LifecycleReport,
        model_server: Option<&ModelServerReport>,
    ) -> anyhow::Result<()> {
        let overall = &lifecycle.overall;
        println!(
            "requests: {} dispatched, {} ok, {} failed",
            overall.load.count, overall.successes.count, overall.failures.count
        );
        println!("{}", stats_line("request_latency (s)", &overall.successes.request_latency));
        println!(
            "{}",
            stats_line(
                "time_to_first_token (s)",
                &overall.successes.time_to_first_token
            )
        );
        println!("{}", stats_line("output_len (tokens)", &overall.successes.output_len));
        println!(
            "{}",
            stats_line(
                "time_per_output_token (s)",
                &overall.successes.normalized_time_per_output_token
            )
        );

        for stage in &lifecycle.stages {
            println!(
                "stage {}: {} dispatched, {} ok, {} failed",
                stage.stage_id,
                stage.summary.load.count,
                stage.summary.successes.count,
                stage.summary.failures.count
            );
        }

        if let Some(report) = model_server {
            println!("model server metrics:");
            for (name, value) in report {
                match value {
                    Some(value) => println!("  {name}: {}", serde_json::to_string(value)?),
                    None => println!("  {name}: unavailable"),
                }
            }
        }

        Ok(())
    }
}

struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _config_path: &Path, _load: &LoadConfig) {}

    fn print_summary(
        &self,
        lifecycle: &LifecycleReport,
        model_server: Option<&ModelServerReport>,
    ) -> anyhow::Result<()> {
        let combined = serde_json::json!({
            "lifecycle": lifecycle,
            "model_server": model_server,
        });
        println!("{}", serde_json::to_string(&combined)?);
        Ok(())
    }
}
