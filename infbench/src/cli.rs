use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }

    let number_end = s
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map_or(s.len(), |(idx, _)| idx);

    if number_end == 0 {
        return Err(format!(
            "invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"
        ));
    }

    let (number_str, unit_str) = s.split_at(number_end);
    let value: u64 = number_str
        .parse()
        .map_err(|_| format!("invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"))?;

    match unit_str.trim() {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => Ok(Duration::from_secs(value)),
        "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => {
            Ok(Duration::from_millis(value))
        }
        "m" | "min" | "mins" | "minute" | "minutes" => {
            let secs = value
                .checked_mul(60)
                .ok_or_else(|| format!("duration '{s}' is too large"))?;
            Ok(Duration::from_secs(secs))
        }
        "h" | "hr" | "hrs" | "hour" | "hours" => {
            let secs = value
                .checked_mul(60)
                .and_then(|v| v.checked_mul(60))
                .ok_or_else(|| format!("duration '{s}' is too large"))?;
            Ok(Duration::from_secs(secs))
        }
        _ => Err(format!(
            "invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"
        )),
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary.
    HumanReadable,
    /// Emit the full report as JSON to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "infbench",
    author,
    version,
    about = "Open-loop inference benchmark for model servers",
    long_about = "infbench drives an OpenAI-compatible model server with an open-loop request schedule and reports client-side latency, server-side Prometheus metrics, or both.\n\nA YAML config file describes the workload (synthetic prompt/output length distributions), the load profile (constant or Poisson arrival stages), the target server, and the report outputs.",
    after_help = "Examples:\n  infbench run -c config.yaml\n  infbench run -c config.yaml --seed 42 --per-request\n  infbench run -c config.yaml --max-run-duration 2m --output json\n  infbench validate -c config.yaml"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a benchmark
    #[command(
        long_about = "Run the benchmark described by the config file. CLI flags override values from the config."
    )]
    Run(RunArgs),

    /// Parse and validate a config file without sending any requests
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the YAML config file
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,

    /// Override the arrival schedule seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override the in-flight request bound
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Override the hard run duration cap (e.g. 30s, 2m)
    #[arg(long, value_parser = parse_duration)]
    pub max_run_duration: Option<Duration>,

    /// Also dump one report row per request
    #[arg(long)]
    pub per_request: bool,

    /// Override the report output directory
    #[arg(long, value_name = "DIR")]
    pub report_dir: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Path to the YAML config file
    #[arg(short, long, value_name = "FILE")]
    pub config: PathBuf,
}
