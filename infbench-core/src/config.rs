//! YAML run configuration. Every section has a sensible default so a minimal
//! file only needs the server address; `validate` catches the rest before any
//! request is sent.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer};

use crate::api::ApiKind;
use crate::datagen::DataGenKind;
use crate::distribution::DistributionSpec;
use crate::error::{Error, Result};
use crate::loadgen::{LoadConfig, LoadStage, LoadType};
use crate::prometheus::PrometheusConfig;

fn secs<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
    let value = f64::deserialize(d)?;
    if !value.is_finite() || value < 0.0 {
        return Err(serde::de::Error::custom("duration must be a number of seconds >= 0"));
    }
    Ok(Duration::from_secs_f64(value))
}

fn opt_secs<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<Duration>, D::Error> {
    let value = Option::<f64>::deserialize(d)?;
    match value {
        None => Ok(None),
        Some(v) if v.is_finite() && v >= 0.0 => Ok(Some(Duration::from_secs_f64(v))),
        Some(_) => Err(serde::de::Error::custom("duration must be a number of seconds >= 0")),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiKind,
    pub data: DataConfig,
    pub load: LoadSection,
    pub server: Option<ServerConfig>,
    pub metrics: MetricsConfig,
    pub report: ReportConfig,
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiKind::Completion,
            data: DataConfig::default(),
            load: LoadSection::default(),
            server: None,
            metrics: MetricsConfig::default(),
            report: ReportConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.load.to_load_config().validate()?;
        if let Some(ServerConfig::Vllm { base_url, .. }) = &self.server {
            let parsed = url::Url::parse(base_url)
                .map_err(|_| Error::InvalidBaseUrl(base_url.clone()))?;
            if parsed.scheme() != "http" {
                return Err(Error::InvalidBaseUrl(base_url.clone()));
            }
        }
        if self.data.kind == DataGenKind::Synthetic
            && (self.data.input_distribution.is_none() || self.data.output_distribution.is_none())
        {
            return Err(Error::MissingDistribution);
        }
        if let Some(spec) = &self.data.input_distribution {
            spec.validate()?;
        }
        if let Some(spec) = &self.data.output_distribution {
            spec.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    #[serde(rename = "type")]
    pub kind: DataGenKind,
    pub input_distribution: Option<DistributionSpec>,
    pub output_distribution: Option<DistributionSpec>,
    /// Output cap used by the mock generator, which has no distributions.
    pub max_tokens: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            kind: DataGenKind::Synthetic,
            input_distribution: None,
            output_distribution: None,
            max_tokens: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoadSection {
    #[serde(rename = "type")]
    pub load_type: LoadType,
    pub stages: Vec<StageSection>,
    pub max_concurrency: usize,
    #[serde(deserialize_with = "opt_secs")]
    pub request_timeout: Option<Duration>,
    #[serde(deserialize_with = "opt_secs")]
    pub max_run_duration: Option<Duration>,
    pub cancel_on_deadline: bool,
    pub seed: Option<u64>,
}

impl Default for LoadSection {
    fn default() -> Self {
        Self {
            load_type: LoadType::Constant,
            stages: vec![StageSection {
                rate: 1.0,
                duration: Duration::from_secs(1),
            }],
            max_concurrency: 256,
            request_timeout: None,
            max_run_duration: None,
            cancel_on_deadline: false,
            seed: None,
        }
    }
}

impl LoadSection {
    pub fn to_load_config(&self) -> LoadConfig {
        LoadConfig {
            load_type: self.load_type,
            stages: self
                .stages
                .iter()
                .map(|s| LoadStage {
                    rate: s.rate,
                    duration: s.duration,
                })
                .collect(),
            max_concurrency: self.max_concurrency,
            request_timeout: self.request_timeout,
            max_run_duration: self.max_run_duration,
            cancel_on_deadline: self.cancel_on_deadline,
            seed: self.seed,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StageSection {
    pub rate: f64,
    #[serde(deserialize_with = "secs")]
    pub duration: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerConfig {
    Vllm {
        model_name: String,
        base_url: String,
        #[serde(default = "default_true")]
        ignore_eos: bool,
        #[serde(default)]
        streaming: bool,
    },
    Mock {
        #[serde(default = "default_mock_delay", deserialize_with = "secs")]
        delay: Duration,
        #[serde(default)]
        failure_ratio: f64,
    },
}

fn default_true() -> bool {
    true
}

fn default_mock_delay() -> Duration {
    Duration::from_millis(10)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub prometheus: Option<PrometheusSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrometheusSection {
    pub url: String,
    #[serde(deserialize_with = "secs")]
    pub scrape_interval: Duration,
}

impl Default for PrometheusSection {
    fn default() -> Self {
        let defaults = PrometheusConfig::default();
        Self {
            url: defaults.url,
            scrape_interval: defaults.scrape_interval,
        }
    }
}

impl PrometheusSection {
    pub fn to_prometheus_config(&self) -> PrometheusConfig {
        PrometheusConfig {
            url: self.url.clone(),
            scrape_interval: self.scrape_interval,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub summary: bool,
    pub per_request: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            summary: true,
            per_request: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: Option<String>,
    pub report_file_prefix: Option<String>,
}

impl StorageConfig {
    /// Configured path, or a timestamped `reports-<epoch>` directory.
    pub fn report_dir(&self) -> String {
        match &self.path {
            Some(path) => path.clone(),
            None => {
                let epoch = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or_default();
                format!("reports-{epoch}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_config() {
        let yaml = r#"
api: completion
data:
  type: synthetic
  input_distribution: { min: 10, max: 100, mean: 50, std_dev: 20, total_count: 300 }
  output_distribution: { min: 5, max: 60, mean: 30, std_dev: 10, total_count: 300 }
load:
  type: poisson
  stages:
    - { rate: 5, duration: 30 }
    - { rate: 10.5, duration: 60 }
  max_concurrency: 32
  request_timeout: 15
  seed: 42
server:
  type: vllm
  model_name: llama
  base_url: http://localhost:8000
  streaming: true
metrics:
  prometheus:
    url: http://localhost:9090
report:
  per_request: true
"#;
        let config = Config::from_yaml(yaml).unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert_eq!(config.api, ApiKind::Completion);
        assert_eq!(config.data.kind, DataGenKind::Synthetic);

        let load = config.load.to_load_config();
        assert_eq!(load.load_type, LoadType::Poisson);
        assert_eq!(load.stages.len(), 2);
        assert_eq!(load.stages[1].rate, 10.5);
        assert_eq!(load.stages[1].duration, Duration::from_secs(60));
        assert_eq!(load.max_concurrency, 32);
        assert_eq!(load.request_timeout, Some(Duration::from_secs(15)));
        assert_eq!(load.seed, Some(42));

        match config.server {
            Some(ServerConfig::Vllm {
                model_name,
                streaming,
                ignore_eos,
                ..
            }) => {
                assert_eq!(model_name, "llama");
                assert!(streaming);
                assert!(ignore_eos, "defaults to true");
            }
            other => panic!("unexpected server config: {other:?}"),
        }

        assert!(config.metrics.prometheus.is_some());
        assert!(config.report.per_request);
        assert!(config.report.summary, "defaults to true");
    }

    #[test]
    fn minimal_mock_config_uses_defaults() {
        let yaml = r#"
data:
  type: mock
server:
  type: mock
"#;
        let config = Config::from_yaml(yaml).unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert_eq!(config.load.to_load_config().stages.len(), 1);
        match config.server {
            Some(ServerConfig::Mock {
                delay,
                failure_ratio,
            }) => {
                assert_eq!(delay, Duration::from_millis(10));
                assert_eq!(failure_ratio, 0.0);
            }
            other => panic!("unexpected server config: {other:?}"),
        }
    }

    #[test]
    fn synthetic_data_requires_distributions() {
        let yaml = "data:\n  type: synthetic\n";
        assert!(matches!(
            Config::from_yaml(yaml),
            Err(Error::MissingDistribution)
        ));
    }

    #[test]
    fn rejects_non_http_server_urls() {
        let yaml = r#"
data: { type: mock }
server:
  type: vllm
  model_name: llama
  base_url: https://localhost:8000
"#;
        assert!(matches!(
            Config::from_yaml(yaml),
            Err(Error::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn rejects_negative_durations() {
        let yaml = "load:\n  stages:\n    - { rate: 1, duration: -5 }\n";
        assert!(Config::from_yaml(yaml).is_err());
    }
}
