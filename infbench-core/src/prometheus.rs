//! Queries a Prometheus server for model-server-side metrics after a run,
//! bounded to the run's wall-clock window.

use std::collections::BTreeMap;
use std::time::{Duration, UNIX_EPOCH};

use serde::Serialize;

use crate::http::HttpClient;
use crate::loadgen::RunWindow;

/// Extra slack added to the query window so the last scrape after the run
/// end is still covered.
const SCRAPE_BUFFER: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PrometheusConfig {
    pub url: String,
    pub scrape_interval: Duration,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9090".to_string(),
            scrape_interval: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
    Histogram,
}

/// One exported time series, queried as a distribution summary over the run
/// window. The query set depends on the metric kind: gauges use the
/// `*_over_time` family, counters summarize their rate over a subquery, and
/// histograms go through `histogram_quantile` on bucket rates.
#[derive(Debug, Clone)]
pub struct VectorMetric {
    pub kind: MetricKind,
    pub name: String,
    pub filters: Vec<String>,
}

impl VectorMetric {
    pub fn new(kind: MetricKind, name: impl Into<String>, filters: Vec<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            filters,
        }
    }

    fn label_filter(&self) -> String {
        self.filters.join(",")
    }

    pub fn query_set(&self, window_secs: u64) -> Vec<(&'static str, String)> {
        let name = &self.name;
        let f = self.label_filter();
        let d = window_secs;

        match self.kind {
            MetricKind::Gauge => vec![
                ("mean", format!("avg_over_time({name}{{{f}}}[{d}s])")),
                ("median", format!("quantile_over_time(0.5, {name}{{{f}}}[{d}s])")),
                ("sd", format!("stddev_over_time({name}{{{f}}}[{d}s])")),
                ("min", format!("min_over_time({name}{{{f}}}[{d}s])")),
                ("max", format!("max_over_time({name}{{{f}}}[{d}s])")),
                ("p90", format!("quantile_over_time(0.9, {name}{{{f}}}[{d}s])")),
                ("p99", format!("quantile_over_time(0.99, {name}{{{f}}}[{d}s])")),
            ],
            MetricKind::Counter => vec![
                ("rate", format!("sum(rate({name}{{{f}}}[{d}s]))")),
                ("increase", format!("sum(increase({name}{{{f}}}[{d}s]))")),
                (
                    "mean",
                    format!("avg_over_time(rate({name}{{{f}}}[{d}s])[{d}s:{d}s])"),
                ),
                (
                    "max",
                    format!("max_over_time(rate({name}{{{f}}}[{d}s])[{d}s:{d}s])"),
                ),
                (
                    "min",
                    format!("min_over_time(rate({name}{{{f}}}[{d}s])[{d}s:{d}s])"),
                ),
                (
                    "p90",
                    format!("quantile_over_time(0.9, rate({name}{{{f}}}[{d}s])[{d}s:{d}s])"),
                ),
                (
                    "p99",
                    format!("quantile_over_time(0.99, rate({name}{{{f}}}[{d}s])[{d}s:{d}s])"),
                ),
            ],
            MetricKind::Histogram => {
                let buckets = format!("sum(rate({name}_bucket{{{f}}}[{d}s])) by (le)");
                vec![
                    (
                        "mean",
                        format!(
                            "sum(rate({name}_sum{{{f}}}[{d}s])) / (sum(rate({name}_count{{{f}}}[{d}s])) > 0)"
                        ),
                    ),
                    ("median", format!("histogram_quantile(0.5, {buckets})")),
                    ("min", format!("histogram_quantile(0, {buckets})")),
                    ("max", format!("histogram_quantile(1, {buckets})")),
                    ("p90", format!("histogram_quantile(0.9, {buckets})")),
                    ("p99", format!("histogram_quantile(0.99, {buckets})")),
                ]
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarAggregation {
    Rate,
    Increase,
}

/// A single-number view of a counter, such as total request count or mean
/// request rate over the window.
#[derive(Debug, Clone)]
pub struct ScalarMetric {
    pub aggregation: ScalarAggregation,
    pub metric: VectorMetric,
}

impl ScalarMetric {
    pub fn query(&self, window_secs: u64) -> String {
        let name = &self.metric.name;
        let f = self.metric.label_filter();
        let d = window_secs;
        match self.aggregation {
            ScalarAggregation::Rate => format!("sum(rate({name}{{{f}}}[{d}s]))"),
            ScalarAggregation::Increase => format!("sum(increase({name}{{{f}}}[{d}s]))"),
        }
    }
}

/// The set of server-side series one backend exports. Required metrics are
/// present on every conforming server; optional ones are reported as
/// unavailable when the server does not export them.
#[derive(Debug, Clone)]
pub struct ModelServerMetricsMetadata {
    pub request_count: ScalarMetric,
    pub request_rate: ScalarMetric,
    pub prompt_len: VectorMetric,
    pub output_len: VectorMetric,
    pub queue_len: VectorMetric,
    pub kv_cache_usage: VectorMetric,
    pub request_latency: VectorMetric,
    pub time_to_first_token: VectorMetric,

    pub time_per_output_token: Option<VectorMetric>,
    pub num_requests_swapped: Option<VectorMetric>,
    pub num_preemptions: Option<VectorMetric>,
    pub prefix_cache_hits: Option<VectorMetric>,
    pub prefix_cache_queries: Option<VectorMetric>,
}

impl ModelServerMetricsMetadata {
    /// Metric mapping for a vLLM server, filtered to one served model.
    pub fn vllm(model_name: &str) -> Self {
        let filters = vec![format!("model_name='{model_name}'")];
        let counter = |name: &str| VectorMetric::new(MetricKind::Counter, name, filters.clone());
        let gauge = |name: &str| VectorMetric::new(MetricKind::Gauge, name, filters.clone());
        let histogram =
            |name: &str| VectorMetric::new(MetricKind::Histogram, name, filters.clone());

        Self {
            request_count: ScalarMetric {
                aggregation: ScalarAggregation::Increase,
                metric: counter("vllm:e2e_request_latency_seconds_count"),
            },
            request_rate: ScalarMetric {
                aggregation: ScalarAggregation::Rate,
                metric: counter("vllm:e2e_request_latency_seconds_count"),
            },
            prompt_len: counter("vllm:prompt_tokens_total"),
            output_len: counter("vllm:generation_tokens_total"),
            queue_len: gauge("vllm:num_requests_waiting"),
            kv_cache_usage: gauge("vllm:gpu_cache_usage_perc"),
            request_latency: histogram("vllm:e2e_request_latency_seconds"),
            time_to_first_token: histogram("vllm:time_to_first_token_seconds"),

            time_per_output_token: Some(histogram("vllm:time_per_output_token_seconds")),
            num_requests_swapped: Some(gauge("vllm:num_requests_swapped")),
            num_preemptions: Some(gauge("vllm:num_preemptions_total")),
            prefix_cache_hits: Some(counter("vllm:gpu_prefix_cache_hits_total")),
            prefix_cache_queries: Some(counter("vllm:gpu_prefix_cache_queries_total")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Scalar(f64),
    Summary(BTreeMap<&'static str, f64>),
}

/// Keyed by metric name; `None` marks a metric that was unavailable (not
/// exported, or every query against it failed). Never coerced to zero.
pub type ModelServerReport = BTreeMap<String, Option<MetricValue>>;

pub struct PrometheusCollector {
    http: HttpClient,
    base_url: String,
}

impl PrometheusCollector {
    pub fn new(config: &PrometheusConfig) -> Self {
        let mut base_url = config.url.clone();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: HttpClient::default(),
            base_url,
        }
    }

    /// Queries every metric in the metadata over the run window and
    /// assembles the server-side report. Query failures degrade to missing
    /// values rather than aborting.
    pub async fn collect(
        &self,
        metadata: &ModelServerMetricsMetadata,
        window: &RunWindow,
    ) -> ModelServerReport {
        let window_secs = window.duration.as_secs().max(1) + SCRAPE_BUFFER.as_secs();
        let eval_time = (window.started_at + window.duration + SCRAPE_BUFFER)
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();

        let mut report = ModelServerReport::new();
        report.insert(
            "request_count".to_string(),
            self.scalar(&metadata.request_count, window_secs, eval_time)
                .await,
        );
        report.insert(
            "request_rate".to_string(),
            self.scalar(&metadata.request_rate, window_secs, eval_time)
                .await,
        );

        let vectors: [(&str, Option<&VectorMetric>); 11] = [
            ("prompt_len", Some(&metadata.prompt_len)),
            ("output_len", Some(&metadata.output_len)),
            ("queue_len", Some(&metadata.queue_len)),
            ("kv_cache_usage", Some(&metadata.kv_cache_usage)),
            ("request_latency", Some(&metadata.request_latency)),
            ("time_to_first_token", Some(&metadata.time_to_first_token)),
            (
                "time_per_output_token",
                metadata.time_per_output_token.as_ref(),
            ),
            (
                "num_requests_swapped",
                metadata.num_requests_swapped.as_ref(),
            ),
            ("num_preemptions", metadata.num_preemptions.as_ref()),
            ("prefix_cache_hits", metadata.prefix_cache_hits.as_ref()),
            (
                "prefix_cache_queries",
                metadata.prefix_cache_queries.as_ref(),
            ),
        ];
        for (key, metric) in vectors {
            let value = match metric {
                Some(metric) => self.summary(metric, window_secs, eval_time).await,
                None => None,
            };
            report.insert(key.to_string(), value);
        }

        report
    }

    async fn scalar(
        &self,
        metric: &ScalarMetric,
        window_secs: u64,
        eval_time: f64,
    ) -> Option<MetricValue> {
        self.query(&metric.query(window_secs), eval_time)
            .await
            .map(MetricValue::Scalar)
    }

    async fn summary(
        &self,
        metric: &VectorMetric,
        window_secs: u64,
        eval_time: f64,
    ) -> Option<MetricValue> {
        let mut summary = BTreeMap::new();
        for (stat, query) in metric.query_set(window_secs) {
            if let Some(value) = self.query(&query, eval_time).await {
                summary.insert(stat, value);
            }
        }
        if summary.is_empty() {
            None
        } else {
            Some(MetricValue::Summary(summary))
        }
    }

    async fn query(&self, query: &str, eval_time: f64) -> Option<f64> {
        let url = match url::Url::parse(&format!("{}/api/v1/query", self.base_url)) {
            Ok(mut url) => {
                url.query_pairs_mut()
                    .append_pair("query", query)
                    .append_pair("time", &format!("{eval_time}"));
                url
            }
            Err(e) => {
                tracing::warn!(error = %e, "invalid prometheus url");
                return None;
            }
        };

        let response = match self.http.get(url.as_str()).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(%query, error = %e, "prometheus query failed");
                return None;
            }
        };
        if response.status != 200 {
            tracing::warn!(%query, status = response.status, "prometheus query rejected");
            return None;
        }

        let value = parse_query_value(&response.body);
        if value.is_none() {
            tracing::warn!(%query, "prometheus query returned no samples");
        }
        value
    }
}

/// Pulls the first sample value out of an instant-query response:
/// `data.result[0].value[1]`, a float encoded as a string.
fn parse_query_value(body: &[u8]) -> Option<f64> {
    let response: serde_json::Value = serde_json::from_slice(body).ok()?;
    if response.get("status")?.as_str()? != "success" {
        return None;
    }
    let value = response
        .get("data")?
        .get("result")?
        .get(0)?
        .get("value")?
        .get(1)?;
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        other => other.as_f64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauge_queries_use_over_time_functions() {
        let metric = VectorMetric::new(
            MetricKind::Gauge,
            "vllm:num_requests_waiting",
            vec!["model_name='m'".to_string()],
        );
        let queries: BTreeMap<_, _> = metric.query_set(300).into_iter().collect();
        assert_eq!(
            queries["mean"],
            "avg_over_time(vllm:num_requests_waiting{model_name='m'}[300s])"
        );
        assert_eq!(
            queries["p99"],
            "quantile_over_time(0.99, vllm:num_requests_waiting{model_name='m'}[300s])"
        );
    }

    #[test]
    fn histogram_queries_aggregate_bucket_rates() {
        let metric = VectorMetric::new(
            MetricKind::Histogram,
            "vllm:e2e_request_latency_seconds",
            vec![],
        );
        let queries: BTreeMap<_, _> = metric.query_set(60).into_iter().collect();
        assert_eq!(
            queries["p90"],
            "histogram_quantile(0.9, sum(rate(vllm:e2e_request_latency_seconds_bucket{}[60s])) by (le))"
        );
        assert_eq!(
            queries["mean"],
            "sum(rate(vllm:e2e_request_latency_seconds_sum{}[60s])) / (sum(rate(vllm:e2e_request_latency_seconds_count{}[60s])) > 0)"
        );
    }

    #[test]
    fn scalar_queries_wrap_the_counter() {
        let metadata = ModelServerMetricsMetadata::vllm("m");
        assert_eq!(
            metadata.request_count.query(60),
            "sum(increase(vllm:e2e_request_latency_seconds_count{model_name='m'}[60s]))"
        );
        assert_eq!(
            metadata.request_rate.query(60),
            "sum(rate(vllm:e2e_request_latency_seconds_count{model_name='m'}[60s]))"
        );
    }

    #[test]
    fn parses_instant_query_responses() {
        let body = br#"{"status":"success","data":{"resultType":"vector","result":[{"metric":{},"value":[1632741820.781,"12.5"]}]}}"#;
        assert_eq!(parse_query_value(body), Some(12.5));

        let empty = br#"{"status":"success","data":{"resultType":"vector","result":[]}}"#;
        assert_eq!(parse_query_value(empty), None);

        let error = br#"{"status":"error","errorType":"bad_data"}"#;
        assert_eq!(parse_query_value(error), None);

        assert_eq!(parse_query_value(b"not json"), None);
    }

    #[test]
    fn metric_values_serialize_flat() {
        let scalar = serde_json::to_value(MetricValue::Scalar(3.0))
            .unwrap_or_else(|e| panic!("serialize failed: {e}"));
        assert_eq!(scalar, serde_json::json!(3.0));

        let mut summary = BTreeMap::new();
        summary.insert("mean", 1.0);
        let summary = serde_json::to_value(MetricValue::Summary(summary))
            .unwrap_or_else(|e| panic!("serialize failed: {e}"));
        assert_eq!(summary, serde_json::json!({"mean": 1.0}));
    }
}
