pub type Result<T> = std::result::Result<T, Error>;

/// Configuration-time errors. These are the only errors that abort a run;
/// per-request and per-metric failures are captured as data instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("failed to parse config: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("failed to encode report: {0}")]
    ReportEncode(#[from] serde_json::Error),

    #[error("`min` must be <= `max` in a distribution spec")]
    InvalidDistributionBounds,

    #[error("`mean` must lie within [min, max]")]
    InvalidDistributionMean,

    #[error("`std_dev` must be finite and >= 0")]
    InvalidDistributionStdDev,

    #[error("`total_count` must be a positive integer")]
    InvalidTotalCount,

    #[error("unsupported api type `{0}` for this component")]
    UnsupportedApi(crate::ApiKind),

    #[error("input and output distributions are required for the synthetic generator")]
    MissingDistribution,

    #[error("reference corpus has {corpus} tokens but the input distribution requires up to {required}")]
    CorpusTooShort { corpus: usize, required: u64 },

    #[error("`stages` must be a non-empty array of {{ rate, duration }}")]
    InvalidStages,

    #[error("`rate` must be a positive number")]
    InvalidRate,

    #[error("`max_concurrency` must be a positive integer")]
    InvalidConcurrency,

    #[error("invalid server base url: `{0}`")]
    InvalidBaseUrl(String),

    #[error("invalid output path: `{0}`")]
    InvalidOutputPath(String),
}
