mod api;
mod backend;
mod datagen;
mod distribution;
mod error;
mod loadgen;
mod mock;
mod outputs;
mod recorder;
mod report;
mod tokenizer;

pub mod config;
pub mod http;
pub mod prometheus;

pub use api::{ApiKind, ChatMessage, RequestDescriptor, ResponseInfo};
pub use backend::{
    BackendAdapter, CompletedRequest, ErrorInfo, HttpModelServerClient, ModelServerClient,
    OpenAiAdapter, RequestError, StreamParser, WireRequest,
};
pub use datagen::{DataGenKind, MockGenerator, SyntheticGenerator, WorkloadGenerator};
pub use distribution::{DistributionSpec, sample_lengths};
pub use error::{Error, Result};
pub use loadgen::{
    LoadConfig, LoadStage, LoadType, RunWindow, ScheduledSlot, build_schedule, run_benchmark,
};
pub use mock::MockModelServerClient;
pub use outputs::write_report_files;
pub use recorder::{LifecycleRecord, Outcome, RequestRecorder};
pub use report::{
    FailureSummary, LifecycleReport, LoadSummary, PerRequestRow, ReportFile, ResponsesSummary,
    StageSummary, SuccessSummary, SummaryStats, build_lifecycle_report, summarize_records,
};
pub use tokenizer::{Tokenizer, WhitespaceTokenizer};
