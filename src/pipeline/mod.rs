// Pipeline execution and monitoring module
// Wires normalization, features, classification, decision and summary into
// one analysis call, with configuration and a JSONL stage trace

pub mod config;
pub mod service;
pub mod trace;

pub use config::{AnalysisConfig, ConfigError};
pub use service::{AnalysisOutcome, AnalysisService, AnalyzeOptions, FailureReport, PipelineError};
pub use trace::{read_trace_file, Stage, TraceBuilder, TraceEntry, TraceError, TraceWriter};
