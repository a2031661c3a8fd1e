// Analysis service
// Runs normalize -> extract -> classify -> decide -> summarize for one
// recording and turns every failure into a typed, reportable error

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

use crate::audio::{NormalizationError, Normalizer};
use crate::events::explainability::{candidate_conditions, fallback_summary, render_summary};
use crate::events::{
    AcousticIndicators, ClassProbabilities, ClassifierError, DecisionEngine, DecisionResult,
    ModelStore, PredictionSource, SimplifiedLabel, TaskType,
};
use crate::features::{ExtractionError, FeatureExtractor, FunctionalBackend};
use crate::pipeline::config::AnalysisConfig;
use crate::pipeline::trace::{Stage, TraceBuilder, TraceWriter};

/// Label reported when no model is available
pub const FALLBACK_LABEL: &str = "normal";

/// Errors that abort an analysis
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Normalization(#[from] NormalizationError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error("Analysis timed out after {0:?}")]
    Timeout(Duration),

    #[error("Analysis worker failed: {0}")]
    Worker(String),
}

impl PipelineError {
    /// Stable error kind for callers
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Normalization(_) => "audio_normalization_error",
            PipelineError::Extraction(_) => "extraction_error",
            PipelineError::Classifier(_) => "model_error",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::Worker(_) => "worker_error",
        }
    }

    pub fn to_report(&self) -> FailureReport {
        FailureReport {
            error: self.kind().to_string(),
            detail: self.to_string(),
        }
    }
}

/// Failure shape returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub error: String,
    pub detail: String,
}

/// Per-request settings layered over the service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzeOptions {
    /// Minimum clip duration in seconds (configured minimum when unset)
    pub min_duration: Option<f64>,
}

impl AnalyzeOptions {
    pub fn with_min_duration(min_duration: f64) -> Self {
        AnalyzeOptions {
            min_duration: Some(min_duration),
        }
    }
}

/// Result of analyzing one recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    #[serde(flatten)]
    pub decision: DecisionResult,

    pub possible_conditions: Vec<String>,

    pub text_summary: String,

    pub source: PredictionSource,

    pub task: TaskType,

    /// Wall-clock seconds spent in the pipeline
    pub processing_time: f64,

    /// Seconds of canonical audio analyzed (0 on fallback)
    pub duration: f64,

    /// Hex SHA-256 of the input file
    pub input_sha256: String,

    pub analysis_id: Uuid,

    /// Indicators the decision was based on (absent on fallback)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indicators: Option<AcousticIndicators>,
}

/// Thread-safe analysis pipeline; share as `Arc<AnalysisService>`
pub struct AnalysisService {
    normalizer: Normalizer,
    extractor: FeatureExtractor,
    engine: DecisionEngine,
    models: ModelStore,
    trace: Option<TraceWriter>,
}

impl AnalysisService {
    pub fn new(config: AnalysisConfig, models: ModelStore) -> Self {
        AnalysisService {
            normalizer: Normalizer::new(config.normalizer),
            extractor: FeatureExtractor::new(config.features),
            engine: DecisionEngine::new(config.decision),
            models,
            trace: config.trace_path.map(TraceWriter::new),
        }
    }

    /// Service whose model is loaded lazily from the configured paths
    pub fn from_config(config: AnalysisConfig) -> Self {
        let models = ModelStore::from_paths(config.models.clone());
        Self::new(config, models)
    }

    /// Replace the functional feature backend
    pub fn with_functional_backend(mut self, backend: Arc<dyn FunctionalBackend>) -> Self {
        self.extractor = FeatureExtractor::with_backend(self.extractor.config().clone(), backend);
        self
    }

    pub fn models(&self) -> &ModelStore {
        &self.models
    }

    /// Analyze one recording on the current thread
    pub fn analyze(
        &self,
        input: &Path,
        task: TaskType,
        options: &AnalyzeOptions,
    ) -> Result<AnalysisOutcome, PipelineError> {
        let started = Instant::now();
        let trace = TraceBuilder::new(Uuid::new_v4(), self.trace.clone());

        let result = self.run(input, task, options, &trace, started);
        if let Err(e) = &result {
            log::warn!("Analysis of {} failed: {}", input.display(), e);
            trace.stage_with(
                Stage::Failed,
                e.to_string(),
                serde_json::json!({ "error": e.kind() }),
            );
        }

        result
    }

    /// Analyze on the blocking pool, giving up after `timeout`
    ///
    /// A timed-out analysis keeps running in the background until it
    /// finishes; its temporary files are released when it does.
    pub async fn analyze_with_timeout(
        self: Arc<Self>,
        input: PathBuf,
        task: TaskType,
        options: AnalyzeOptions,
        timeout: Duration,
    ) -> Result<AnalysisOutcome, PipelineError> {
        let handle = tokio::task::spawn_blocking(move || self.analyze(&input, task, &options));

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(PipelineError::Worker(join_error.to_string())),
            Err(_) => Err(PipelineError::Timeout(timeout)),
        }
    }

    fn run(
        &self,
        input: &Path,
        task: TaskType,
        options: &AnalyzeOptions,
        trace: &TraceBuilder,
        started: Instant,
    ) -> Result<AnalysisOutcome, PipelineError> {
        // Input problems are reported even when no model is installed
        let audio = self.normalizer.normalize(input, task, options.min_duration)?;
        trace.stage_with(
            Stage::Normalize,
            "Normalized input audio",
            serde_json::json!({
                "duration": audio.duration_secs,
                "input_sha256": audio.source_sha256,
            }),
        );

        let classifier = match self.models.get_or_load() {
            Ok(classifier) => classifier,
            Err(e) if e.is_unavailable() => {
                log::warn!("Model unavailable, returning fallback result: {}", e);
                let outcome = fallback_outcome(
                    task,
                    &e.to_string(),
                    audio.source_sha256.clone(),
                    trace.analysis_id(),
                    started.elapsed().as_secs_f64(),
                );
                trace.stage(Stage::Fallback, e.to_string());
                return Ok(outcome);
            }
            Err(e) => return Err(e.into()),
        };

        let (features, indicators) = self.extractor.extract(&audio, task)?;
        trace.stage_with(
            Stage::Extract,
            "Extracted features",
            serde_json::json!({
                "source": features.source,
                "raw_len": features.raw_len,
                "indicators": indicators,
            }),
        );

        let prediction = classifier.classify(&features)?;
        trace.stage_with(
            Stage::Classify,
            "Model prediction",
            serde_json::json!({ "label": prediction.label, "confidence": prediction.confidence }),
        );

        let decision = self.engine.decide(&prediction, &indicators);
        trace.stage_with(
            Stage::Decide,
            "Decision",
            serde_json::json!({
                "label": decision.label,
                "confidence": decision.confidence,
                "applied_rules": decision.applied_rules,
            }),
        );

        let possible_conditions = candidate_conditions(&decision.label);
        let text_summary = render_summary(&decision, task, &possible_conditions);

        let outcome = AnalysisOutcome {
            possible_conditions,
            text_summary,
            source: prediction.source,
            task,
            processing_time: started.elapsed().as_secs_f64(),
            duration: audio.duration_secs,
            input_sha256: audio.source_sha256.clone(),
            analysis_id: trace.analysis_id(),
            indicators: Some(indicators),
            decision,
        };
        trace.stage(Stage::Summarize, "Analysis complete");

        log::info!(
            "Analyzed {} as {} ({:.2}) in {:.3}s",
            input.display(),
            outcome.decision.label,
            outcome.decision.confidence,
            outcome.processing_time
        );

        Ok(outcome)
    }
}

fn fallback_outcome(
    task: TaskType,
    reason: &str,
    input_sha256: String,
    analysis_id: Uuid,
    processing_time: f64,
) -> AnalysisOutcome {
    AnalysisOutcome {
        decision: DecisionResult {
            label: FALLBACK_LABEL.to_string(),
            confidence: 1.0,
            class_probabilities: ClassProbabilities::certain(FALLBACK_LABEL),
            low_confidence: false,
            simplified_label: SimplifiedLabel::Normal,
            original_label: FALLBACK_LABEL.to_string(),
            applied_rules: Vec::new(),
        },
        possible_conditions: candidate_conditions(FALLBACK_LABEL),
        text_summary: fallback_summary(reason),
        source: PredictionSource::Fallback,
        task,
        processing_time,
        duration: 0.0,
        input_sha256,
        analysis_id,
        indicators: None,
    }
}
