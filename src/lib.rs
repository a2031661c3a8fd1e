// breathscan - breath and speech acoustic event classification
// Module declarations and the public entry points

pub mod audio;
pub mod events;
pub mod features;
pub mod pipeline;

pub use audio::{NormalizedAudio, Normalizer, NormalizerConfig};
pub use events::{
    AcousticIndicators, ClassProbabilities, Classifier, DecisionEngine, DecisionResult, LabelMap,
    ModelStore, SimplifiedLabel, TaskType,
};
pub use features::{FeatureExtractor, FeatureVector};
pub use pipeline::{
    AnalysisConfig, AnalysisOutcome, AnalysisService, AnalyzeOptions, FailureReport, PipelineError,
};
