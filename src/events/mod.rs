// Event classification module
// Shared types, model loading, the base classifier, the heuristic decision
// engine and the clinical summary

pub mod backend;
pub mod explainability;
pub mod heuristic;
pub mod labels;
pub mod model;
pub mod types;

pub use backend::{Classifier, ClassifierBackend, ClassifierError, ModelPrediction, PredictionSource};
pub use explainability::{candidate_conditions, fallback_summary, render_summary};
pub use heuristic::{DecisionConfig, DecisionEngine, DecisionResult, DecisionRule};
pub use labels::LabelMap;
pub use model::{ModelFile, ModelPaths, ModelStore, ProbabilisticModel, RemoteInference};
pub use types::{AcousticIndicators, ClassProbabilities, Indicator, SimplifiedLabel, TaskType};
