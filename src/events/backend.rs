// Classifier backend abstraction
// Wraps a local or remote probabilistic model and turns its raw output into a
// labelled class distribution

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::events::labels::LabelMap;
use crate::events::model::{ModelOutput, ProbabilisticModel, RemoteInference, RemoteModel};
use crate::events::types::ClassProbabilities;
use crate::features::FeatureVector;

/// Where the model runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierBackend {
    /// Model loaded into this process
    Local,

    /// External inference capability
    Remote,
}

impl ClassifierBackend {
    pub fn source(&self) -> PredictionSource {
        match self {
            ClassifierBackend::Local => PredictionSource::Local,
            ClassifierBackend::Remote => PredictionSource::Remote,
        }
    }
}

/// Provenance of a prediction, reported with every outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionSource {
    Local,
    Remote,

    /// No model was available; the outcome is a fixed placeholder
    Fallback,
}

/// Errors that can occur during classification
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Label map invalid: {0}")]
    LabelMap(String),

    #[error("Feature vector has {actual} values, model expects {expected}")]
    FeatureLength { expected: usize, actual: usize },

    #[error("Inference failed: {0}")]
    Inference(String),
}

impl ClassifierError {
    /// Whether the error means "no usable model" rather than a bad request
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ClassifierError::ModelUnavailable(_)
                | ClassifierError::ModelLoad(_)
                | ClassifierError::LabelMap(_)
        )
    }
}

/// Labelled model output for one clip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub probabilities: ClassProbabilities,

    /// Most probable label
    pub label: String,

    /// Probability of `label`
    pub confidence: f32,

    pub source: PredictionSource,
}

impl ModelPrediction {
    /// Wrap a distribution, taking its argmax as the label
    pub fn from_probabilities(probabilities: ClassProbabilities, source: PredictionSource) -> Self {
        let (label, confidence) = probabilities
            .top()
            .map(|(l, p)| (l.to_string(), p))
            .unwrap_or_default();

        ModelPrediction {
            probabilities,
            label,
            confidence,
            source,
        }
    }
}

/// Unified classifier interface over local and remote models
#[derive(Clone)]
pub struct Classifier {
    model: Arc<dyn ProbabilisticModel>,
    labels: LabelMap,
    backend: ClassifierBackend,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("backend", &self.backend)
            .field("classes", &self.model.classes())
            .field("input_len", &self.model.input_len())
            .finish()
    }
}

impl Classifier {
    /// Create a classifier over an in-process model
    pub fn local(model: Arc<dyn ProbabilisticModel>, labels: LabelMap) -> Self {
        Classifier {
            model,
            labels,
            backend: ClassifierBackend::Local,
        }
    }

    /// Create a classifier that delegates inference to a remote capability
    pub fn remote(
        remote: Arc<dyn RemoteInference>,
        classes: Vec<u32>,
        input_len: usize,
        labels: LabelMap,
    ) -> Self {
        Classifier {
            model: Arc::new(RemoteModel::new(remote, classes, input_len)),
            labels,
            backend: ClassifierBackend::Remote,
        }
    }

    /// Get the current backend type
    pub fn backend(&self) -> ClassifierBackend {
        self.backend
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    /// Feature vector length the model accepts
    pub fn input_len(&self) -> usize {
        self.model.input_len()
    }

    /// Classify an assembled feature vector
    pub fn classify(&self, features: &FeatureVector) -> Result<ModelPrediction, ClassifierError> {
        self.classify_values(&features.values)
    }

    /// Classify raw feature values
    pub fn classify_values(&self, values: &[f32]) -> Result<ModelPrediction, ClassifierError> {
        let expected = self.model.input_len();
        if values.len() != expected {
            return Err(ClassifierError::FeatureLength {
                expected,
                actual: values.len(),
            });
        }

        let clean: Vec<f32> = values
            .iter()
            .map(|v| if v.is_finite() { *v } else { 0.0 })
            .collect();

        let classes = self.model.classes();
        let probabilities = match self.model.infer(&clean)? {
            ModelOutput::Probabilities(probs) => {
                if probs.len() != classes.len() {
                    return Err(ClassifierError::Inference(format!(
                        "model returned {} probabilities for {} classes",
                        probs.len(),
                        classes.len()
                    )));
                }
                ClassProbabilities::from_pairs(
                    classes
                        .iter()
                        .zip(probs)
                        .map(|(&c, p)| (self.labels.label_for(c), p)),
                )
            }
            ModelOutput::Hard(index) => {
                // One-hot over the known classes, plus the predicted one if unknown
                let mut pairs: Vec<(String, f32)> = classes
                    .iter()
                    .map(|&c| (self.labels.label_for(c), if c == index { 1.0 } else { 0.0 }))
                    .collect();
                if !classes.contains(&index) {
                    pairs.push((self.labels.label_for(index), 1.0));
                }
                ClassProbabilities::from_pairs(pairs)
            }
        };

        let prediction = ModelPrediction::from_probabilities(probabilities, self.backend.source());
        log::debug!(
            "Model predicted {} ({:.3}) via {:?}",
            prediction.label,
            prediction.confidence,
            self.backend
        );

        Ok(prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        classes: Vec<u32>,
        output: Vec<f32>,
    }

    impl ProbabilisticModel for Fixed {
        fn classes(&self) -> &[u32] {
            &self.classes
        }
        fn input_len(&self) -> usize {
            4
        }
        fn infer(&self, _features: &[f32]) -> Result<ModelOutput, ClassifierError> {
            Ok(ModelOutput::Probabilities(self.output.clone()))
        }
    }

    struct Hard(u32);

    impl ProbabilisticModel for Hard {
        fn classes(&self) -> &[u32] {
            &[0, 1, 2]
        }
        fn input_len(&self) -> usize {
            4
        }
        fn infer(&self, _features: &[f32]) -> Result<ModelOutput, ClassifierError> {
            Ok(ModelOutput::Hard(self.0))
        }
    }

    struct EchoRemote;

    impl RemoteInference for EchoRemote {
        fn endpoint(&self) -> &str {
            "test://echo"
        }
        fn infer(&self, _features: &[f32]) -> Result<ModelOutput, ClassifierError> {
            Ok(ModelOutput::Probabilities(vec![0.2, 0.8]))
        }
    }

    fn fixed(output: Vec<f32>) -> Classifier {
        let classes = (0..output.len() as u32).collect();
        Classifier::local(Arc::new(Fixed { classes, output }), LabelMap::default())
    }

    #[test]
    fn test_probabilities_are_labelled() {
        let prediction = fixed(vec![0.1, 0.7, 0.2]).classify_values(&[0.0; 4]).unwrap();

        assert_eq!(prediction.label, "cough");
        assert!((prediction.confidence - 0.7).abs() < 1e-6);
        assert!((prediction.probabilities.get("throat_clearing") - 0.2).abs() < 1e-6);
        assert_eq!(prediction.source, PredictionSource::Local);
    }

    #[test]
    fn test_invalid_probabilities_are_cleaned() {
        let prediction = fixed(vec![f32::NAN, -1.0, 2.0]).classify_values(&[0.0; 4]).unwrap();

        assert!((prediction.probabilities.sum() - 1.0).abs() < 1e-6);
        assert_eq!(prediction.label, "throat_clearing");
        assert_eq!(prediction.confidence, 1.0);
    }

    #[test]
    fn test_hard_prediction_is_one_hot() {
        let classifier = Classifier::local(Arc::new(Hard(2)), LabelMap::default());
        let prediction = classifier.classify_values(&[0.0; 4]).unwrap();

        assert_eq!(prediction.label, "throat_clearing");
        assert_eq!(prediction.confidence, 1.0);
        assert_eq!(prediction.probabilities.get("normal"), 0.0);
        assert_eq!(prediction.probabilities.len(), 3);
    }

    #[test]
    fn test_unmapped_class_uses_index() {
        let classifier = Classifier::local(Arc::new(Hard(9)), LabelMap::default());
        let prediction = classifier.classify_values(&[0.0; 4]).unwrap();
        assert_eq!(prediction.label, "9");
    }

    #[test]
    fn test_feature_length_checked() {
        let result = fixed(vec![0.5, 0.5]).classify_values(&[0.0; 3]);
        assert!(matches!(
            result,
            Err(ClassifierError::FeatureLength {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_probability_count_mismatch() {
        let classifier = Classifier::local(
            Arc::new(Fixed {
                classes: vec![0, 1, 2],
                output: vec![1.0],
            }),
            LabelMap::default(),
        );
        let result = classifier.classify_values(&[0.0; 4]);
        assert!(matches!(result, Err(ClassifierError::Inference(_))));
    }

    #[test]
    fn test_remote_backend() {
        let classifier = Classifier::remote(Arc::new(EchoRemote), vec![0, 1], 4, LabelMap::default());
        let prediction = classifier.classify_values(&[0.0; 4]).unwrap();

        assert_eq!(classifier.backend(), ClassifierBackend::Remote);
        assert_eq!(prediction.source, PredictionSource::Remote);
        assert_eq!(prediction.label, "cough");
    }

    #[test]
    fn test_unavailable_errors() {
        assert!(ClassifierError::ModelUnavailable("x".into()).is_unavailable());
        assert!(!ClassifierError::Inference("x".into()).is_unavailable());
    }
}
