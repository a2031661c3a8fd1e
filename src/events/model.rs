// Classification models
// The model trait, the JSON model formats we can load, remote inference, and
// the lazily-initialised shared model store

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::events::backend::{Classifier, ClassifierError};
use crate::events::labels::LabelMap;

/// Raw model output before labelling
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    /// One probability per entry of `classes()`
    Probabilities(Vec<f32>),

    /// A single predicted class index, for models without probabilities
    Hard(u32),
}

/// A trained classifier over fixed-length feature vectors
pub trait ProbabilisticModel: Send + Sync {
    /// Class indices in output order
    fn classes(&self) -> &[u32];

    /// Expected feature vector length
    fn input_len(&self) -> usize;

    fn infer(&self, features: &[f32]) -> Result<ModelOutput, ClassifierError>;
}

/// External inference capability (e.g. a hosted model endpoint)
pub trait RemoteInference: Send + Sync {
    /// Where requests go, for logs
    fn endpoint(&self) -> &str;

    fn infer(&self, features: &[f32]) -> Result<ModelOutput, ClassifierError>;
}

/// Adapts a `RemoteInference` to the local model interface
pub struct RemoteModel {
    remote: Arc<dyn RemoteInference>,
    classes: Vec<u32>,
    input_len: usize,
}

impl RemoteModel {
    pub fn new(remote: Arc<dyn RemoteInference>, classes: Vec<u32>, input_len: usize) -> Self {
        RemoteModel {
            remote,
            classes,
            input_len,
        }
    }
}

impl ProbabilisticModel for RemoteModel {
    fn classes(&self) -> &[u32] {
        &self.classes
    }

    fn input_len(&self) -> usize {
        self.input_len
    }

    fn infer(&self, features: &[f32]) -> Result<ModelOutput, ClassifierError> {
        log::debug!("Requesting remote inference from {}", self.remote.endpoint());
        self.remote.infer(features)
    }
}

/// Per-feature standardisation fitted at training time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f32>,
    pub scale: Vec<f32>,
}

impl StandardScaler {
    /// (x - mean) / scale; a zero scale passes the centred value through
    pub fn transform(&self, features: &[f32]) -> Vec<f32> {
        features
            .iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .map(|(x, (m, s))| {
                let s = if *s == 0.0 { 1.0 } else { *s };
                (x - m) / s
            })
            .collect()
    }
}

/// Multinomial logistic regression: softmax(W·x + b)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearSoftmax {
    /// Defaults to 0..rows when omitted
    #[serde(default)]
    pub classes: Vec<u32>,

    /// One row of N weights per class
    pub weights: Vec<Vec<f32>>,

    pub bias: Vec<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaler: Option<StandardScaler>,
}

impl ProbabilisticModel for LinearSoftmax {
    fn classes(&self) -> &[u32] {
        &self.classes
    }

    fn input_len(&self) -> usize {
        self.weights.first().map(|row| row.len()).unwrap_or(0)
    }

    fn infer(&self, features: &[f32]) -> Result<ModelOutput, ClassifierError> {
        let scaled;
        let x = match &self.scaler {
            Some(scaler) => {
                scaled = scaler.transform(features);
                &scaled[..]
            }
            None => features,
        };

        let logits: Vec<f32> = self
            .weights
            .iter()
            .zip(self.bias.iter())
            .map(|(row, b)| row.iter().zip(x.iter()).map(|(w, v)| w * v).sum::<f32>() + b)
            .collect();

        Ok(ModelOutput::Probabilities(softmax(&logits)))
    }
}

/// Nearest class centroid by Euclidean distance (hard predictions only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestCentroid {
    #[serde(default)]
    pub classes: Vec<u32>,

    pub centroids: Vec<Vec<f32>>,
}

impl ProbabilisticModel for NearestCentroid {
    fn classes(&self) -> &[u32] {
        &self.classes
    }

    fn input_len(&self) -> usize {
        self.centroids.first().map(|c| c.len()).unwrap_or(0)
    }

    fn infer(&self, features: &[f32]) -> Result<ModelOutput, ClassifierError> {
        let mut best: Option<(u32, f32)> = None;

        for (&class, centroid) in self.classes.iter().zip(self.centroids.iter()) {
            let distance = centroid
                .iter()
                .zip(features.iter())
                .map(|(c, x)| (c - x).powi(2))
                .sum::<f32>()
                .sqrt();

            match best {
                Some((_, d)) if distance >= d => {}
                _ => best = Some((class, distance)),
            }
        }

        best.map(|(class, _)| ModelOutput::Hard(class))
            .ok_or_else(|| ClassifierError::Inference("model has no centroids".to_string()))
    }
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }

    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.iter().map(|e| e / total).collect()
}

/// On-disk model formats, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelFile {
    LinearSoftmax(LinearSoftmax),
    NearestCentroid(NearestCentroid),
}

impl ModelFile {
    /// Deserialize from JSON bytes and check its shape
    pub fn from_json_bytes(data: &[u8]) -> Result<Self, ClassifierError> {
        let file: ModelFile =
            serde_json::from_slice(data).map_err(|e| ClassifierError::ModelLoad(e.to_string()))?;
        file.validated()
    }

    /// Serialize to JSON bytes
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    /// Load from disk; a missing file means the model is unavailable
    pub fn from_file(path: &Path) -> Result<Self, ClassifierError> {
        if !path.exists() {
            return Err(ClassifierError::ModelUnavailable(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        let data = std::fs::read(path)
            .map_err(|e| ClassifierError::ModelLoad(format!("{}: {e}", path.display())))?;
        Self::from_json_bytes(&data)
    }

    fn validated(self) -> Result<Self, ClassifierError> {
        fn check_rows(rows: &[Vec<f32>], what: &str) -> Result<usize, ClassifierError> {
            let width = rows.first().map(|r| r.len()).unwrap_or(0);
            if rows.is_empty() || width == 0 {
                return Err(ClassifierError::ModelLoad(format!("{what} are empty")));
            }
            if rows.iter().any(|r| r.len() != width) {
                return Err(ClassifierError::ModelLoad(format!("{what} are ragged")));
            }
            Ok(width)
        }

        fn check_classes(classes: &mut Vec<u32>, rows: usize) -> Result<(), ClassifierError> {
            if classes.is_empty() {
                *classes = (0..rows as u32).collect();
            }
            if classes.len() != rows {
                return Err(ClassifierError::ModelLoad(format!(
                    "{} classes for {} rows",
                    classes.len(),
                    rows
                )));
            }
            Ok(())
        }

        match self {
            ModelFile::LinearSoftmax(mut model) => {
                let width = check_rows(&model.weights, "weights")?;
                check_classes(&mut model.classes, model.weights.len())?;
                if model.bias.len() != model.weights.len() {
                    return Err(ClassifierError::ModelLoad(format!(
                        "bias has {} entries for {} classes",
                        model.bias.len(),
                        model.weights.len()
                    )));
                }
                if let Some(scaler) = &model.scaler {
                    if scaler.mean.len() != width || scaler.scale.len() != width {
                        return Err(ClassifierError::ModelLoad(
                            "scaler does not match weight width".to_string(),
                        ));
                    }
                }
                Ok(ModelFile::LinearSoftmax(model))
            }
            ModelFile::NearestCentroid(mut model) => {
                check_rows(&model.centroids, "centroids")?;
                check_classes(&mut model.classes, model.centroids.len())?;
                Ok(ModelFile::NearestCentroid(model))
            }
        }
    }

    pub fn into_model(self) -> Arc<dyn ProbabilisticModel> {
        match self {
            ModelFile::LinearSoftmax(model) => Arc::new(model),
            ModelFile::NearestCentroid(model) => Arc::new(model),
        }
    }
}

/// Model and label map locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPaths {
    pub model: PathBuf,
    pub labels: PathBuf,
}

impl Default for ModelPaths {
    fn default() -> Self {
        let dir = dirs::data_dir()
            .map(|d| d.join("breathscan").join("models"))
            .unwrap_or_else(|| PathBuf::from("models"));

        ModelPaths {
            model: dir.join("model.json"),
            labels: dir.join("label_map.json"),
        }
    }
}

/// Load-once, share-many holder for the classifier
///
/// A failed load leaves the store empty, so the next request tries again.
pub struct ModelStore {
    paths: Option<ModelPaths>,
    cell: OnceCell<Arc<Classifier>>,
}

impl ModelStore {
    /// Store that loads lazily from `paths` on first use
    pub fn from_paths(paths: ModelPaths) -> Self {
        ModelStore {
            paths: Some(paths),
            cell: OnceCell::new(),
        }
    }

    /// Store around an already-built classifier
    pub fn preloaded(classifier: Classifier) -> Self {
        ModelStore {
            paths: None,
            cell: OnceCell::with_value(Arc::new(classifier)),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Get the classifier, loading it if this is the first successful call
    pub fn get_or_load(&self) -> Result<Arc<Classifier>, ClassifierError> {
        self.cell
            .get_or_try_init(|| {
                let paths = self.paths.as_ref().ok_or_else(|| {
                    ClassifierError::ModelUnavailable("no model configured".to_string())
                })?;
                load_classifier(paths).map(Arc::new)
            })
            .cloned()
    }
}

/// Read the model and label map from disk
pub fn load_classifier(paths: &ModelPaths) -> Result<Classifier, ClassifierError> {
    let model = ModelFile::from_file(&paths.model)?.into_model();
    let labels = LabelMap::from_file(&paths.labels)?;

    log::info!(
        "Loaded model from {} ({} classes, {} inputs)",
        paths.model.display(),
        model.classes().len(),
        model.input_len()
    );

    Ok(Classifier::local(model, labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LINEAR: &str = r#"{
        "kind": "linear_softmax",
        "weights": [[1.0, 0.0], [0.0, 1.0]],
        "bias": [0.0, 0.0]
    }"#;

    #[test]
    fn test_softmax() {
        let probs = softmax(&[1.0, 1.0]);
        assert!((probs[0] - 0.5).abs() < 1e-6);

        let probs = softmax(&[1000.0, 0.0]);
        assert!((probs[0] - 1.0).abs() < 1e-6);
        assert!(probs.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_linear_softmax_from_json() {
        let model = ModelFile::from_json_bytes(LINEAR.as_bytes()).unwrap().into_model();

        assert_eq!(model.classes(), &[0, 1]);
        assert_eq!(model.input_len(), 2);
        match model.infer(&[3.0, 0.0]).unwrap() {
            ModelOutput::Probabilities(p) => assert!(p[0] > 0.9),
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[test]
    fn test_scaler_is_applied() {
        let model = LinearSoftmax {
            classes: vec![0, 1],
            weights: vec![vec![1.0], vec![-1.0]],
            bias: vec![0.0, 0.0],
            scaler: Some(StandardScaler {
                mean: vec![10.0],
                scale: vec![2.0],
            }),
        };

        // (10 - 10) / 2 = 0 -> equal logits
        match model.infer(&[10.0]).unwrap() {
            ModelOutput::Probabilities(p) => assert!((p[0] - 0.5).abs() < 1e-6),
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[test]
    fn test_nearest_centroid() {
        let json = br#"{"kind": "nearest_centroid", "classes": [3, 4], "centroids": [[0.0, 0.0], [5.0, 5.0]]}"#;
        let model = ModelFile::from_json_bytes(json).unwrap().into_model();

        assert_eq!(model.infer(&[4.0, 4.5]).unwrap(), ModelOutput::Hard(4));
        assert_eq!(model.infer(&[0.5, 0.0]).unwrap(), ModelOutput::Hard(3));
    }

    #[test]
    fn test_invalid_models_rejected() {
        let ragged = br#"{"kind": "linear_softmax", "weights": [[1.0], [1.0, 2.0]], "bias": [0, 0]}"#;
        assert!(matches!(
            ModelFile::from_json_bytes(ragged),
            Err(ClassifierError::ModelLoad(_))
        ));

        let bias = br#"{"kind": "linear_softmax", "weights": [[1.0]], "bias": [0, 0]}"#;
        assert!(ModelFile::from_json_bytes(bias).is_err());

        let unknown = br#"{"kind": "random_forest"}"#;
        assert!(ModelFile::from_json_bytes(unknown).is_err());
    }

    #[test]
    fn test_store_retries_after_failed_load() {
        let dir = TempDir::new().unwrap();
        let paths = ModelPaths {
            model: dir.path().join("model.json"),
            labels: dir.path().join("label_map.json"),
        };
        let store = ModelStore::from_paths(paths.clone());

        let first = store.get_or_load();
        assert!(matches!(first, Err(ClassifierError::ModelUnavailable(_))));
        assert!(!store.is_loaded());

        std::fs::write(&paths.model, LINEAR).unwrap();
        let second = store.get_or_load().unwrap();
        assert_eq!(second.input_len(), 2);
        assert!(store.is_loaded());

        // Same instance on later calls
        let third = store.get_or_load().unwrap();
        assert!(Arc::ptr_eq(&second, &third));
    }

    #[test]
    fn test_preloaded_store() {
        let model = ModelFile::from_json_bytes(LINEAR.as_bytes()).unwrap().into_model();
        let store = ModelStore::preloaded(Classifier::local(model, LabelMap::default()));
        assert!(store.is_loaded());
        assert!(store.get_or_load().is_ok());
    }

    #[test]
    fn test_default_paths_end_in_model_dir() {
        let paths = ModelPaths::default();
        assert!(paths.model.ends_with("models/model.json"));
        assert!(paths.labels.ends_with("models/label_map.json"));
    }
}
