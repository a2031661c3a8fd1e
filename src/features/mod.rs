// Feature extraction module
// Turns a canonical waveform into a fixed-length standardized feature vector
// plus the interpretable acoustic indicators used by the decision engine

pub mod cepstral;
pub mod descriptors;
pub mod functional;
pub mod indicators;
pub mod onset;
pub mod spectrum;
pub mod stats;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::audio::NormalizedAudio;
use crate::events::types::{AcousticIndicators, TaskType};

pub use descriptors::{DescriptorWeights, TaskWeights, DESCRIPTOR_LEN};
pub use functional::{FrameFunctionals, FunctionalBackend, SignalView};
pub use indicators::IndicatorConfig;
pub use onset::{detect_onsets, Onset, OnsetConfig};

use cepstral::MfccExtractor;
use spectrum::SpectralFrames;

/// Errors that can occur during feature extraction
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Cannot extract features from an empty signal")]
    EmptySignal,

    #[error("Functional backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Functional backend {0} failed: {1}")]
    Backend(String, String),

    #[error("Feature block has {actual} values, expected {expected}")]
    BlockLength { expected: usize, actual: usize },

    #[error("FFT failed: {0}")]
    Fft(String),
}

/// Feature extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Length N of the assembled vector; must match the model input
    pub vector_len: usize,

    /// STFT frame length in samples
    pub frame_size: usize,

    /// STFT hop in samples
    pub hop_size: usize,

    /// Mel bands feeding the MFCCs
    pub n_mels: usize,

    /// Signals with RMS above this are attenuated
    pub attenuation_threshold: f32,

    /// Attenuation gain is 1 / (1 + strength·rms)
    pub attenuation_strength: f32,

    /// Amplitude of the uniform noise used to pad short vectors
    pub pad_noise: f32,

    /// Seed for the padding noise
    pub pad_seed: u64,

    pub onset: OnsetConfig,
    pub indicators: IndicatorConfig,
    pub weights: TaskWeights,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            vector_len: 120,
            frame_size: 512,
            hop_size: 256,
            n_mels: 40,
            attenuation_threshold: 0.05,
            attenuation_strength: 2.0,
            pad_noise: 1e-3,
            pad_seed: 42,
            onset: OnsetConfig::default(),
            indicators: IndicatorConfig::default(),
            weights: TaskWeights::default(),
        }
    }
}

/// Where the functional block of a vector came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum FunctionalSource {
    /// The configured backend, by name
    Backend(String),

    /// Reduced cepstral/spectral fallback
    Reduced,
}

/// Fixed-length, standardized model input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: Vec<f32>,

    pub source: FunctionalSource,

    /// Concatenated length before fitting to N
    pub raw_len: usize,

    /// Noise entries appended to reach N
    pub padded: usize,

    /// Entries dropped to reach N
    pub truncated: usize,
}

impl FeatureVector {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }
}

/// Feature extractor with a pluggable functional backend
#[derive(Clone)]
pub struct FeatureExtractor {
    config: FeatureConfig,
    backend: Arc<dyn FunctionalBackend>,
}

impl std::fmt::Debug for FeatureExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureExtractor")
            .field("config", &self.config)
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(FeatureConfig::default())
    }
}

impl FeatureExtractor {
    /// Extractor using the built-in frame functionals
    pub fn new(config: FeatureConfig) -> Self {
        Self::with_backend(config, Arc::new(FrameFunctionals))
    }

    pub fn with_backend(config: FeatureConfig, backend: Arc<dyn FunctionalBackend>) -> Self {
        FeatureExtractor { config, backend }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Extract the feature vector and indicators of a normalized clip
    pub fn extract(
        &self,
        audio: &NormalizedAudio,
        task: TaskType,
    ) -> Result<(FeatureVector, AcousticIndicators), ExtractionError> {
        self.extract_samples(&audio.samples, audio.sample_rate, task)
    }

    /// Extract from raw mono samples
    pub fn extract_samples(
        &self,
        samples: &[f32],
        sample_rate: u32,
        task: TaskType,
    ) -> Result<(FeatureVector, AcousticIndicators), ExtractionError> {
        if samples.is_empty() || sample_rate == 0 {
            return Err(ExtractionError::EmptySignal);
        }

        let signal = attenuate(
            samples,
            self.config.attenuation_threshold,
            self.config.attenuation_strength,
        );

        let spectra = SpectralFrames::compute(
            &signal,
            sample_rate,
            self.config.frame_size,
            self.config.hop_size,
        )?;
        let mfcc = MfccExtractor::for_frames(descriptors::DESCRIPTOR_MFCCS, self.config.n_mels, &spectra)
            .compute(&spectra);

        let view = SignalView {
            samples: &signal,
            sample_rate,
            spectra: &spectra,
            mfcc: &mfcc,
        };

        let (functional_block, source) = self.functional_block(&view)?;
        let descriptor_block =
            descriptors::descriptor_block(&view, self.config.weights.for_task(task));
        let indicators = indicators::compute_indicators(
            &signal,
            sample_rate,
            &spectra,
            &self.config.indicators,
            &self.config.onset,
        )?;

        let mut raw = functional_block;
        raw.extend(descriptor_block);
        raw.extend(indicators.to_vec());
        stats::sanitize(&mut raw);

        let raw_len = raw.len();
        let (mut values, padded, truncated) = fit_to_length(
            raw,
            self.config.vector_len,
            self.config.pad_noise,
            self.config.pad_seed,
        );
        standardize(&mut values);
        stats::sanitize(&mut values);

        log::debug!(
            "Extracted {} raw features ({:?}), padded {}, truncated {}",
            raw_len,
            source,
            padded,
            truncated
        );

        Ok((
            FeatureVector {
                values,
                source,
                raw_len,
                padded,
                truncated,
            },
            indicators,
        ))
    }

    fn functional_block(
        &self,
        view: &SignalView<'_>,
    ) -> Result<(Vec<f32>, FunctionalSource), ExtractionError> {
        match self.backend.extract(view) {
            Ok(block) => {
                let expected = self.backend.block_len();
                if block.len() != expected {
                    return Err(ExtractionError::BlockLength {
                        expected,
                        actual: block.len(),
                    });
                }
                Ok((block, FunctionalSource::Backend(self.backend.name().to_string())))
            }
            Err(ExtractionError::BackendUnavailable(reason)) => {
                log::warn!(
                    "Functional backend {} unavailable ({}), using reduced feature set",
                    self.backend.name(),
                    reason
                );
                Ok((functional::reduced_functionals(view), FunctionalSource::Reduced))
            }
            Err(e) => Err(e),
        }
    }
}

/// Scale down loud recordings: gain 1 / (1 + strength·rms) above the threshold
pub fn attenuate(samples: &[f32], threshold: f32, strength: f32) -> Vec<f32> {
    let rms = (samples.iter().map(|x| x * x).sum::<f32>() / samples.len().max(1) as f32).sqrt();
    if rms <= threshold {
        return samples.to_vec();
    }

    let gain = 1.0 / (1.0 + strength * rms);
    samples.iter().map(|x| x * gain).collect()
}

/// Truncate or pad with seeded uniform noise to exactly `len` values
/// Returns (values, padded count, truncated count)
pub fn fit_to_length(
    mut values: Vec<f32>,
    len: usize,
    noise: f32,
    seed: u64,
) -> (Vec<f32>, usize, usize) {
    if values.len() >= len {
        let truncated = values.len() - len;
        values.truncate(len);
        return (values, 0, truncated);
    }

    let padded = len - values.len();
    let mut rng = StdRng::seed_from_u64(seed);
    let amplitude = noise.abs();
    values.extend((0..padded).map(|_| {
        if amplitude > 0.0 {
            rng.gen_range(-amplitude..=amplitude)
        } else {
            0.0
        }
    }));

    (values, padded, 0)
}

/// Standardize in place: (x - mean) / (std + 1e-8)
pub fn standardize(values: &mut [f32]) {
    let mean = stats::mean(values);
    let std = stats::std_dev(values);
    for v in values.iter_mut() {
        *v = (*v - mean) / (std + 1e-8);
    }
}
