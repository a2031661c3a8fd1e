// Pipeline configuration
// One JSON document configures every stage; any subset may be overridden

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::audio::NormalizerConfig;
use crate::events::{DecisionConfig, ModelPaths};
use crate::features::FeatureConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Complete analysis configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub normalizer: NormalizerConfig,
    pub features: FeatureConfig,
    pub decision: DecisionConfig,
    pub models: ModelPaths,

    /// JSONL trace file; tracing is off when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_path: Option<PathBuf>,
}

impl AnalysisConfig {
    /// Deserialize from JSON bytes
    pub fn from_json_bytes(data: &[u8]) -> Result<Self, ConfigError> {
        let config: AnalysisConfig = serde_json::from_slice(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to JSON bytes
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_json_bytes(&data)
    }

    /// Reject values no stage can work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let f = &self.features;
        if f.vector_len == 0 {
            return Err(ConfigError::Invalid("features.vector_len must be > 0".to_string()));
        }
        if f.frame_size < 2 || f.hop_size == 0 {
            return Err(ConfigError::Invalid(
                "features.frame_size must be >= 2 and hop_size > 0".to_string(),
            ));
        }
        if f.onset.window_size < 2 || f.onset.hop_size == 0 {
            return Err(ConfigError::Invalid(
                "features.onset window_size must be >= 2 and hop_size > 0".to_string(),
            ));
        }
        if f.indicators.envelope_frame == 0 || f.indicators.envelope_hop == 0 {
            return Err(ConfigError::Invalid(
                "features.indicators envelope sizes must be > 0".to_string(),
            ));
        }
        if self.normalizer.min_duration < 0.0 {
            return Err(ConfigError::Invalid(
                "normalizer.min_duration must be >= 0".to_string(),
            ));
        }

        let d = &self.decision;
        let unit = [
            ("realign_floor", d.realign_floor),
            ("realign_confidence", d.realign_confidence),
            ("gate_fallback_confidence", d.gate_fallback_confidence),
            ("low_confidence_threshold", d.low_confidence_threshold),
            ("uncertain_threshold", d.uncertain_threshold),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "decision.{name} must be within [0, 1], got {value}"
                )));
            }
        }

        Ok(())
    }
}
