// Acoustic event types
// Task kinds, interpretable acoustic indicators, and class probability maps

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which kind of recording is being analyzed
/// Drives descriptor weighting, duration capping and summary wording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Breathing sounds (default)
    Breath,

    /// Sustained or read speech
    Speech,
}

impl TaskType {
    /// Parse from the wire representation ("breath" / "speech")
    pub fn from_string(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "breath" | "breathing" => Some(TaskType::Breath),
            "speech" => Some(TaskType::Speech),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Breath => "breath",
            TaskType::Speech => "speech",
        }
    }
}

impl Default for TaskType {
    fn default() -> Self {
        TaskType::Breath
    }
}

/// Three-way summary of a decision for callers that only need a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimplifiedLabel {
    Normal,
    Abnormal,
    Uncertain,
}

impl SimplifiedLabel {
    /// `Uncertain` below `uncertain_threshold`, otherwise normal vs anything else
    pub fn from_decision(label: &str, confidence: f32, uncertain_threshold: f32) -> Self {
        if confidence.is_nan() || confidence < uncertain_threshold {
            SimplifiedLabel::Uncertain
        } else if label == "normal" {
            SimplifiedLabel::Normal
        } else {
            SimplifiedLabel::Abnormal
        }
    }
}

/// Names of the interpretable indicators, so rules can address them as data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    CoughEventRatio,
    CoughFrequencyRatio,
    HarshSoundRatio,
    OnsetRate,
    EnergyVariation,
    SignalStrength,
    Duration,
}

impl Indicator {
    pub fn name(&self) -> &'static str {
        match self {
            Indicator::CoughEventRatio => "cough_event_ratio",
            Indicator::CoughFrequencyRatio => "cough_frequency_ratio",
            Indicator::HarshSoundRatio => "harsh_sound_ratio",
            Indicator::OnsetRate => "onset_rate",
            Indicator::EnergyVariation => "energy_variation",
            Indicator::SignalStrength => "signal_strength",
            Indicator::Duration => "duration",
        }
    }
}

/// Interpretable respiratory-event signals computed from the waveform
/// These are the only inputs the decision engine's rules look at
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcousticIndicators {
    /// Fraction of short-time energy frames above mean + 2·std of the envelope
    pub cough_event_ratio: f32,

    /// Mid-band (500-2000 Hz) energy divided by low-band (<= 500 Hz) energy
    pub cough_frequency_ratio: f32,

    /// High-band (> 2000 Hz) energy divided by low-band energy
    pub harsh_sound_ratio: f32,

    /// Detected onsets per second
    pub onset_rate: f32,

    /// Standard deviation over mean of the energy envelope
    pub energy_variation: f32,

    /// Mean absolute amplitude
    pub signal_strength: f32,

    /// Clip duration in seconds
    pub duration: f32,
}

impl AcousticIndicators {
    /// Read one indicator by name
    pub fn get(&self, indicator: Indicator) -> f32 {
        match indicator {
            Indicator::CoughEventRatio => self.cough_event_ratio,
            Indicator::CoughFrequencyRatio => self.cough_frequency_ratio,
            Indicator::HarshSoundRatio => self.harsh_sound_ratio,
            Indicator::OnsetRate => self.onset_rate,
            Indicator::EnergyVariation => self.energy_variation,
            Indicator::SignalStrength => self.signal_strength,
            Indicator::Duration => self.duration,
        }
    }

    /// Copy with every field forced finite and non-negative
    pub fn sanitized(&self) -> Self {
        fn clean(v: f32) -> f32 {
            if v.is_finite() {
                v.max(0.0)
            } else {
                0.0
            }
        }

        AcousticIndicators {
            cough_event_ratio: clean(self.cough_event_ratio),
            cough_frequency_ratio: clean(self.cough_frequency_ratio),
            harsh_sound_ratio: clean(self.harsh_sound_ratio),
            onset_rate: clean(self.onset_rate),
            energy_variation: clean(self.energy_variation),
            signal_strength: clean(self.signal_strength),
            duration: clean(self.duration),
        }
    }

    /// Indicators in a fixed order, for appending to the feature vector
    pub fn to_vec(&self) -> Vec<f32> {
        vec![
            self.cough_event_ratio,
            self.cough_frequency_ratio,
            self.harsh_sound_ratio,
            self.onset_rate,
            self.energy_variation,
            self.signal_strength,
            self.duration,
        ]
    }
}

/// Label -> probability distribution
///
/// Keys are unique and iterate in label order, so every operation here is
/// deterministic. Values are non-negative and sum to 1 after each mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassProbabilities(BTreeMap<String, f32>);

impl ClassProbabilities {
    /// Build from (label, probability) pairs
    /// Repeated labels accumulate; invalid values count as zero
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f32)>,
        S: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (label, p) in pairs {
            let p = if p.is_finite() { p.max(0.0) } else { 0.0 };
            *map.entry(label.into()).or_insert(0.0) += p;
        }

        let mut probs = ClassProbabilities(map);
        probs.normalize();
        probs
    }

    /// Single label with all the mass
    pub fn certain(label: impl Into<String>) -> Self {
        Self::from_pairs([(label.into(), 1.0)])
    }

    /// Rescale to sum 1; an all-zero map becomes uniform
    pub fn normalize(&mut self) {
        if self.0.is_empty() {
            return;
        }

        for p in self.0.values_mut() {
            if !p.is_finite() || *p < 0.0 {
                *p = 0.0;
            }
        }

        let total: f32 = self.0.values().sum();
        if total > 0.0 {
            for p in self.0.values_mut() {
                *p /= total;
            }
        } else {
            let uniform = 1.0 / self.0.len() as f32;
            for p in self.0.values_mut() {
                *p = uniform;
            }
        }
    }

    /// Multiply listed classes by their factor and renormalize
    /// Classes without a factor are left as-is
    pub fn rebalance(&mut self, factors: &BTreeMap<String, f32>) {
        for (label, p) in self.0.iter_mut() {
            if let Some(factor) = factors.get(label) {
                *p *= factor.max(0.0);
            }
        }
        self.normalize();
    }

    /// Give `label` exactly `confidence` and spread the rest over the other
    /// classes in proportion to their current mass
    pub fn promote(&mut self, label: &str, confidence: f32) {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        self.0.entry(label.to_string()).or_insert(0.0);

        let others = self.0.len() - 1;
        if others == 0 {
            self.0.insert(label.to_string(), 1.0);
            return;
        }

        let remaining = 1.0 - confidence;
        let others_total: f32 = self
            .0
            .iter()
            .filter(|(l, _)| l.as_str() != label)
            .map(|(_, p)| *p)
            .sum();

        for (l, p) in self.0.iter_mut() {
            if l.as_str() == label {
                *p = confidence;
            } else if others_total > 0.0 {
                *p = *p / others_total * remaining;
            } else {
                *p = remaining / others as f32;
            }
        }

        self.normalize();
    }

    /// Most probable label and its probability
    /// Ties go to the label that sorts first
    pub fn top(&self) -> Option<(&str, f32)> {
        let mut best: Option<(&str, f32)> = None;
        for (label, &p) in self.0.iter() {
            match best {
                Some((_, best_p)) if p <= best_p => {}
                _ => best = Some((label.as_str(), p)),
            }
        }
        best
    }

    pub fn get(&self, label: &str) -> f32 {
        self.0.get(label).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.contains_key(label)
    }

    pub fn sum(&self) -> f32 {
        self.0.values().sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(l, p)| (l.as_str(), *p))
    }
}
