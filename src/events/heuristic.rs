// Heuristic decision engine
// Reconciles the model's class distribution with interpretable acoustic
// indicators: class rebalancing, ordered override/suggest rules, and strict
// gates for labels that need very high certainty

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::events::backend::ModelPrediction;
use crate::events::types::{AcousticIndicators, ClassProbabilities, Indicator, SimplifiedLabel};

/// One test of an indicator value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// Strictly greater than `value`
    Above { indicator: Indicator, value: f32 },

    /// Strictly less than `value`
    Below { indicator: Indicator, value: f32 },

    /// Within [min, max], both ends included
    Between { indicator: Indicator, min: f32, max: f32 },
}

impl Condition {
    pub fn holds(&self, indicators: &AcousticIndicators) -> bool {
        match *self {
            Condition::Above { indicator, value } => indicators.get(indicator) > value,
            Condition::Below { indicator, value } => indicators.get(indicator) < value,
            Condition::Between { indicator, min, max } => {
                let v = indicators.get(indicator);
                v >= min && v <= max
            }
        }
    }
}

/// What a matching rule does to the decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RuleAction {
    /// Replace the label and confidence unconditionally
    Override { label: String, confidence: f32 },

    /// Move to `label` only when the model itself is unsure
    Suggest { label: String },
}

/// Named rule: all conditions must hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRule {
    pub name: String,
    pub conditions: Vec<Condition>,
    pub action: RuleAction,
}

impl DecisionRule {
    pub fn matches(&self, indicators: &AcousticIndicators) -> bool {
        self.conditions.iter().all(|c| c.holds(indicators))
    }
}

fn above(indicator: Indicator, value: f32) -> Condition {
    Condition::Above { indicator, value }
}

fn below(indicator: Indicator, value: f32) -> Condition {
    Condition::Below { indicator, value }
}

fn between(indicator: Indicator, min: f32, max: f32) -> Condition {
    Condition::Between { indicator, min, max }
}

fn override_to(label: &str, confidence: f32) -> RuleAction {
    RuleAction::Override {
        label: label.to_string(),
        confidence,
    }
}

fn suggest(label: &str) -> RuleAction {
    RuleAction::Suggest {
        label: label.to_string(),
    }
}

/// Built-in rule table, evaluated in order
pub fn default_rules() -> Vec<DecisionRule> {
    use Indicator::*;

    vec![
        DecisionRule {
            name: "cough_burst".to_string(),
            conditions: vec![
                above(EnergyVariation, 2.3),
                above(HarshSoundRatio, 0.10),
                below(OnsetRate, 2.0),
            ],
            action: override_to("cough", 0.88),
        },
        DecisionRule {
            name: "calm_breathing".to_string(),
            conditions: vec![below(EnergyVariation, 1.0), below(OnsetRate, 1.0)],
            action: override_to("normal", 0.85),
        },
        DecisionRule {
            name: "cough_spectral".to_string(),
            conditions: vec![
                above(CoughEventRatio, 0.08),
                above(CoughFrequencyRatio, 0.8),
            ],
            action: override_to("cough", 0.85),
        },
        DecisionRule {
            name: "throat_clearing".to_string(),
            conditions: vec![
                between(EnergyVariation, 1.2, 2.3),
                between(HarshSoundRatio, 0.03, 0.10),
            ],
            action: override_to("throat_clearing", 0.80),
        },
        DecisionRule {
            name: "cough_cues".to_string(),
            conditions: vec![
                above(CoughEventRatio, 0.05),
                above(CoughFrequencyRatio, 0.5),
            ],
            action: suggest("cough"),
        },
        DecisionRule {
            name: "labored_breathing".to_string(),
            conditions: vec![
                above(OnsetRate, 3.0),
                above(EnergyVariation, 1.5),
                above(SignalStrength, 0.02),
            ],
            action: suggest("heavy_breathing"),
        },
        DecisionRule {
            name: "quiet_signal".to_string(),
            conditions: vec![below(SignalStrength, 0.003)],
            action: suggest("normal"),
        },
    ]
}

/// Decision engine thresholds and rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Per-class multipliers applied to the model distribution
    pub rebalance: BTreeMap<String, f32>,

    /// Ordered rules; the first match wins
    pub rules: Vec<DecisionRule>,

    /// Suggestions only apply below this model confidence
    pub realign_floor: f32,

    /// Minimum confidence given to an accepted suggestion
    pub realign_confidence: f32,

    /// Labels that need at least this confidence to be reported
    pub gates: BTreeMap<String, f32>,

    pub gate_fallback_label: String,
    pub gate_fallback_confidence: f32,

    /// Below this the result is flagged low-confidence
    pub low_confidence_threshold: f32,

    /// Below this the simplified label is `uncertain`
    pub uncertain_threshold: f32,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        DecisionConfig {
            rebalance: [
                ("cough".to_string(), 1.3),
                ("throat_clearing".to_string(), 1.2),
                ("heavy_breathing".to_string(), 0.6),
            ]
            .into_iter()
            .collect(),
            rules: default_rules(),
            realign_floor: 0.65,
            realign_confidence: 0.82,
            gates: [("crackles".to_string(), 0.90), ("wheezing".to_string(), 0.90)]
                .into_iter()
                .collect(),
            gate_fallback_label: "normal".to_string(),
            gate_fallback_confidence: 0.70,
            low_confidence_threshold: 0.75,
            uncertain_threshold: 0.6,
        }
    }
}

/// Final decision for one clip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub label: String,

    /// Confidence of `label` in [0.0, 1.0]
    pub confidence: f32,

    /// Distribution consistent with the decision
    #[serde(rename = "predictions")]
    pub class_probabilities: ClassProbabilities,

    pub low_confidence: bool,

    /// normal / abnormal / uncertain verdict
    pub simplified_label: SimplifiedLabel,

    /// Label the model produced before any adjustment
    pub original_label: String,

    /// Steps that changed the result, in order
    pub applied_rules: Vec<String>,
}

impl DecisionResult {
    /// Whether rules or gates changed the model's label
    pub fn was_adjusted(&self) -> bool {
        self.label != self.original_label
    }
}

/// Rule-based post-processor over model predictions
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    config: DecisionConfig,
}

impl DecisionEngine {
    pub fn new(config: DecisionConfig) -> Self {
        DecisionEngine { config }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Combine a model prediction with acoustic indicators
    pub fn decide(
        &self,
        prediction: &ModelPrediction,
        indicators: &AcousticIndicators,
    ) -> DecisionResult {
        let config = &self.config;
        let indicators = indicators.sanitized();
        let mut applied_rules = Vec::new();

        let mut probabilities = prediction.probabilities.clone();
        if !config.rebalance.is_empty() {
            let before = probabilities.clone();
            probabilities.rebalance(&config.rebalance);
            if probabilities != before {
                applied_rules.push("rebalance".to_string());
            }
        }

        let (mut label, mut confidence) = match probabilities.top() {
            Some((l, p)) => (l.to_string(), p),
            None => (config.gate_fallback_label.clone(), 0.0),
        };
        let model_label = label.clone();
        let model_confidence = confidence;

        if let Some(rule) = config.rules.iter().find(|r| r.matches(&indicators)) {
            match &rule.action {
                RuleAction::Override {
                    label: target,
                    confidence: fixed,
                } => {
                    label = target.clone();
                    confidence = *fixed;
                    applied_rules.push(rule.name.clone());
                }
                RuleAction::Suggest { label: target } => {
                    if model_confidence < config.realign_floor && *target != label {
                        confidence = probabilities.get(target).max(config.realign_confidence);
                        label = target.clone();
                        applied_rules.push(rule.name.clone());
                    }
                }
            }
        }

        if let Some(&gate) = config.gates.get(&label) {
            if confidence < gate {
                applied_rules.push(format!("gate:{label}"));
                label = config.gate_fallback_label.clone();
                confidence = config.gate_fallback_confidence;
            }
        }

        let mut confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        if label != model_label || confidence != model_confidence {
            probabilities.promote(&label, confidence);
            // Reported confidence always matches the map; a single-class map holds 1.0
            confidence = probabilities.get(&label);
        }

        if !applied_rules.is_empty() {
            log::debug!(
                "Decision {} -> {} ({:.2}) via {}",
                prediction.label,
                label,
                confidence,
                applied_rules.join(", ")
            );
        }

        DecisionResult {
            low_confidence: confidence < config.low_confidence_threshold,
            simplified_label: SimplifiedLabel::from_decision(
                &label,
                confidence,
                config.uncertain_threshold,
            ),
            label,
            confidence,
            class_probabilities: probabilities,
            original_label: prediction.label.clone(),
            applied_rules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::backend::PredictionSource;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn prediction(pairs: &[(&str, f32)]) -> ModelPrediction {
        ModelPrediction::from_probabilities(
            ClassProbabilities::from_pairs(pairs.iter().map(|(l, p)| (l.to_string(), *p))),
            PredictionSource::Local,
        )
    }

    /// Indicators that match no default rule
    fn neutral() -> AcousticIndicators {
        AcousticIndicators {
            cough_event_ratio: 0.0,
            cough_frequency_ratio: 0.0,
            harsh_sound_ratio: 0.0,
            onset_rate: 2.0,
            energy_variation: 1.1,
            signal_strength: 0.05,
            duration: 3.0,
        }
    }

    fn engine() -> DecisionEngine {
        DecisionEngine::default()
    }

    #[test]
    fn test_cough_burst_override() {
        let indicators = AcousticIndicators {
            energy_variation: 3.0,
            harsh_sound_ratio: 0.15,
            onset_rate: 1.0,
            ..neutral()
        };
        let result = engine().decide(&prediction(&[("normal", 0.9), ("cough", 0.1)]), &indicators);

        assert_eq!(result.label, "cough");
        assert!((result.confidence - 0.88).abs() < 1e-6);
        assert!((result.class_probabilities.get("cough") - 0.88).abs() < 1e-6);
        assert_eq!(result.original_label, "normal");
        assert!(result.applied_rules.contains(&"cough_burst".to_string()));
        assert!(result.was_adjusted());
    }

    #[test]
    fn test_calm_breathing_override() {
        let indicators = AcousticIndicators {
            energy_variation: 0.5,
            onset_rate: 0.5,
            signal_strength: 0.02,
            ..neutral()
        };
        let result = engine().decide(&prediction(&[("wheezing", 0.95), ("normal", 0.05)]), &indicators);

        assert_eq!(result.label, "normal");
        assert!((result.confidence - 0.85).abs() < 1e-6);
        assert!(!result.low_confidence);
    }

    #[test]
    fn test_throat_clearing_range_is_inclusive() {
        let indicators = AcousticIndicators {
            energy_variation: 1.2,
            harsh_sound_ratio: 0.10,
            ..neutral()
        };
        let result = engine().decide(&prediction(&[("normal", 0.9), ("cough", 0.1)]), &indicators);

        assert_eq!(result.label, "throat_clearing");
        assert!((result.confidence - 0.80).abs() < 1e-6);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        // Satisfies cough_burst and cough_spectral
        let indicators = AcousticIndicators {
            energy_variation: 2.5,
            harsh_sound_ratio: 0.2,
            onset_rate: 1.5,
            cough_event_ratio: 0.1,
            cough_frequency_ratio: 0.9,
            ..neutral()
        };
        let result = engine().decide(&prediction(&[("normal", 1.0)]), &indicators);

        assert_eq!(result.applied_rules, vec!["cough_burst".to_string()]);
        assert!((result.confidence - 0.88).abs() < 1e-6);
        // Label the model never produced is inserted
        assert!(result.class_probabilities.contains("cough"));
        assert!((result.class_probabilities.sum() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_suggestion_ignored_when_model_confident() {
        let indicators = AcousticIndicators {
            cough_event_ratio: 0.06,
            cough_frequency_ratio: 0.6,
            ..neutral()
        };
        let result = engine().decide(&prediction(&[("normal", 0.9), ("cough", 0.1)]), &indicators);

        assert_eq!(result.label, "normal");
        assert!(!result.applied_rules.contains(&"cough_cues".to_string()));
    }

    #[test]
    fn test_suggestion_applied_when_model_unsure() {
        let indicators = AcousticIndicators {
            cough_event_ratio: 0.06,
            cough_frequency_ratio: 0.6,
            ..neutral()
        };
        let result = engine().decide(
            &prediction(&[("normal", 0.5), ("cough", 0.2), ("heavy_breathing", 0.3)]),
            &indicators,
        );

        assert_eq!(result.label, "cough");
        assert!((result.confidence - 0.82).abs() < 1e-6);
        assert!(result.applied_rules.contains(&"cough_cues".to_string()));
    }

    #[test]
    fn test_crackles_gated_to_normal() {
        let result = engine().decide(&prediction(&[("crackles", 0.6), ("normal", 0.4)]), &neutral());

        assert_eq!(result.label, "normal");
        assert!((result.confidence - 0.70).abs() < 1e-6);
        assert!(result.low_confidence);
        assert_eq!(result.original_label, "crackles");
        assert!(result.applied_rules.contains(&"gate:crackles".to_string()));
        assert!((result.class_probabilities.get("normal") - 0.70).abs() < 1e-6);
    }

    #[test]
    fn test_confident_wheezing_passes_gate() {
        let result = engine().decide(&prediction(&[("wheezing", 0.95), ("normal", 0.05)]), &neutral());

        assert_eq!(result.label, "wheezing");
        assert!(!result.applied_rules.iter().any(|r| r.starts_with("gate:")));
    }

    #[test]
    fn test_rebalance_can_flip_argmax() {
        // heavy_breathing 0.5 * 0.6 = 0.30 vs cough 0.45 * 1.3 = 0.585
        let result = engine().decide(
            &prediction(&[("heavy_breathing", 0.5), ("cough", 0.45), ("normal", 0.05)]),
            &neutral(),
        );

        assert_eq!(result.label, "cough");
        assert_eq!(result.original_label, "heavy_breathing");
        assert_eq!(result.applied_rules, vec!["rebalance".to_string()]);
    }

    #[test]
    fn test_untouched_prediction_passes_through() {
        let config = DecisionConfig {
            rebalance: BTreeMap::new(),
            ..Default::default()
        };
        let result = DecisionEngine::new(config)
            .decide(&prediction(&[("normal", 0.8), ("cough", 0.2)]), &neutral());

        assert_eq!(result.label, "normal");
        assert!((result.confidence - 0.8).abs() < 1e-6);
        assert!(result.applied_rules.is_empty());
        assert!(!result.was_adjusted());
    }

    #[test]
    fn test_nan_indicators_are_sanitized() {
        let indicators = AcousticIndicators {
            energy_variation: f32::NAN,
            onset_rate: f32::INFINITY,
            ..neutral()
        };
        // NaN/Inf become 0, which satisfies calm_breathing
        let result = engine().decide(&prediction(&[("cough", 0.9), ("normal", 0.1)]), &indicators);
        assert_eq!(result.label, "normal");
        assert!(result.confidence.is_finite());
    }

    #[test]
    fn test_calm_breathing_beats_cough_ratios() {
        let indicators = AcousticIndicators {
            energy_variation: 0.5,
            onset_rate: 0.5,
            harsh_sound_ratio: 0.02,
            cough_event_ratio: 0.09,
            cough_frequency_ratio: 0.9,
            ..neutral()
        };
        let result = engine().decide(&prediction(&[("heavy_breathing", 0.9), ("cough", 0.1)]), &indicators);

        assert_eq!(result.label, "normal");
        assert!((result.confidence - 0.85).abs() < 1e-6);
        assert!(result.applied_rules.contains(&"calm_breathing".to_string()));
        assert!(!result.applied_rules.contains(&"cough_spectral".to_string()));
    }

    #[test]
    fn test_cough_spectral_outside_calm_range() {
        let indicators = AcousticIndicators {
            energy_variation: 1.1,
            onset_rate: 0.5,
            cough_event_ratio: 0.09,
            cough_frequency_ratio: 0.9,
            ..neutral()
        };
        let result = engine().decide(&prediction(&[("heavy_breathing", 0.9), ("cough", 0.1)]), &indicators);

        assert_eq!(result.label, "cough");
        assert!(result.applied_rules.contains(&"cough_spectral".to_string()));
    }

    #[test]
    fn test_single_class_override_reports_full_confidence() {
        let indicators = AcousticIndicators {
            energy_variation: 0.5,
            onset_rate: 0.5,
            ..neutral()
        };
        let result = engine().decide(&prediction(&[("normal", 1.0)]), &indicators);

        assert_eq!(result.label, "normal");
        assert_eq!(result.class_probabilities.len(), 1);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.class_probabilities.get("normal"), result.confidence);
        assert!(!result.low_confidence);
    }

    #[test]
    fn test_simplified_label_branches() {
        let config = DecisionConfig {
            rebalance: BTreeMap::new(),
            ..Default::default()
        };
        let engine = DecisionEngine::new(config);

        let normal = engine.decide(&prediction(&[("normal", 0.8), ("cough", 0.2)]), &neutral());
        assert_eq!(normal.simplified_label, SimplifiedLabel::Normal);

        let abnormal = engine.decide(&prediction(&[("cough", 0.7), ("normal", 0.3)]), &neutral());
        assert_eq!(abnormal.simplified_label, SimplifiedLabel::Abnormal);

        let unsure = engine.decide(
            &prediction(&[("cough", 0.4), ("normal", 0.35), ("throat_clearing", 0.25)]),
            &neutral(),
        );
        assert_eq!(unsure.label, "cough");
        assert_eq!(unsure.simplified_label, SimplifiedLabel::Uncertain);

        let lenient = DecisionEngine::new(DecisionConfig {
            rebalance: BTreeMap::new(),
            uncertain_threshold: 0.3,
            ..Default::default()
        });
        let result = lenient.decide(
            &prediction(&[("cough", 0.4), ("normal", 0.35), ("throat_clearing", 0.25)]),
            &neutral(),
        );
        assert_eq!(result.simplified_label, SimplifiedLabel::Abnormal);

        let json = serde_json::to_value(&unsure).unwrap();
        assert_eq!(json["simplified_label"], "uncertain");
    }

    #[test]
    fn test_decision_invariants_hold_for_random_inputs() {
        const LABELS: [&str; 6] = [
            "normal",
            "cough",
            "heavy_breathing",
            "throat_clearing",
            "crackles",
            "wheezing",
        ];
        let engine = engine();
        let threshold = engine.config().low_confidence_threshold;
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..5000 {
            let classes = rng.gen_range(1..=LABELS.len());
            let pairs: Vec<(&str, f32)> = LABELS[..classes]
                .iter()
                .map(|l| (*l, rng.gen_range(0.0..1.0f32)))
                .collect();
            let indicators = AcousticIndicators {
                cough_event_ratio: rng.gen_range(0.0..0.2),
                cough_frequency_ratio: rng.gen_range(0.0..1.0),
                harsh_sound_ratio: rng.gen_range(0.0..0.3),
                onset_rate: rng.gen_range(0.0..5.0),
                energy_variation: rng.gen_range(0.0..4.0),
                signal_strength: rng.gen_range(0.0..0.1),
                duration: 3.0,
            };

            let result = engine.decide(&prediction(&pairs), &indicators);

            assert!((0.0..=1.0).contains(&result.confidence), "{result:?}");
            assert_eq!(result.low_confidence, result.confidence < threshold);
            assert!(
                (result.class_probabilities.get(&result.label) - result.confidence).abs() < 1e-5,
                "{result:?}"
            );
            assert!((result.class_probabilities.sum() - 1.0).abs() < 1e-4, "{result:?}");
        }
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = DecisionConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"op\":\"between\""));

        let parsed: DecisionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);

        let partial: DecisionConfig = serde_json::from_str(r#"{"realign_floor": 0.5}"#).unwrap();
        assert_eq!(partial.realign_floor, 0.5);
        assert_eq!(partial.rules.len(), 7);
    }
}
