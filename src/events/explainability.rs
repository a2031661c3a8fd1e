// Explainability module
// Maps the final label to candidate clinical explanations and renders the
// human-readable summary returned with every outcome

use crate::events::heuristic::DecisionResult;
use crate::events::types::TaskType;

/// Appended to every summary
pub const MEDICAL_DISCLAIMER: &str = "This is an automated acoustic screening result, not a \
medical diagnosis. Always consult a healthcare professional for medical concerns.";

/// Fallback for labels without a known mapping
pub const UNSPECIFIED: &str = "Unspecified";

/// Candidate conditions commonly associated with an acoustic event label
pub fn candidate_conditions(label: &str) -> Vec<String> {
    let conditions: &[&str] = match label {
        "normal" => &["No respiratory abnormality detected"],
        "cough" => &[
            "Upper respiratory tract infection",
            "Bronchitis",
            "Asthma",
            "Post-nasal drip",
        ],
        "throat_clearing" => &[
            "Mild throat irritation",
            "Laryngopharyngeal reflux",
            "Post-nasal drip",
        ],
        "heavy_breathing" => &[
            "Physical exertion",
            "Anxiety or hyperventilation",
            "Respiratory distress",
        ],
        "crackles" => &["Pneumonia", "Pulmonary fibrosis", "Heart failure"],
        "wheezing" => &["Asthma", "COPD", "Bronchiolitis"],
        _ => &[UNSPECIFIED],
    };

    conditions.iter().map(|c| c.to_string()).collect()
}

/// Human-readable name for a label ("heavy_breathing" -> "Heavy breathing")
pub fn display_name(label: &str) -> String {
    let spaced = label.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => UNSPECIFIED.to_string(),
    }
}

fn confidence_tier(confidence: f32) -> &'static str {
    if confidence > 0.85 {
        "high"
    } else if confidence > 0.70 {
        "moderate"
    } else {
        "low"
    }
}

fn task_lead(task: TaskType) -> &'static str {
    match task {
        TaskType::Breath => "Breath analysis",
        TaskType::Speech => "Speech analysis",
    }
}

/// Render the summary for a decision
pub fn render_summary(decision: &DecisionResult, task: TaskType, conditions: &[String]) -> String {
    let mut reason_parts = Vec::new();

    reason_parts.push(format!(
        "{}: {} detected with {}% confidence ({} confidence).",
        task_lead(task),
        display_name(&decision.label),
        (decision.confidence * 100.0).round() as u32,
        confidence_tier(decision.confidence)
    ));

    if !conditions.is_empty() {
        reason_parts.push(format!("Possible associations: {}.", conditions.join(", ")));
    }

    if decision.low_confidence {
        reason_parts.push(
            "The result is uncertain; please re-record in a quiet environment.".to_string(),
        );
    }

    if decision.was_adjusted() {
        reason_parts.push(format!(
            "Adjusted from the model's raw label ({}) using acoustic indicators.",
            display_name(&decision.original_label)
        ));
    }

    reason_parts.push(MEDICAL_DISCLAIMER.to_string());
    reason_parts.join(" ")
}

/// Summary for an outcome produced without a model
pub fn fallback_summary(reason: &str) -> String {
    format!(
        "Analysis model unavailable ({reason}); returning a placeholder normal result. {MEDICAL_DISCLAIMER}"
    )
}
