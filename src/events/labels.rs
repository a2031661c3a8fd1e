// Label map
// Model class index -> human-readable event label

use std::collections::BTreeMap;
use std::path::Path;

use crate::events::backend::ClassifierError;

/// Labels in model index order when no label map file is installed
pub const DEFAULT_LABELS: [&str; 6] = [
    "normal",
    "cough",
    "throat_clearing",
    "heavy_breathing",
    "crackles",
    "wheezing",
];

/// Inverse of the `{"label": index}` file shipped next to a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    by_index: BTreeMap<u32, String>,
}

impl Default for LabelMap {
    fn default() -> Self {
        LabelMap {
            by_index: DEFAULT_LABELS
                .iter()
                .enumerate()
                .map(|(i, label)| (i as u32, label.to_string()))
                .collect(),
        }
    }
}

impl LabelMap {
    /// Parse `{"label": index}` JSON
    pub fn from_json_bytes(data: &[u8]) -> Result<Self, ClassifierError> {
        let forward: BTreeMap<String, u32> = serde_json::from_slice(data)
            .map_err(|e| ClassifierError::LabelMap(e.to_string()))?;

        let mut by_index = BTreeMap::new();
        for (label, index) in forward {
            if let Some(existing) = by_index.insert(index, label.clone()) {
                return Err(ClassifierError::LabelMap(format!(
                    "index {index} assigned to both {existing} and {label}"
                )));
            }
        }

        Ok(LabelMap { by_index })
    }

    /// Load from disk; a missing file yields the default map
    pub fn from_file(path: &Path) -> Result<Self, ClassifierError> {
        if !path.exists() {
            log::warn!(
                "Label map {} not found, using default labels",
                path.display()
            );
            return Ok(Self::default());
        }

        let data = std::fs::read(path)
            .map_err(|e| ClassifierError::LabelMap(format!("{}: {e}", path.display())))?;
        Self::from_json_bytes(&data)
    }

    /// Label for a class index; unmapped indices render as their number
    pub fn label_for(&self, index: u32) -> String {
        self.by_index
            .get(&index)
            .cloned()
            .unwrap_or_else(|| index.to_string())
    }

    /// Forward `{"label": index}` form, as stored on disk
    pub fn to_label_indices(&self) -> BTreeMap<String, u32> {
        self.by_index
            .iter()
            .map(|(i, label)| (label.clone(), *i))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
}
