// Task-weighted spectral descriptors
// Spectral shape, chroma, tonal centroid and cepstral means, scaled per
// descriptor group according to the task being analyzed

use serde::{Deserialize, Serialize};

use super::functional::SignalView;
use super::stats;
use crate::events::types::TaskType;

/// Length of the descriptor block
pub const DESCRIPTOR_LEN: usize = 44;

/// Cepstral coefficients averaged into the block
pub const DESCRIPTOR_MFCCS: usize = 20;

const PITCH_CLASSES: usize = 12;
const TONNETZ_DIMS: usize = 6;

/// Multipliers applied to each descriptor group
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorWeights {
    /// Centroid, bandwidth and roll-off statistics
    pub spectral: f32,
    pub chroma: f32,
    pub tonnetz: f32,
    pub cepstral: f32,
}

impl Default for DescriptorWeights {
    fn default() -> Self {
        DescriptorWeights {
            spectral: 1.0,
            chroma: 1.0,
            tonnetz: 1.0,
            cepstral: 1.0,
        }
    }
}

/// Descriptor weights per task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskWeights {
    pub breath: DescriptorWeights,
    pub speech: DescriptorWeights,
}

impl Default for TaskWeights {
    fn default() -> Self {
        TaskWeights {
            breath: DescriptorWeights::default(),
            // Speech leans on voicing and pitch structure
            speech: DescriptorWeights {
                spectral: 1.2,
                chroma: 1.1,
                tonnetz: 1.3,
                cepstral: 1.4,
            },
        }
    }
}

impl TaskWeights {
    pub fn for_task(&self, task: TaskType) -> DescriptorWeights {
        match task {
            TaskType::Breath => self.breath,
            TaskType::Speech => self.speech,
        }
    }
}

/// Build the 44-value descriptor block
///
/// Layout: centroid/bandwidth/roll-off mean+std (6), chroma means (12),
/// tonnetz means (6), MFCC 1-20 means (20).
pub fn descriptor_block(view: &SignalView<'_>, weights: DescriptorWeights) -> Vec<f32> {
    let mut block = Vec::with_capacity(DESCRIPTOR_LEN);

    let spectra = view.spectra;
    for series in [
        spectra.centroids(),
        spectra.bandwidths(),
        spectra.rolloffs(0.85),
    ] {
        block.push(stats::mean(&series) * weights.spectral);
        block.push(stats::std_dev(&series) * weights.spectral);
    }

    let chroma_frames = chromagram(view);
    let chroma_means = stats::column_means(&chroma_frames, PITCH_CLASSES);
    block.extend(chroma_means.iter().map(|v| v * weights.chroma));

    let tonnetz_frames: Vec<Vec<f32>> = chroma_frames.iter().map(|c| tonnetz(c)).collect();
    let tonnetz_means = stats::column_means(&tonnetz_frames, TONNETZ_DIMS);
    block.extend(tonnetz_means.iter().map(|v| v * weights.tonnetz));

    let mfcc_means = stats::column_means(view.mfcc, DESCRIPTOR_MFCCS);
    block.extend(mfcc_means.iter().map(|v| v * weights.cepstral));

    block
}

/// Pitch class of a frequency, C = 0
fn pitch_class(freq: f32) -> usize {
    let semitones_from_a4 = 12.0 * (freq / 440.0).log2();
    // A is pitch class 9
    ((semitones_from_a4.round() as i64 + 9).rem_euclid(PITCH_CLASSES as i64)) as usize
}

/// Per-frame 12-bin chroma, each frame scaled so its largest bin is 1
pub fn chromagram(view: &SignalView<'_>) -> Vec<Vec<f32>> {
    let spectra = view.spectra;
    // Ignore DC and sub-audio bins
    let classes: Vec<Option<usize>> = spectra
        .frequencies
        .iter()
        .map(|&f| if f >= 27.5 { Some(pitch_class(f)) } else { None })
        .collect();

    spectra
        .magnitudes
        .iter()
        .map(|frame| {
            let mut chroma = vec![0.0f32; PITCH_CLASSES];
            for (m, class) in frame.iter().zip(classes.iter()) {
                if let Some(pc) = class {
                    chroma[*pc] += m * m;
                }
            }

            let peak = chroma.iter().cloned().fold(0.0, f32::max);
            if peak > 0.0 {
                chroma.iter_mut().for_each(|c| *c /= peak);
            }
            chroma
        })
        .collect()
}

/// Six-dimensional tonal centroid of one chroma frame
/// Projects onto the circles of fifths, minor thirds and major thirds
pub fn tonnetz(chroma: &[f32]) -> Vec<f32> {
    use std::f32::consts::PI;

    let total: f32 = chroma.iter().sum();
    let mut centroid = vec![0.0f32; TONNETZ_DIMS];
    if total <= 0.0 {
        return centroid;
    }

    let axes = [(1.0, 7.0 * PI / 6.0), (1.0, 3.0 * PI / 2.0), (0.5, 2.0 * PI / 3.0)];

    for (l, &c) in chroma.iter().enumerate() {
        let weight = c / total;
        for (axis, &(radius, step)) in axes.iter().enumerate() {
            let angle = l as f32 * step;
            centroid[2 * axis] += weight * radius * angle.sin();
            centroid[2 * axis + 1] += weight * radius * angle.cos();
        }
    }

    centroid
}
