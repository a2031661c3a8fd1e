// Onset detection
// Spectral flux with an adaptive mean + k·std threshold and a minimum gap
// between detections

use serde::{Deserialize, Serialize};

use super::spectrum::SpectralFrames;
use super::stats;
use super::ExtractionError;

/// Onset detection result
#[derive(Debug, Clone)]
pub struct Onset {
    /// Timestamp in milliseconds from start of audio
    pub timestamp_ms: f64,

    /// Onset strength/confidence [0.0, 1.0]
    /// Higher values indicate stronger spectral changes
    pub strength: f32,
}

/// Configuration for onset detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnsetConfig {
    /// FFT window size in samples (power of 2)
    pub window_size: usize,

    /// Hop size in samples (advance between frames)
    pub hop_size: usize,

    /// Threshold multiplier for adaptive peak picking
    /// Threshold = mean(flux) + threshold_factor * std(flux)
    pub threshold_factor: f32,

    /// Minimum time between onsets in milliseconds
    /// Prevents duplicate detections
    pub min_onset_gap_ms: f64,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        // 64 ms window at 16 kHz
        OnsetConfig {
            window_size: 1024,
            hop_size: 256,
            threshold_factor: 1.5,
            min_onset_gap_ms: 30.0,
        }
    }
}

/// Detect onsets in a mono signal
pub fn detect_onsets(
    samples: &[f32],
    sample_rate: u32,
    config: &OnsetConfig,
) -> Result<Vec<Onset>, ExtractionError> {
    if samples.is_empty() || config.hop_size == 0 {
        return Ok(Vec::new());
    }

    let frames = SpectralFrames::compute(samples, sample_rate, config.window_size, config.hop_size)?;
    let flux = frames.flux();

    Ok(pick_onset_peaks(&flux, sample_rate, config))
}

/// Onsets per second of audio
pub fn onset_rate(
    samples: &[f32],
    sample_rate: u32,
    config: &OnsetConfig,
) -> Result<f32, ExtractionError> {
    if samples.is_empty() || sample_rate == 0 {
        return Ok(0.0);
    }

    let onsets = detect_onsets(samples, sample_rate, config)?;
    let duration = samples.len() as f32 / sample_rate as f32;

    Ok(onsets.len() as f32 / duration)
}

/// Pick local maxima of the flux curve above the adaptive threshold
fn pick_onset_peaks(flux: &[f32], sample_rate: u32, config: &OnsetConfig) -> Vec<Onset> {
    if flux.len() < 3 || config.hop_size == 0 || sample_rate == 0 {
        return Vec::new();
    }

    let mean = stats::mean(flux);
    let std_dev = stats::std_dev(flux);
    let threshold = mean + config.threshold_factor * std_dev;

    let min_gap_samples = (config.min_onset_gap_ms * sample_rate as f64 / 1000.0) as usize;
    let min_gap_frames = min_gap_samples / config.hop_size;

    let mut onsets = Vec::new();
    let mut last_onset_frame: Option<usize> = None;

    for i in 1..flux.len() - 1 {
        let is_peak = flux[i] > flux[i - 1] && flux[i] > flux[i + 1];
        let above_threshold = flux[i] > threshold;
        let gap_ok = last_onset_frame.map_or(true, |last| i - last >= min_gap_frames);

        if is_peak && above_threshold && gap_ok {
            let timestamp_ms = (i * config.hop_size) as f64 * 1000.0 / sample_rate as f64;
            // 1e-6 keeps a flat flux curve from dividing by zero
            let strength = (flux[i] - threshold) / (std_dev + 1e-6);

            onsets.push(Onset {
                timestamp_ms,
                strength: strength.clamp(0.0, 1.0),
            });

            last_onset_frame = Some(i);
        }
    }

    onsets
}
