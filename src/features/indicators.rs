// Acoustic indicators
// Interpretable respiratory-event signals the decision engine reasons over:
// burst energy, band balance, onset density and overall level

use serde::{Deserialize, Serialize};

use super::onset::{self, OnsetConfig};
use super::spectrum::{frame_signal, SpectralFrames};
use super::stats;
use super::ExtractionError;
use crate::events::types::AcousticIndicators;

/// Band boundaries and envelope framing for indicator computation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// Energy envelope frame length in samples
    pub envelope_frame: usize,

    /// Energy envelope hop in samples
    pub envelope_hop: usize,

    /// Upper edge of the low band in Hz (inclusive)
    pub low_band_max_hz: f32,

    /// Upper edge of the mid band in Hz (inclusive)
    pub mid_band_max_hz: f32,

    /// Frames above mean + burst_sigma·std count as burst frames
    pub burst_sigma: f32,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        IndicatorConfig {
            envelope_frame: 512,
            envelope_hop: 256,
            low_band_max_hz: 500.0,
            mid_band_max_hz: 2000.0,
            burst_sigma: 2.0,
        }
    }
}

/// Compute all indicators from the attenuated waveform and its spectra
pub fn compute_indicators(
    samples: &[f32],
    sample_rate: u32,
    spectra: &SpectralFrames,
    config: &IndicatorConfig,
    onset_config: &OnsetConfig,
) -> Result<AcousticIndicators, ExtractionError> {
    if samples.is_empty() || sample_rate == 0 {
        return Ok(AcousticIndicators::default());
    }

    let envelope = energy_envelope(samples, config.envelope_frame, config.envelope_hop);
    let env_mean = stats::mean(&envelope);
    let env_std = stats::std_dev(&envelope);

    let burst_threshold = env_mean + config.burst_sigma * env_std;
    let cough_event_ratio = if envelope.is_empty() {
        0.0
    } else {
        envelope.iter().filter(|&&e| e > burst_threshold).count() as f32 / envelope.len() as f32
    };

    let energy_variation = if env_mean > 0.0 { env_std / env_mean } else { 0.0 };

    let [low, mid, high] = band_energies(spectra, config);
    let cough_frequency_ratio = mid / (low + 1e-10);
    let harsh_sound_ratio = high / (low + 1e-10);

    let onset_rate = onset::onset_rate(samples, sample_rate, onset_config)?;

    let signal_strength = samples.iter().map(|x| x.abs()).sum::<f32>() / samples.len() as f32;
    let duration = samples.len() as f32 / sample_rate as f32;

    Ok(AcousticIndicators {
        cough_event_ratio,
        cough_frequency_ratio,
        harsh_sound_ratio,
        onset_rate,
        energy_variation,
        signal_strength,
        duration,
    }
    .sanitized())
}

/// Mean-square energy per frame
pub fn energy_envelope(samples: &[f32], frame: usize, hop: usize) -> Vec<f32> {
    frame_signal(samples, frame, hop)
        .into_iter()
        .map(|f| f.iter().map(|x| x * x).sum::<f32>() / f.len() as f32)
        .collect()
}

/// Absolute [low, mid, high] energies of the averaged power spectrum
pub fn band_energies(spectra: &SpectralFrames, config: &IndicatorConfig) -> [f32; 3] {
    let power = spectra.mean_power();
    let mut bands = [0.0f32; 3];

    for (&freq, &p) in spectra.frequencies.iter().zip(power.iter()) {
        let band = if freq <= config.low_band_max_hz {
            0
        } else if freq <= config.mid_band_max_hz {
            1
        } else {
            2
        };
        bands[band] += p;
    }

    bands
}
