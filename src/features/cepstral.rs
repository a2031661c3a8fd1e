// Mel filterbank and MFCC computation

use super::spectrum::SpectralFrames;

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filters over the bins of a power spectrum
#[derive(Debug, Clone)]
pub struct MelFilterbank {
    filters: Vec<Vec<f32>>,
}

impl MelFilterbank {
    /// Build `n_mels` filters spanning 0 Hz to Nyquist for the given bin centres
    pub fn new(n_mels: usize, frequencies: &[f32], sample_rate: u32) -> Self {
        let n_mels = n_mels.max(1);
        let max_mel = hz_to_mel(sample_rate as f32 / 2.0);

        // n_mels + 2 edge points, evenly spaced on the mel scale
        let edges: Vec<f32> = (0..n_mels + 2)
            .map(|i| mel_to_hz(max_mel * i as f32 / (n_mels + 1) as f32))
            .collect();

        let filters = (0..n_mels)
            .map(|m| {
                let (lower, centre, upper) = (edges[m], edges[m + 1], edges[m + 2]);
                frequencies
                    .iter()
                    .map(|&f| {
                        if f <= lower || f >= upper {
                            0.0
                        } else if f <= centre {
                            (f - lower) / (centre - lower)
                        } else {
                            (upper - f) / (upper - centre)
                        }
                    })
                    .collect()
            })
            .collect();

        MelFilterbank { filters }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Mel band energies of one power spectrum
    pub fn apply(&self, power: &[f32]) -> Vec<f32> {
        self.filters
            .iter()
            .map(|filter| filter.iter().zip(power.iter()).map(|(w, p)| w * p).sum())
            .collect()
    }
}

/// MFCCs from log mel energies via an orthonormal DCT-II
#[derive(Debug, Clone)]
pub struct MfccExtractor {
    filterbank: MelFilterbank,
    dct: Vec<Vec<f32>>,
}

impl MfccExtractor {
    pub fn new(n_mfcc: usize, n_mels: usize, frequencies: &[f32], sample_rate: u32) -> Self {
        let filterbank = MelFilterbank::new(n_mels, frequencies, sample_rate);
        let n = filterbank.len();
        let n_mfcc = n_mfcc.min(n);

        let dct = (0..n_mfcc)
            .map(|k| {
                let scale = if k == 0 {
                    (1.0 / n as f32).sqrt()
                } else {
                    (2.0 / n as f32).sqrt()
                };
                (0..n)
                    .map(|i| {
                        scale
                            * (std::f32::consts::PI * k as f32 * (2 * i + 1) as f32
                                / (2 * n) as f32)
                                .cos()
                    })
                    .collect()
            })
            .collect();

        MfccExtractor { filterbank, dct }
    }

    /// Build for the bins of an existing STFT
    pub fn for_frames(n_mfcc: usize, n_mels: usize, frames: &SpectralFrames) -> Self {
        Self::new(n_mfcc, n_mels, &frames.frequencies, frames.sample_rate)
    }

    pub fn n_mfcc(&self) -> usize {
        self.dct.len()
    }

    /// Coefficients of one magnitude spectrum
    pub fn coefficients(&self, magnitudes: &[f32]) -> Vec<f32> {
        let power: Vec<f32> = magnitudes.iter().map(|m| m * m).collect();
        let log_mel: Vec<f32> = self
            .filterbank
            .apply(&power)
            .iter()
            .map(|e| (e + 1e-10).ln())
            .collect();

        self.dct
            .iter()
            .map(|row| row.iter().zip(log_mel.iter()).map(|(c, e)| c * e).sum())
            .collect()
    }

    /// Coefficients for every frame (frames × n_mfcc)
    pub fn compute(&self, frames: &SpectralFrames) -> Vec<Vec<f32>> {
        frames
            .magnitudes
            .iter()
            .map(|frame| self.coefficients(frame))
            .collect()
    }
}
