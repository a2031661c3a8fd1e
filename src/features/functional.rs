// Functional feature block
// Frame-level descriptors summarised by statistical functionals, behind a
// backend trait so an external extractor can be plugged in. When the backend
// is unavailable a reduced cepstral/spectral set is used instead.

use super::spectrum::{frame_signal, SpectralFrames};
use super::stats;
use super::ExtractionError;

/// Low-level descriptors in the built-in block (7 spectral/temporal + 9 MFCCs)
pub const FRAME_DESCRIPTORS: usize = 16;

/// Functionals per descriptor: mean, std, p20, p80
pub const FUNCTIONALS_PER_DESCRIPTOR: usize = 4;

/// Length of the built-in functional block
pub const FRAME_FUNCTIONALS_LEN: usize = FRAME_DESCRIPTORS * FUNCTIONALS_PER_DESCRIPTOR;

/// Length of the reduced fallback block
pub const REDUCED_LEN: usize = 32;

const FUNCTIONAL_MFCCS: usize = 9;
const REDUCED_MFCCS: usize = 13;

/// Everything a functional backend may look at for one clip
pub struct SignalView<'a> {
    /// Attenuated mono samples
    pub samples: &'a [f32],
    pub sample_rate: u32,

    /// Short-time spectra of `samples`
    pub spectra: &'a SpectralFrames,

    /// Per-frame MFCCs (frames × coefficients)
    pub mfcc: &'a [Vec<f32>],
}

/// Source of the functional feature block
///
/// Implementations return `ExtractionError::BackendUnavailable` when their
/// capability is missing; the extractor then falls back to the reduced set.
pub trait FunctionalBackend: Send + Sync {
    /// Short identifier recorded in feature provenance
    fn name(&self) -> &str;

    /// Number of values `extract` returns
    fn block_len(&self) -> usize;

    fn extract(&self, view: &SignalView<'_>) -> Result<Vec<f32>, ExtractionError>;
}

/// Built-in backend: 16 frame descriptors × (mean, std, p20, p80)
#[derive(Debug, Clone, Default)]
pub struct FrameFunctionals;

impl FunctionalBackend for FrameFunctionals {
    fn name(&self) -> &str {
        "frame_functionals"
    }

    fn block_len(&self) -> usize {
        FRAME_FUNCTIONALS_LEN
    }

    fn extract(&self, view: &SignalView<'_>) -> Result<Vec<f32>, ExtractionError> {
        let spectra = view.spectra;
        let mut descriptors: Vec<Vec<f32>> = vec![
            frame_rms(view.samples, spectra),
            frame_zcr(view.samples, spectra),
            spectra.centroids(),
            spectra.bandwidths(),
            spectra.rolloffs(0.85),
            spectra.flatness(),
            spectra.flux(),
        ];
        for k in 0..FUNCTIONAL_MFCCS {
            descriptors.push(stats::column(view.mfcc, k));
        }

        let block = descriptors
            .iter()
            .flat_map(|series| stats::functionals(series))
            .collect();

        Ok(block)
    }
}

/// Reduced fallback: MFCC 1-13 mean+std, then centroid, ZCR and RMS mean+std
pub fn reduced_functionals(view: &SignalView<'_>) -> Vec<f32> {
    let mut block = Vec::with_capacity(REDUCED_LEN);

    for k in 0..REDUCED_MFCCS {
        let series = stats::column(view.mfcc, k);
        block.push(stats::mean(&series));
        block.push(stats::std_dev(&series));
    }

    for series in [
        view.spectra.centroids(),
        frame_zcr(view.samples, view.spectra),
        frame_rms(view.samples, view.spectra),
    ] {
        block.push(stats::mean(&series));
        block.push(stats::std_dev(&series));
    }

    block
}

/// Root-mean-square per STFT-aligned frame
pub fn frame_rms(samples: &[f32], spectra: &SpectralFrames) -> Vec<f32> {
    frame_signal(samples, spectra.frame_size, spectra.hop_size)
        .into_iter()
        .map(|frame| (frame.iter().map(|x| x * x).sum::<f32>() / frame.len() as f32).sqrt())
        .collect()
}

/// Zero-crossing rate per STFT-aligned frame
pub fn frame_zcr(samples: &[f32], spectra: &SpectralFrames) -> Vec<f32> {
    frame_signal(samples, spectra.frame_size, spectra.hop_size)
        .into_iter()
        .map(zero_crossing_rate)
        .collect()
}

/// Fraction of adjacent sample pairs whose sign differs
/// Higher ZCR indicates noisy/unvoiced content
pub fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }

    let crossings = samples
        .windows(2)
        .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
        .count();

    crossings as f32 / (samples.len() - 1) as f32
}
