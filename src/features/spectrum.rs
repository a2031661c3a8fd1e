// Spectral primitives
// Hann windowing, real FFT magnitude spectra, short-time framing and the
// per-frame spectral shape measures built on top of them

use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

use super::ExtractionError;

/// Planned forward FFT of a fixed size with its analysis window
pub struct SpectrumAnalyzer {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    size: usize,
}

impl SpectrumAnalyzer {
    pub fn new(size: usize) -> Self {
        let size = size.max(2);
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);

        SpectrumAnalyzer {
            fft,
            window: hann_window(size),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of magnitude bins produced (size / 2 + 1)
    pub fn bins(&self) -> usize {
        self.size / 2 + 1
    }

    /// Windowed magnitude spectrum of one frame
    /// Frames shorter than the FFT size are zero-padded
    pub fn magnitude(&self, frame: &[f32]) -> Result<Vec<f32>, ExtractionError> {
        let mut input = vec![0.0; self.size];
        let copy_len = frame.len().min(self.size);
        input[..copy_len].copy_from_slice(&frame[..copy_len]);

        for (sample, w) in input.iter_mut().zip(self.window.iter()) {
            *sample *= w;
        }

        let mut spectrum = self.fft.make_output_vec();
        self.fft
            .process(&mut input, &mut spectrum)
            .map_err(|e| ExtractionError::Fft(e.to_string()))?;

        Ok(spectrum.iter().map(|c| c.norm()).collect())
    }
}

/// Periodic Hann window of length `n`
pub fn hann_window(n: usize) -> Vec<f32> {
    if n == 0 {
        return Vec::new();
    }

    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n as f32).cos()))
        .collect()
}

/// Split a signal into frames of `size` advancing by `hop`
/// A signal shorter than one frame yields a single short frame
pub fn frame_signal(samples: &[f32], size: usize, hop: usize) -> Vec<&[f32]> {
    if samples.is_empty() || size == 0 || hop == 0 {
        return Vec::new();
    }
    if samples.len() <= size {
        return vec![samples];
    }

    let num_frames = (samples.len() - size) / hop + 1;
    (0..num_frames)
        .map(|i| &samples[i * hop..i * hop + size])
        .collect()
}

/// Short-time magnitude spectra of a signal
#[derive(Debug, Clone)]
pub struct SpectralFrames {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub hop_size: usize,

    /// Centre frequency in Hz of each bin
    pub frequencies: Vec<f32>,

    /// One magnitude spectrum per frame
    pub magnitudes: Vec<Vec<f32>>,
}

impl SpectralFrames {
    /// Run the STFT over `samples`
    pub fn compute(
        samples: &[f32],
        sample_rate: u32,
        frame_size: usize,
        hop_size: usize,
    ) -> Result<Self, ExtractionError> {
        let analyzer = SpectrumAnalyzer::new(frame_size);
        let magnitudes = frame_signal(samples, analyzer.size(), hop_size)
            .into_iter()
            .map(|frame| analyzer.magnitude(frame))
            .collect::<Result<Vec<_>, _>>()?;

        let bin_width = sample_rate as f32 / analyzer.size() as f32;
        let frequencies = (0..analyzer.bins()).map(|i| i as f32 * bin_width).collect();

        Ok(SpectralFrames {
            sample_rate,
            frame_size: analyzer.size(),
            hop_size,
            frequencies,
            magnitudes,
        })
    }

    pub fn len(&self) -> usize {
        self.magnitudes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.magnitudes.is_empty()
    }

    /// Per-frame power spectra
    pub fn power(&self) -> Vec<Vec<f32>> {
        self.magnitudes
            .iter()
            .map(|frame| frame.iter().map(|m| m * m).collect())
            .collect()
    }

    /// Power spectrum averaged over all frames
    pub fn mean_power(&self) -> Vec<f32> {
        let mut acc = vec![0.0; self.frequencies.len()];
        if self.magnitudes.is_empty() {
            return acc;
        }

        for frame in &self.magnitudes {
            for (a, m) in acc.iter_mut().zip(frame.iter()) {
                *a += m * m;
            }
        }

        let n = self.magnitudes.len() as f32;
        acc.iter_mut().for_each(|a| *a /= n);
        acc
    }

    /// Spectral centroid (Hz) per frame
    pub fn centroids(&self) -> Vec<f32> {
        self.magnitudes
            .iter()
            .map(|frame| spectral_centroid(frame, &self.frequencies))
            .collect()
    }

    /// Spectral bandwidth (Hz) per frame
    pub fn bandwidths(&self) -> Vec<f32> {
        self.magnitudes
            .iter()
            .map(|frame| {
                let centroid = spectral_centroid(frame, &self.frequencies);
                spectral_bandwidth(frame, &self.frequencies, centroid)
            })
            .collect()
    }

    /// Roll-off frequency per frame at the given cumulative fraction
    pub fn rolloffs(&self, fraction: f32) -> Vec<f32> {
        self.magnitudes
            .iter()
            .map(|frame| spectral_rolloff(frame, &self.frequencies, fraction))
            .collect()
    }

    /// Spectral flatness per frame
    pub fn flatness(&self) -> Vec<f32> {
        self.magnitudes
            .iter()
            .map(|frame| spectral_flatness(frame))
            .collect()
    }

    /// Positive spectral flux per frame (first frame is 0)
    pub fn flux(&self) -> Vec<f32> {
        let mut flux = Vec::with_capacity(self.magnitudes.len());
        let mut prev: Option<&Vec<f32>> = None;

        for frame in &self.magnitudes {
            let value = match prev {
                Some(p) => positive_flux(p, frame),
                None => 0.0,
            };
            flux.push(value);
            prev = Some(frame);
        }

        flux
    }
}

/// Magnitude-weighted mean frequency
pub fn spectral_centroid(magnitudes: &[f32], frequencies: &[f32]) -> f32 {
    let mut weighted_sum = 0.0;
    let mut total_magnitude = 0.0;

    for (&m, &f) in magnitudes.iter().zip(frequencies.iter()) {
        weighted_sum += f * m;
        total_magnitude += m;
    }

    if total_magnitude > 0.0 {
        weighted_sum / total_magnitude
    } else {
        0.0
    }
}

/// Magnitude-weighted standard deviation of frequency around the centroid
pub fn spectral_bandwidth(magnitudes: &[f32], frequencies: &[f32], centroid: f32) -> f32 {
    let total: f32 = magnitudes.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }

    let spread: f32 = magnitudes
        .iter()
        .zip(frequencies.iter())
        .map(|(&m, &f)| m * (f - centroid).powi(2))
        .sum();

    (spread / total).sqrt()
}

/// Lowest frequency below which `fraction` of the spectral magnitude lies
pub fn spectral_rolloff(magnitudes: &[f32], frequencies: &[f32], fraction: f32) -> f32 {
    let total: f32 = magnitudes.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }

    let target = total * fraction;
    let mut cumulative = 0.0;
    for (&m, &f) in magnitudes.iter().zip(frequencies.iter()) {
        cumulative += m;
        if cumulative >= target {
            return f;
        }
    }

    frequencies.last().copied().unwrap_or(0.0)
}

/// Geometric over arithmetic mean of the power spectrum
/// Near 1 for noise-like frames, near 0 for tonal ones
pub fn spectral_flatness(magnitudes: &[f32]) -> f32 {
    if magnitudes.is_empty() {
        return 0.0;
    }

    let n = magnitudes.len() as f32;
    let power: Vec<f32> = magnitudes.iter().map(|m| m * m + 1e-10).collect();
    let log_mean = power.iter().map(|p| p.ln()).sum::<f32>() / n;
    let arith_mean = power.iter().sum::<f32>() / n;

    log_mean.exp() / arith_mean
}

/// Sum of positive magnitude differences between consecutive spectra
pub fn positive_flux(prev: &[f32], curr: &[f32]) -> f32 {
    curr.iter()
        .zip(prev.iter())
        .map(|(c, p)| (c - p).max(0.0))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_hann_window() {
        let window = hann_window(100);

        // Window should taper at edges
        assert!(window[0] < 0.1);
        assert!(window[99] < 0.1);
        assert!(window[50] > 0.9);
    }

    #[test]
    fn test_frame_signal_counts() {
        let samples = vec![0.0; 1024];
        assert_eq!(frame_signal(&samples, 512, 256).len(), 3);
        assert_eq!(frame_signal(&samples[..100], 512, 256).len(), 1);
        assert!(frame_signal(&[], 512, 256).is_empty());
    }

    #[test]
    fn test_sine_peak_and_centroid() {
        let samples = sine(1000.0, 16000, 4096);
        let frames = SpectralFrames::compute(&samples, 16000, 512, 256).unwrap();

        assert_eq!(frames.frequencies.len(), 257);
        let centroids = frames.centroids();
        assert!(centroids.iter().all(|c| (c - 1000.0).abs() < 150.0));

        let rolloffs = frames.rolloffs(0.85);
        assert!(rolloffs.iter().all(|r| (*r - 1000.0).abs() < 200.0));
    }

    #[test]
    fn test_flatness_tone_vs_flat() {
        let flat = vec![1.0; 64];
        assert!((spectral_flatness(&flat) - 1.0).abs() < 1e-3);

        let mut tonal = vec![0.0; 64];
        tonal[10] = 1.0;
        assert!(spectral_flatness(&tonal) < 0.1);
    }

    #[test]
    fn test_silence_measures_are_zero() {
        let frames = SpectralFrames::compute(&vec![0.0; 2048], 16000, 512, 256).unwrap();
        assert!(frames.centroids().iter().all(|&c| c == 0.0));
        assert!(frames.bandwidths().iter().all(|&b| b == 0.0));
        assert!(frames.flux().iter().all(|&f| f == 0.0));
    }

    #[test]
    fn test_flux_first_frame_zero() {
        let mut samples = vec![0.0; 2048];
        samples.extend(sine(2000.0, 16000, 2048));
        let frames = SpectralFrames::compute(&samples, 16000, 512, 256).unwrap();
        let flux = frames.flux();

        assert_eq!(flux[0], 0.0);
        assert!(flux.iter().cloned().fold(0.0, f32::max) > 1.0);
    }
}
