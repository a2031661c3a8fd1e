// Audio normalization
// Converts an arbitrary input file into canonical 16 kHz mono PCM, validates
// its duration, and owns the temporary canonical file for the request

use hound::{SampleFormat, WavSpec, WavWriter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempPath;
use thiserror::Error;

use crate::audio::ingest::{self, AudioError};
use crate::events::types::TaskType;

/// Canonical sample rate consumed by feature extraction
pub const CANONICAL_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Error)]
pub enum NormalizationError {
    #[error("Input file not found: {0}")]
    NotFound(PathBuf),

    #[error("Audio I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio decode failed: {0}")]
    Decode(AudioError),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to write canonical audio: {0}")]
    Encode(#[from] hound::Error),

    #[error("Corrupt audio: {0}")]
    Corrupt(String),

    #[error("Conversion tool failed: {0}")]
    Conversion(String),

    #[error("Audio too short: {duration:.2}s (minimum: {minimum}s)")]
    TooShort { duration: f64, minimum: f64 },
}

impl From<AudioError> for NormalizationError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::UnsupportedFormat(format) => NormalizationError::UnsupportedFormat(format),
            other => NormalizationError::Decode(other),
        }
    }
}

/// How to produce the canonical waveform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionTool {
    /// Use ffmpeg when it can be executed, otherwise convert in-process
    Auto,

    /// Always decode, mix and resample in-process
    InProcess,
}

/// Normalizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Minimum clip duration in seconds
    pub min_duration: f64,

    /// Speech clips are trimmed to this many seconds
    pub speech_max_duration: f64,

    /// Conversion strategy
    pub tool: ConversionTool,

    /// ffmpeg executable name or path
    pub ffmpeg_program: String,

    /// Directory for canonical temp files (system temp dir when unset)
    pub temp_dir: Option<PathBuf>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        NormalizerConfig {
            min_duration: 0.5,
            speech_max_duration: 30.0,
            tool: ConversionTool::Auto,
            ffmpeg_program: "ffmpeg".to_string(),
            temp_dir: None,
        }
    }
}

/// Canonical waveform for one pipeline invocation
///
/// Owns the temporary canonical WAV file; dropping the value deletes it.
#[derive(Debug)]
pub struct NormalizedAudio {
    /// Mono samples at `sample_rate`
    pub samples: Vec<f32>,

    /// Always `CANONICAL_SAMPLE_RATE`
    pub sample_rate: u32,

    /// Duration in seconds after any capping
    pub duration_secs: f64,

    /// Hex SHA-256 of the original input bytes
    pub source_sha256: String,

    canonical_file: TempPath,
}

impl NormalizedAudio {
    /// Location of the canonical WAV file while this value is alive
    pub fn canonical_path(&self) -> &Path {
        &self.canonical_file
    }

    /// Build from in-memory mono samples (writes its own canonical file)
    pub fn from_samples(
        samples: Vec<f32>,
        temp_dir: Option<&Path>,
    ) -> Result<Self, NormalizationError> {
        let canonical_file = create_temp_wav(temp_dir)?;
        write_canonical_wav(&canonical_file, &samples)?;
        let duration_secs = samples.len() as f64 / CANONICAL_SAMPLE_RATE as f64;
        let source_sha256 = hex::encode(Sha256::digest(
            samples
                .iter()
                .flat_map(|s| s.to_le_bytes())
                .collect::<Vec<u8>>(),
        ));

        Ok(NormalizedAudio {
            samples,
            sample_rate: CANONICAL_SAMPLE_RATE,
            duration_secs,
            source_sha256,
            canonical_file,
        })
    }
}

/// Audio normalizer: any input file -> canonical 16 kHz mono
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizerConfig,

    /// Result of the one-time `ffmpeg -version` check
    ffmpeg_found: OnceCell<bool>,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Normalizer {
            config,
            ffmpeg_found: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Whether ffmpeg will be used; checked on first use only
    pub fn uses_ffmpeg(&self) -> bool {
        match self.config.tool {
            ConversionTool::Auto => *self
                .ffmpeg_found
                .get_or_init(|| ffmpeg_available(&self.config.ffmpeg_program)),
            ConversionTool::InProcess => false,
        }
    }

    /// Normalize the file at `input` for the given task
    ///
    /// `min_duration` overrides the configured minimum for this call only.
    pub fn normalize(
        &self,
        input: &Path,
        task: TaskType,
        min_duration: Option<f64>,
    ) -> Result<NormalizedAudio, NormalizationError> {
        if !input.is_file() {
            return Err(NormalizationError::NotFound(input.to_path_buf()));
        }

        let input_bytes = std::fs::read(input)?;
        let source_sha256 = hex::encode(Sha256::digest(&input_bytes));

        let cap = match task {
            TaskType::Speech if self.config.speech_max_duration > 0.0 => {
                Some(self.config.speech_max_duration)
            }
            _ => None,
        };

        // Dropped (and deleted) on every early return below
        let canonical_file = create_temp_wav(self.config.temp_dir.as_deref())?;

        if self.uses_ffmpeg() {
            log::debug!("Normalizing {} with {}", input.display(), self.config.ffmpeg_program);
            convert_with_ffmpeg(&self.config.ffmpeg_program, input, &canonical_file, cap)?;
        } else {
            if self.config.tool == ConversionTool::Auto {
                log::warn!("ffmpeg not found, using in-process conversion");
            }
            let extension = input.extension().and_then(|ext| ext.to_str());
            convert_in_process(input_bytes, extension, &canonical_file, cap)?;
        }

        let canonical = ingest::read_wav_file(&canonical_file)?;
        if canonical.frame_count == 0 {
            return Err(NormalizationError::Corrupt("no audio frames".to_string()));
        }
        if canonical.sample_rate != CANONICAL_SAMPLE_RATE || canonical.channels != 1 {
            return Err(NormalizationError::Corrupt(format!(
                "canonical file is {} Hz / {} channels",
                canonical.sample_rate, canonical.channels
            )));
        }

        let mut samples = canonical.to_mono();
        if let Some(max_secs) = cap {
            let max_len = (max_secs * CANONICAL_SAMPLE_RATE as f64) as usize;
            samples.truncate(max_len);
        }

        let minimum = min_duration.unwrap_or(self.config.min_duration);
        let duration_secs = samples.len() as f64 / CANONICAL_SAMPLE_RATE as f64;
        if duration_secs < minimum {
            return Err(NormalizationError::TooShort {
                duration: duration_secs,
                minimum,
            });
        }

        log::debug!(
            "Normalized {} to {:.2}s of canonical audio",
            input.display(),
            duration_secs
        );

        Ok(NormalizedAudio {
            samples,
            sample_rate: CANONICAL_SAMPLE_RATE,
            duration_secs,
            source_sha256,
            canonical_file,
        })
    }
}

/// Check whether the conversion tool can be executed
pub fn ffmpeg_available(program: &str) -> bool {
    Command::new(program)
        .arg("-version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn create_temp_wav(temp_dir: Option<&Path>) -> Result<TempPath, NormalizationError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("breathscan-").suffix(".wav");

    let file = match temp_dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };

    Ok(file.into_temp_path())
}

fn convert_with_ffmpeg(
    program: &str,
    input: &Path,
    output: &Path,
    cap: Option<f64>,
) -> Result<(), NormalizationError> {
    let mut cmd = Command::new(program);
    cmd.args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
        .arg(input)
        .args(["-acodec", "pcm_s16le", "-ar"])
        .arg(CANONICAL_SAMPLE_RATE.to_string())
        .args(["-ac", "1"]);

    if let Some(secs) = cap {
        cmd.arg("-t").arg(format!("{secs}"));
    }

    let out = cmd.arg(output).output()?;
    if !out.status.success() {
        return Err(NormalizationError::Conversion(
            String::from_utf8_lossy(&out.stderr).trim().to_string(),
        ));
    }

    Ok(())
}

fn convert_in_process(
    input_bytes: Vec<u8>,
    extension: Option<&str>,
    output: &Path,
    cap: Option<f64>,
) -> Result<(), NormalizationError> {
    let raw = ingest::ingest_audio(input_bytes, extension)?;
    if raw.frame_count == 0 {
        return Err(NormalizationError::Corrupt("no audio frames".to_string()));
    }

    let mono = raw.to_mono();
    let mut resampled = resample_linear(&mono, raw.sample_rate, CANONICAL_SAMPLE_RATE);

    if let Some(max_secs) = cap {
        resampled.truncate((max_secs * CANONICAL_SAMPLE_RATE as f64) as usize);
    }

    write_canonical_wav(output, &resampled)
}

fn write_canonical_wav(path: &Path, samples: &[f32]) -> Result<(), NormalizationError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: CANONICAL_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        writer.write_sample((clamped * i16::MAX as f32).round() as i16)?;
    }
    writer.finalize()?;

    Ok(())
}

/// Resample by linear interpolation between neighbouring samples
/// Output length is floor(len * to / from)
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }

    let target_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    if target_len == 0 {
        return Vec::new();
    }
    if target_len == 1 || samples.len() == 1 {
        return vec![samples[0]; target_len];
    }

    // Positions evenly spaced over [0, len - 1], both ends included
    let step = (samples.len() - 1) as f64 / (target_len - 1) as f64;

    (0..target_len)
        .map(|i| {
            let pos = i as f64 * step;
            let left = pos.floor() as usize;
            let right = (left + 1).min(samples.len() - 1);
            let frac = (pos - left as f64) as f32;
            samples[left] * (1.0 - frac) + samples[right] * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn in_process(dir: &Path) -> Normalizer {
        Normalizer::new(NormalizerConfig {
            tool: ConversionTool::InProcess,
            temp_dir: Some(dir.to_path_buf()),
            ..Default::default()
        })
    }

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, frames: usize) {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            let v = ((i as f32 * 0.05).sin() * 8000.0) as i16;
            for _ in 0..channels {
                writer.write_sample(v).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    fn leftover_wavs(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("breathscan-"))
            .count()
    }

    #[test]
    fn test_resample_halves_length() {
        let samples: Vec<f32> = (0..32000).map(|i| i as f32).collect();
        let out = resample_linear(&samples, 32000, 16000);
        assert_eq!(out.len(), 16000);
        assert_eq!(out[0], 0.0);
        assert!((out[out.len() - 1] - 31999.0).abs() < 1e-2);
    }

    #[test]
    fn test_resample_interpolates_between_points() {
        let out = resample_linear(&[0.0, 1.0], 2, 3);
        assert_eq!(out.len(), 3);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&samples, 16000, 16000), samples);
    }

    #[test]
    fn test_normalize_stereo_44k() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input.wav");
        write_wav(&input, 44100, 2, 44100);

        let normalized = in_process(dir.path())
            .normalize(&input, TaskType::Breath, None)
            .unwrap();

        assert_eq!(normalized.sample_rate, CANONICAL_SAMPLE_RATE);
        assert_eq!(normalized.samples.len(), 16000);
        assert!((normalized.duration_secs - 1.0).abs() < 1e-3);
        assert_eq!(normalized.source_sha256.len(), 64);
        assert!(normalized.canonical_path().exists());
    }

    #[test]
    fn test_canonical_file_deleted_on_drop() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input.wav");
        write_wav(&input, 16000, 1, 16000);

        let normalized = in_process(dir.path())
            .normalize(&input, TaskType::Breath, None)
            .unwrap();
        let canonical = normalized.canonical_path().to_path_buf();
        assert!(canonical.exists());

        drop(normalized);
        assert!(!canonical.exists());
        assert_eq!(leftover_wavs(dir.path()), 0);
    }

    #[test]
    fn test_too_short_rejected_and_cleaned_up() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("short.wav");
        write_wav(&input, 16000, 1, 3200); // 0.2s

        let result = in_process(dir.path()).normalize(&input, TaskType::Breath, None);

        match result {
            Err(NormalizationError::TooShort { duration, minimum }) => {
                assert!((duration - 0.2).abs() < 1e-3);
                assert_eq!(minimum, 0.5);
            }
            other => panic!("expected TooShort, got {other:?}"),
        }
        assert_eq!(leftover_wavs(dir.path()), 0);
    }

    #[test]
    fn test_speech_is_capped() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("long.wav");
        write_wav(&input, 16000, 1, 16000 * 3);

        let normalizer = Normalizer::new(NormalizerConfig {
            tool: ConversionTool::InProcess,
            temp_dir: Some(dir.path().to_path_buf()),
            speech_max_duration: 2.0,
            ..Default::default()
        });

        let speech = normalizer.normalize(&input, TaskType::Speech, None).unwrap();
        assert!((speech.duration_secs - 2.0).abs() < 1e-3);

        let breath = normalizer.normalize(&input, TaskType::Breath, None).unwrap();
        assert!((breath.duration_secs - 3.0).abs() < 1e-3);
    }

    #[test]
    fn test_missing_and_corrupt_inputs() {
        let dir = TempDir::new().unwrap();
        let normalizer = in_process(dir.path());

        let missing = normalizer.normalize(&dir.path().join("nope.wav"), TaskType::Breath, None);
        assert!(matches!(missing, Err(NormalizationError::NotFound(_))));

        let truncated = dir.path().join("truncated.wav");
        std::fs::write(&truncated, b"RIFF\x24\0\0\0WAVEfmt ").unwrap();
        let corrupt = normalizer.normalize(&truncated, TaskType::Breath, None);
        assert!(matches!(corrupt, Err(NormalizationError::Decode(_))));

        let junk = dir.path().join("junk.mp3");
        std::fs::write(&junk, b"not audio at all").unwrap();
        let unknown = normalizer.normalize(&junk, TaskType::Breath, None);
        assert!(matches!(unknown, Err(NormalizationError::UnsupportedFormat(_))));
        assert_eq!(leftover_wavs(dir.path()), 0);
    }

    #[test]
    fn test_ffmpeg_check_handles_missing_binary() {
        assert!(!ffmpeg_available("definitely-not-a-real-ffmpeg-binary"));
    }

    #[test]
    fn test_ffmpeg_check_runs_once() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input.wav");
        write_wav(&input, 16000, 1, 16000);

        let normalizer = Normalizer::new(NormalizerConfig {
            tool: ConversionTool::Auto,
            ffmpeg_program: "no-such-ffmpeg".to_string(),
            temp_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        });
        assert_eq!(normalizer.ffmpeg_found.get(), None);

        normalizer.normalize(&input, TaskType::Breath, None).unwrap();
        assert_eq!(normalizer.ffmpeg_found.get(), Some(&false));

        // A clone carries the cached answer
        let cloned = normalizer.clone();
        assert_eq!(cloned.ffmpeg_found.get(), Some(&false));
        assert!(!cloned.uses_ffmpeg());
    }

    #[test]
    fn test_per_call_minimum_duration() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("clip.wav");
        write_wav(&input, 16000, 1, 9600); // 0.6s

        let normalizer = in_process(dir.path());
        assert!(normalizer.normalize(&input, TaskType::Breath, None).is_ok());

        match normalizer.normalize(&input, TaskType::Breath, Some(1.0)) {
            Err(NormalizationError::TooShort { minimum, .. }) => assert_eq!(minimum, 1.0),
            other => panic!("expected TooShort, got {other:?}"),
        }
        assert_eq!(leftover_wavs(dir.path()), 0);
    }

    /// Minimal FLAC stream: STREAMINFO plus verbatim 16-bit mono frames
    fn flac_bytes(sample_rate: u32, samples: &[i16], block_size: usize) -> Vec<u8> {
        fn crc8(data: &[u8]) -> u8 {
            let mut crc = 0u8;
            for &byte in data {
                crc ^= byte;
                for _ in 0..8 {
                    crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x07 } else { crc << 1 };
                }
            }
            crc
        }

        fn crc16(data: &[u8]) -> u16 {
            let mut crc = 0u16;
            for &byte in data {
                crc ^= (byte as u16) << 8;
                for _ in 0..8 {
                    crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x8005 } else { crc << 1 };
                }
            }
            crc
        }

        let mut out = b"fLaC".to_vec();

        // Last metadata block, type STREAMINFO, 34 bytes
        out.extend_from_slice(&[0x80, 0x00, 0x00, 0x22]);
        out.extend_from_slice(&(block_size as u16).to_be_bytes());
        out.extend_from_slice(&(block_size as u16).to_be_bytes());
        out.extend_from_slice(&[0; 6]);
        let packed = ((sample_rate as u64) << 44) | (15u64 << 36) | samples.len() as u64;
        out.extend_from_slice(&packed.to_be_bytes());
        out.extend_from_slice(&[0; 16]);

        for (number, block) in samples.chunks(block_size).enumerate() {
            let mut frame = vec![0xFF, 0xF8, 0x70, 0x08, number as u8];
            frame.extend_from_slice(&((block.len() - 1) as u16).to_be_bytes());
            frame.push(crc8(&frame));

            frame.push(0x02);
            for &s in block {
                frame.extend_from_slice(&s.to_be_bytes());
            }
            let crc = crc16(&frame);
            frame.extend_from_slice(&crc.to_be_bytes());
            out.extend_from_slice(&frame);
        }

        out
    }

    #[test]
    fn test_flac_without_ffmpeg() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("breath.flac");
        let samples: Vec<i16> = (0..16000)
            .map(|i| ((i as f32 * 0.05).sin() * 8000.0) as i16)
            .collect();
        std::fs::write(&input, flac_bytes(16000, &samples, 1000)).unwrap();

        let normalizer = Normalizer::new(NormalizerConfig {
            tool: ConversionTool::Auto,
            ffmpeg_program: "no-such-ffmpeg".to_string(),
            temp_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        });
        let normalized = normalizer.normalize(&input, TaskType::Breath, None).unwrap();

        assert_eq!(normalized.samples.len(), 16000);
        assert!((normalized.duration_secs - 1.0).abs() < 1e-3);
        assert!((normalized.samples[100] - samples[100] as f32 / 32768.0).abs() < 1e-3);
    }
}
