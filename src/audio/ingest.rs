// Audio ingestion module
// Decodes WAV data (hound) and other containers (symphonia) into interleaved
// f32 samples plus format metadata

use hound::{SampleFormat, WavReader};
use std::io::Cursor;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Failed to read WAV data: {0}")]
    WavReadError(#[from] hound::Error),

    #[error("Failed to read audio file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid audio data: {0}")]
    InvalidData(String),

    #[error("Failed to decode audio stream: {0}")]
    StreamDecode(String),
}

impl From<SymphoniaError> for AudioError {
    fn from(err: SymphoniaError) -> Self {
        match err {
            SymphoniaError::IoError(e) => AudioError::Io(e),
            SymphoniaError::Unsupported(what) => AudioError::UnsupportedFormat(what.to_string()),
            other => AudioError::StreamDecode(other.to_string()),
        }
    }
}

/// Decoded audio exactly as it arrived: native rate, native channel layout
#[derive(Debug, Clone)]
pub struct RawAudio {
    /// Interleaved samples normalized to f32 in range [-1.0, 1.0]
    pub samples: Vec<f32>,

    /// Sample rate in Hz (e.g., 16000, 44100, 48000)
    pub sample_rate: u32,

    /// Number of channels (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Bit depth of original audio (8, 16, 24, 32)
    pub bit_depth: u16,

    /// Total number of frames (samples / channels)
    pub frame_count: usize,
}

impl RawAudio {
    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count as f64 / self.sample_rate as f64
    }

    /// Convert to mono by averaging channels
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels <= 1 {
            return self.samples.clone();
        }

        let channels = self.channels as usize;
        self.samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }
}

/// Ingest a WAV file from raw bytes
pub fn ingest_wav(data: &[u8]) -> Result<RawAudio, AudioError> {
    let reader = WavReader::new(Cursor::new(data))?;
    decode(reader)
}

/// Ingest a WAV file from disk
pub fn read_wav_file(path: &Path) -> Result<RawAudio, AudioError> {
    let bytes = std::fs::read(path)?;
    ingest_wav(&bytes)
}

/// Whether the bytes carry a RIFF/WAVE header
pub fn is_wav(data: &[u8]) -> bool {
    data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE"
}

/// Ingest any supported container: WAV through hound, everything else
/// (FLAC, MP3, OGG/Vorbis, AAC/M4A, ...) through symphonia
///
/// `extension` is only a hint; the container is detected from content.
pub fn ingest_audio(data: Vec<u8>, extension: Option<&str>) -> Result<RawAudio, AudioError> {
    if is_wav(&data) {
        return ingest_wav(&data);
    }
    decode_stream(data, extension)
}

fn decode_stream(data: Vec<u8>, extension: Option<&str>) -> Result<RawAudio, AudioError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(data)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| match e {
            // Format detection runs off the end of short inputs without a marker
            SymphoniaError::IoError(_) | SymphoniaError::Unsupported(_) => {
                AudioError::UnsupportedFormat(format!("unrecognized container: {}", e))
            }
            other => other.into(),
        })?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioError::InvalidData("no audio track".to_string()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| AudioError::InvalidData("unknown sample rate".to_string()))?;
    let bit_depth = codec_params.bits_per_sample.unwrap_or(0) as u16;

    let mut decoder =
        symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

    let mut channels = codec_params.channels.map(|c| c.count() as u16).unwrap_or(0);
    let mut samples = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        channels = spec.channels.count() as u16;

        let needs_buffer = sample_buf
            .as_ref()
            .map_or(true, |b| b.capacity() < decoded.capacity());
        if needs_buffer {
            sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        }

        if let Some(buf) = sample_buf.as_mut() {
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }
    }

    if channels == 0 {
        return Err(AudioError::InvalidData("zero channels".to_string()));
    }
    if sample_rate == 0 {
        return Err(AudioError::InvalidData("zero sample rate".to_string()));
    }

    let frame_count = samples.len() / channels as usize;

    Ok(RawAudio {
        samples,
        sample_rate,
        channels,
        bit_depth,
        frame_count,
    })
}

fn decode<R: std::io::Read>(mut reader: WavReader<R>) -> Result<RawAudio, AudioError> {
    let spec = reader.spec();
    let sample_rate = spec.sample_rate;
    let channels = spec.channels;
    let bit_depth = spec.bits_per_sample;

    if channels == 0 {
        return Err(AudioError::InvalidData("zero channels".to_string()));
    }
    if sample_rate == 0 {
        return Err(AudioError::InvalidData("zero sample rate".to_string()));
    }

    // hound hands back 8-bit PCM already re-centred as signed values
    let samples: Vec<f32> = match (spec.sample_format, bit_depth) {
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|v| v as f32 / 128.0))
            .collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 8388608.0))
            .collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f32 / 2147483648.0))
            .collect::<Result<Vec<_>, _>>()?,
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        _ => {
            return Err(AudioError::UnsupportedFormat(format!(
                "{:?} {}-bit audio",
                spec.sample_format, bit_depth
            )));
        }
    };

    let frame_count = samples.len() / channels as usize;

    Ok(RawAudio {
        samples,
        sample_rate,
        channels,
        bit_depth,
        frame_count,
    })
}
