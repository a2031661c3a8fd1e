// Audio processing module
// Handles audio ingestion and normalization to canonical 16 kHz mono

pub mod ingest;
pub mod normalize;

pub use ingest::{ingest_audio, ingest_wav, read_wav_file, AudioError, RawAudio};
pub use normalize::{
    ConversionTool, NormalizationError, NormalizedAudio, Normalizer, NormalizerConfig,
    CANONICAL_SAMPLE_RATE,
};
