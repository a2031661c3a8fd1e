// Pipeline stage tracing
// Append-only JSONL audit trail of each analysis, one line per stage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during trace operations
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Pipeline stage an entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Normalize,
    Extract,
    Classify,
    Decide,
    Summarize,

    /// Model unavailable, placeholder outcome returned
    Fallback,

    /// Analysis aborted with an error
    Failed,
}

impl Stage {
    /// Nominal progress when this stage completes
    pub fn progress(&self) -> f32 {
        match self {
            Stage::Normalize => 0.2,
            Stage::Extract => 0.5,
            Stage::Classify => 0.7,
            Stage::Decide => 0.85,
            Stage::Summarize | Stage::Fallback | Stage::Failed => 1.0,
        }
    }
}

/// A single trace entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub timestamp: DateTime<Utc>,

    /// Correlates all entries of one analysis
    pub analysis_id: Uuid,

    pub stage: Stage,

    /// Progress [0.0, 1.0]
    pub progress: f32,

    pub message: String,

    /// Optional structured data (label, durations, error kind, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl TraceEntry {
    /// Create a new trace entry with current timestamp
    pub fn new(analysis_id: Uuid, stage: Stage, message: impl Into<String>) -> Self {
        TraceEntry {
            timestamp: Utc::now(),
            analysis_id,
            stage,
            progress: stage.progress(),
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured data
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Override the nominal stage progress
    pub fn with_progress(mut self, progress: f32) -> Self {
        self.progress = progress.clamp(0.0, 1.0);
        self
    }

    /// Serialize to JSON line (with newline)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}

/// Manages the append-only JSONL trace file
#[derive(Debug, Clone)]
pub struct TraceWriter {
    file_path: PathBuf,
}

impl TraceWriter {
    pub fn new(file_path: PathBuf) -> Self {
        TraceWriter { file_path }
    }

    /// Append a trace entry, creating the file if needed
    pub fn write(&self, entry: &TraceEntry) -> Result<(), TraceError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;

        let json_line = entry.to_json_line()?;
        file.write_all(json_line.as_bytes())?;
        file.flush()?;

        Ok(())
    }

    /// Append, logging instead of failing
    pub fn record(&self, entry: &TraceEntry) {
        if let Err(e) = self.write(entry) {
            log::warn!(
                "Failed to write trace entry to {}: {}",
                self.file_path.display(),
                e
            );
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

/// Per-analysis helper that stamps entries with one analysis id
/// Does nothing when no trace file is configured
#[derive(Debug, Clone)]
pub struct TraceBuilder {
    analysis_id: Uuid,
    writer: Option<TraceWriter>,
}

impl TraceBuilder {
    pub fn new(analysis_id: Uuid, writer: Option<TraceWriter>) -> Self {
        TraceBuilder { analysis_id, writer }
    }

    pub fn analysis_id(&self) -> Uuid {
        self.analysis_id
    }

    /// Record a completed stage
    pub fn stage(&self, stage: Stage, message: impl Into<String>) {
        self.emit(TraceEntry::new(self.analysis_id, stage, message));
    }

    /// Record a completed stage with structured data
    pub fn stage_with(&self, stage: Stage, message: impl Into<String>, data: serde_json::Value) {
        self.emit(TraceEntry::new(self.analysis_id, stage, message).with_data(data));
    }

    fn emit(&self, entry: TraceEntry) {
        if let Some(writer) = &self.writer {
            writer.record(&entry);
        }
    }
}

/// Read trace entries from a JSONL file
pub fn read_trace_file(path: &Path) -> Result<Vec<TraceEntry>, TraceError> {
    let contents = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let entry: TraceEntry = serde_json::from_str(line)?;
        entries.push(entry);
    }

    Ok(entries)
}
