//! Batch report and the artifact bookkeeping behind it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::strategy::{ComputeDevice, ExecutionStrategy, Precision};

/// What persisting one outcome produced. One slot per batch position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ArtifactSlot {
    Written(PathBuf),
    /// The outcome was a failure; nothing to write.
    NoAudio,
    /// The audio existed but could not be written.
    Failed(String),
}

impl ArtifactSlot {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Written(path) => Some(path),
            Self::NoAudio | Self::Failed(_) => None,
        }
    }
}

/// Backend facts recorded alongside the counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendMeta {
    pub model_ref: String,
    pub strategy: ExecutionStrategy,
    pub device: ComputeDevice,
    pub precision: Precision,
    pub use_normalize: bool,
}

/// One successful item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub index: usize,
    /// `None` when writing the file failed.
    pub file: Option<PathBuf>,
    pub duration_secs: f64,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Generation,
    Persistence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub index: usize,
    pub stage: FailureStage,
    pub reason: String,
}

/// A record the request builder refused; it never reached the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    /// Zero-based position in the record stream.
    pub record: usize,
    pub reason: String,
}

/// Aggregate written once per batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub backend: BackendMeta,
    pub results: Vec<ArtifactEntry>,
    pub failures: Vec<ItemFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedRecord>,
}

impl BatchReport {
    pub fn with_rejected(mut self, rejected: Vec<RejectedRecord>) -> Self {
        self.rejected = rejected;
        self
    }

    /// Number of files actually on disk.
    pub fn written(&self) -> usize {
        self.results.iter().filter(|r| r.file.is_some()).count()
    }
}
