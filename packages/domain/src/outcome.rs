//! Per-item generation results.

use serde::{Deserialize, Serialize};

/// Decoded waveform returned by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAudio {
    /// Interleaved samples in `-1.0..=1.0`.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl RawAudio {
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }

    /// Average the channels into one.
    pub fn into_mono(self) -> Self {
        if self.channels <= 1 {
            return self;
        }
        let channels = self.channels as usize;
        let samples = self
            .samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();
        Self::mono(samples, self.sample_rate)
    }

    /// Reject waveforms no consumer could use.
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample rate is zero".to_string());
        }
        if self.channels == 0 {
            return Err("channel count is zero".to_string());
        }
        if self.samples.is_empty() {
            return Err("waveform is empty".to_string());
        }
        if self.samples.len() % self.channels as usize != 0 {
            return Err(format!(
                "{} samples do not divide into {} channels",
                self.samples.len(),
                self.channels
            ));
        }
        if let Some(pos) = self.samples.iter().position(|s| !s.is_finite()) {
            return Err(format!("non-finite sample at offset {pos}"));
        }
        Ok(())
    }
}

/// The text actually used for one item, kept for auditing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextTrace {
    /// Prompt transcript followed by the script, before normalization.
    pub original_text: String,
    /// Equal to `original_text` when normalization is off.
    pub normalized_text: String,
    /// Exact string handed to the backend.
    pub final_text: String,
    pub use_normalize: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeResult {
    Audio(RawAudio),
    Failure { reason: String },
}

/// Result for the item at `index` of the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutcome {
    pub index: usize,
    pub text: TextTrace,
    pub result: OutcomeResult,
}

impl GenerationOutcome {
    pub fn audio(index: usize, text: TextTrace, audio: RawAudio) -> Self {
        Self {
            index,
            text,
            result: OutcomeResult::Audio(audio),
        }
    }

    pub fn failure(index: usize, text: TextTrace, reason: impl Into<String>) -> Self {
        Self {
            index,
            text,
            result: OutcomeResult::Failure {
                reason: reason.into(),
            },
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.result, OutcomeResult::Audio(_))
    }

    pub fn audio_ref(&self) -> Option<&RawAudio> {
        match &self.result {
            OutcomeResult::Audio(audio) => Some(audio),
            OutcomeResult::Failure { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.result {
            OutcomeResult::Failure { reason } => Some(reason),
            OutcomeResult::Audio(_) => None,
        }
    }
}
