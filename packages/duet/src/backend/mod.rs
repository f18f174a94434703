//! Generation backend seams.
//!
//! The generative model and its tokenizers are opaque to the pipeline: a
//! [`BackendFactory`] builds a [`SpeechBackend`] for one execution strategy
//! on one device, and the [`BackendInitializer`] decides which strategy
//! wins and caches the result.

pub mod command;
pub mod initializer;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use duet_domain::{
    ComputeDevice, DuetError, DuetResult, ExecutionStrategy, Precision, RawAudio, SpeakerId,
    StrategyAttempt,
};

pub use command::{CommandBackend, CommandFactory};
pub use initializer::BackendInitializer;

/// Everything needed to construct a backend, independent of strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRefs {
    pub model_ref: String,
    pub tokenizer_config: String,
    pub checkpoint_ref: String,
    pub precision: Precision,
}

/// Loaded reference audio plus transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptClip {
    pub source: PathBuf,
    pub text: String,
    /// Mono waveform.
    pub audio: RawAudio,
}

/// Audio conditioning handed to the backend with one request.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditioningPayload {
    None,
    Single(PromptClip),
    Role {
        speaker1: PromptClip,
        speaker2: PromptClip,
    },
}

impl ConditioningPayload {
    /// Clips in speaker order; single-voice clips carry no speaker.
    pub fn clips(&self) -> Vec<(Option<SpeakerId>, &PromptClip)> {
        match self {
            Self::None => Vec::new(),
            Self::Single(clip) => vec![(None, clip)],
            Self::Role { speaker1, speaker2 } => vec![
                (Some(SpeakerId::One), speaker1),
                (Some(SpeakerId::Two), speaker2),
            ],
        }
    }
}

/// One item as the backend sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Position in the batch.
    pub index: usize,
    pub text: String,
    pub conditioning: ConditioningPayload,
}

/// Batch-wide generation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationParams {
    pub system_prompt: String,
    pub seed: Option<u64>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            system_prompt: crate::config::DEFAULT_SYSTEM_PROMPT.to_string(),
            seed: None,
        }
    }
}

/// A constructed, ready-to-use generation backend.
pub trait SpeechBackend: Send + Sync {
    /// Generate audio for a single item.
    fn generate(
        &self,
        request: &GenerationRequest,
        params: &GenerationParams,
    ) -> DuetResult<RawAudio>;

    /// Generate a whole batch in one call, one result per request in
    /// request order. Backends that cannot batch keep the default.
    fn generate_batch(
        &self,
        requests: &[GenerationRequest],
        params: &GenerationParams,
    ) -> DuetResult<Vec<DuetResult<RawAudio>>> {
        let _ = (requests, params);
        Err(DuetError::Unsupported("batched generation".to_string()))
    }

    /// Free accelerator memory and scratch state. Must be idempotent.
    fn release(&self) {}
}

/// Builds a backend for one strategy on one device.
pub trait BackendFactory: Send + Sync {
    fn initialize(
        &self,
        spec: &ModelRefs,
        strategy: ExecutionStrategy,
        device: ComputeDevice,
    ) -> DuetResult<Arc<dyn SpeechBackend>>;
}

impl<F> BackendFactory for F
where
    F: Fn(&ModelRefs, ExecutionStrategy, ComputeDevice) -> DuetResult<Arc<dyn SpeechBackend>>
        + Send
        + Sync,
{
    fn initialize(
        &self,
        spec: &ModelRefs,
        strategy: ExecutionStrategy,
        device: ComputeDevice,
    ) -> DuetResult<Arc<dyn SpeechBackend>> {
        self(spec, strategy, device)
    }
}

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// The loaded backend plus the facts of how it was loaded. Never mutated
/// after construction.
pub struct BackendHandle {
    id: u64,
    backend: Arc<dyn SpeechBackend>,
    model_ref: String,
    strategy: ExecutionStrategy,
    device: ComputeDevice,
    precision: Precision,
    attempts: Vec<StrategyAttempt>,
}

impl BackendHandle {
    pub fn new(
        backend: Arc<dyn SpeechBackend>,
        model_ref: impl Into<String>,
        strategy: ExecutionStrategy,
        device: ComputeDevice,
        precision: Precision,
        attempts: Vec<StrategyAttempt>,
    ) -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            backend,
            model_ref: model_ref.into(),
            strategy,
            device,
            precision,
            attempts,
        }
    }

    /// Unique per construction within the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn backend(&self) -> &dyn SpeechBackend {
        self.backend.as_ref()
    }

    pub fn model_ref(&self) -> &str {
        &self.model_ref
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    pub fn device(&self) -> ComputeDevice {
        self.device
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Strategies that were tried and rejected before this one.
    pub fn attempts(&self) -> &[StrategyAttempt] {
        &self.attempts
    }

    pub fn meta(&self, use_normalize: bool) -> duet_domain::BackendMeta {
        duet_domain::BackendMeta {
            model_ref: self.model_ref.clone(),
            strategy: self.strategy,
            device: self.device,
            precision: self.precision,
            use_normalize,
        }
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendHandle")
            .field("id", &self.id)
            .field("model_ref", &self.model_ref)
            .field("strategy", &self.strategy)
            .field("device", &self.device)
            .field("precision", &self.precision)
            .field("attempts", &self.attempts.len())
            .finish()
    }
}
