//! # Duet Domain
//!
//! Shared domain objects for the duet dialogue batch pipeline.
//!
//! Everything here is plain data: the records callers hand in, the
//! validated request items built from them, the per-item outcomes the
//! orchestrator produces and the report written at the end of a batch.
//! Behaviour lives in the `duet` crate.

pub mod outcome;
pub mod report;
pub mod request;
pub mod strategy;
pub mod voice_error;

pub use outcome::{GenerationOutcome, OutcomeResult, RawAudio, TextTrace};
pub use report::{
    ArtifactEntry, ArtifactSlot, BackendMeta, BatchReport, FailureStage, ItemFailure,
    RejectedRecord,
};
pub use request::{
    Conditioning, ConditioningMode, DEFAULT_BASE_PATH, PromptRef, RawRecord, RequestItem,
    SpeakerId,
};
pub use strategy::{ComputeDevice, ExecutionStrategy, Precision, StrategyAttempt};
pub use voice_error::{DuetError, DuetResult};
