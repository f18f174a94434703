//! Batched two-speaker dialogue synthesis.
//!
//! Records come in, get validated into request items, run through a lazily
//! initialized generation backend and come out as WAV files plus a report.
//! The seams callers are expected to use are `build_request`,
//! `BackendInitializer::get_backend`, `run_batch` and `summarize`.

pub mod audio;
pub mod backend;
pub mod builder;
pub mod config;
pub mod device;
pub mod normalize;
pub mod orchestrator;
pub mod records;
pub mod report;
pub mod setup;

pub use backend::{
    BackendFactory, BackendHandle, BackendInitializer, CommandBackend, CommandFactory,
    ConditioningPayload, GenerationParams, GenerationRequest, ModelRefs, PromptClip,
    SpeechBackend,
};
pub use builder::{RequestBuilder, build_request};
pub use config::DuetConfig;
pub use device::{CandleDeviceProbe, DeviceProbe, FixedDevice};
pub use normalize::{DialogueNormalizer, Normalizer, final_text, normalize_text};
pub use orchestrator::{BatchOrchestrator, progress_bar, run_batch};
pub use records::{Batch, build_batch, load_records, sample_records};
pub use report::{persist, summarize, write_report, write_text_summary};

pub use duet_domain as domain;
