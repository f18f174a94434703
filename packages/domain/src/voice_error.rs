//! Unified error for the whole pipeline.
use thiserror::Error;

use crate::strategy::StrategyAttempt;

/// Convenience alias used across the workspace.
pub type DuetResult<T> = Result<T, DuetError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DuetError {
    /// A raw record is structurally ambiguous.
    #[error("validation: {0}")]
    Validation(String),
    /// Every execution strategy failed to construct a backend.
    #[error("backend unavailable: {}", render_attempts(.attempts))]
    BackendUnavailable { attempts: Vec<StrategyAttempt> },
    /// The backend raised or returned unusable output for one item.
    #[error("generation: {0}")]
    Generation(String),
    /// Writing an artifact failed.
    #[error("persistence: {0}")]
    Persistence(String),
    #[error("configuration: {0}")]
    Configuration(String),
    #[error("record stream: {0}")]
    RecordStream(String),
    #[error("report: {0}")]
    Report(String),
    /// The backend does not offer the requested capability.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl DuetError {
    /// Stable machine-readable code for logs.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "DUET-VALIDATION",
            Self::BackendUnavailable { .. } => "DUET-BACKEND-UNAVAILABLE",
            Self::Generation(_) => "DUET-GENERATION",
            Self::Persistence(_) => "DUET-PERSISTENCE",
            Self::Configuration(_) => "DUET-CONFIG",
            Self::RecordStream(_) => "DUET-RECORDS",
            Self::Report(_) => "DUET-REPORT",
            Self::Unsupported(_) => "DUET-UNSUPPORTED",
        }
    }

    /// Only a missing backend ends a run.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

fn render_attempts(attempts: &[StrategyAttempt]) -> String {
    if attempts.is_empty() {
        return "no execution strategy was configured".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{} ({})", a.strategy, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}
