//! Layered run configuration: JSON file, then CLI overrides, then validation.

use duet_domain::{DuetError, DuetResult, ExecutionStrategy, Precision};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::ModelRefs;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a speech synthesizer that generates natural, realistic, and human-like conversational audio from dialogue text.";

// ------------ Backend --------------
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Generative model reference (hub id or local directory).
    pub model_ref: String,
    /// Audio tokenizer configuration file.
    pub tokenizer_config: String,
    /// Audio tokenizer checkpoint.
    pub checkpoint_ref: String,
    pub precision: Precision,
    /// Candidate strategies, tried in this order.
    pub strategies: Vec<ExecutionStrategy>,
    /// Skip accelerator probing.
    #[serde(default)]
    pub force_cpu: bool,
    pub worker: WorkerConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            model_ref: "models/dialogue-tts".to_string(),
            tokenizer_config: "audio_tokenizer/config.yaml".to_string(),
            checkpoint_ref: "audio_tokenizer/weights.ckpt".to_string(),
            precision: Precision::Bf16,
            strategies: ExecutionStrategy::FALLBACK_ORDER.to_vec(),
            force_cpu: false,
            worker: WorkerConfig::default(),
        }
    }
}

impl BackendConfig {
    pub fn model_refs(&self) -> ModelRefs {
        ModelRefs {
            model_ref: self.model_ref.clone(),
            tokenizer_config: self.tokenizer_config.clone(),
            checkpoint_ref: self.checkpoint_ref.clone(),
            precision: self.precision,
        }
    }
}

// ------------ Worker process -------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub program: String,
    /// Arguments placed before the `probe` / `generate` sub-command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Per-invocation limit; `None` waits indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Parent of per-backend scratch directories; the user cache dir when unset.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "duet-worker".to_string(),
            args: Vec::new(),
            timeout_secs: None,
            scratch_dir: None,
        }
    }
}

// ------------ Generation -----------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub system_prompt: String,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Used when a record does not say.
    pub use_normalize: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            seed: None,
            use_normalize: true,
        }
    }
}

// ------------ Output ---------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub output_dir: PathBuf,
    /// Artifacts are named `<prefix>_<index>.wav`.
    pub file_prefix: String,
    /// Report file name, relative to `output_dir` unless absolute.
    pub report_file: PathBuf,
    /// Optional JSONL trace of the texts used per item.
    #[serde(default)]
    pub summary_file: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("outputs"),
            file_prefix: "output".to_string(),
            report_file: PathBuf::from("results.json"),
            summary_file: None,
        }
    }
}

impl OutputConfig {
    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(&self.report_file)
    }
}

// ------------ DuetConfig (root) ----
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuetConfig {
    pub version: String,
    pub backend: BackendConfig,
    pub generation: GenerationConfig,
    pub output: OutputConfig,
}

impl Default for DuetConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            backend: BackendConfig::default(),
            generation: GenerationConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl DuetConfig {
    /// Load a JSON config from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> DuetResult<Self> {
        let path = path.as_ref();
        let txt = fs::read_to_string(path).map_err(|e| {
            DuetError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut cfg: DuetConfig = serde_json::from_str(&txt).map_err(|e| {
            DuetError::Configuration(format!("cannot parse {}: {e}", path.display()))
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Save to disk (pretty‑printed).
    pub fn save<P: AsRef<Path>>(&self, path: P) -> DuetResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent)
                .map_err(|e| DuetError::Configuration(format!("create {}: {e}", parent.display())))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| DuetError::Configuration(e.to_string()))?;
        fs::write(path, json)
            .map_err(|e| DuetError::Configuration(format!("write {}: {e}", path.display())))
    }

    /// Check invariants and drop duplicate strategies (first occurrence wins).
    pub fn validate(&mut self) -> DuetResult<()> {
        let mut seen = Vec::with_capacity(self.backend.strategies.len());
        for strategy in self.backend.strategies.drain(..) {
            if !seen.contains(&strategy) {
                seen.push(strategy);
            }
        }
        self.backend.strategies = seen;

        if self.backend.strategies.is_empty() {
            return Err(DuetError::Configuration(
                "at least one execution strategy is required".to_string(),
            ));
        }
        if self.backend.model_ref.trim().is_empty() {
            return Err(DuetError::Configuration("model_ref is empty".to_string()));
        }
        if self.backend.worker.program.trim().is_empty() {
            return Err(DuetError::Configuration(
                "worker program is empty".to_string(),
            ));
        }
        if self.backend.worker.timeout_secs == Some(0) {
            return Err(DuetError::Configuration(
                "worker timeout must be positive".to_string(),
            ));
        }
        let prefix = self.output.file_prefix.trim();
        if prefix.is_empty() || prefix.contains(['/', '\\']) {
            return Err(DuetError::Configuration(format!(
                "invalid artifact prefix `{}`",
                self.output.file_prefix
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_keeps_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("duet.json");

        let mut cfg = DuetConfig::default();
        cfg.backend.strategies = vec![ExecutionStrategy::Eager];
        cfg.generation.seed = Some(42);
        cfg.save(&path).unwrap();

        let loaded = DuetConfig::load(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn validate_dedupes_strategies_in_order() {
        let mut cfg = DuetConfig::default();
        cfg.backend.strategies = vec![
            ExecutionStrategy::Sdpa,
            ExecutionStrategy::Eager,
            ExecutionStrategy::Sdpa,
        ];
        cfg.validate().unwrap();
        assert_eq!(
            cfg.backend.strategies,
            vec![ExecutionStrategy::Sdpa, ExecutionStrategy::Eager]
        );
    }

    #[test]
    fn validate_rejects_empty_strategy_list_and_bad_prefix() {
        let mut cfg = DuetConfig::default();
        cfg.backend.strategies.clear();
        assert!(matches!(cfg.validate(), Err(DuetError::Configuration(_))));

        let mut cfg = DuetConfig::default();
        cfg.output.file_prefix = "../escape".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unparsable_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            DuetConfig::load(&path),
            Err(DuetError::Configuration(_))
        ));
    }
}
