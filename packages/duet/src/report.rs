//! Artifact persistence and the batch summary.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use duet_domain::{
    ArtifactEntry, ArtifactSlot, BackendMeta, BatchReport, DuetError, DuetResult, FailureStage,
    GenerationOutcome, ItemFailure, OutcomeResult, RequestItem,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::audio::write_wav;

/// `<prefix>_<index>.wav` inside `output_dir`.
pub fn artifact_path(output_dir: &Path, prefix: &str, index: usize) -> PathBuf {
    output_dir.join(format!("{prefix}_{index}.wav"))
}

/// Write every audio outcome to disk. The returned slots line up with
/// `outcomes`; failures leave [`ArtifactSlot::NoAudio`] in place.
pub fn persist(outcomes: &[GenerationOutcome], output_dir: &Path, prefix: &str) -> Vec<ArtifactSlot> {
    let dir_error = fs::create_dir_all(output_dir)
        .err()
        .map(|e| format!("create {}: {e}", output_dir.display()));

    outcomes
        .iter()
        .map(|outcome| {
            let Some(audio) = outcome.audio_ref() else {
                info!(index = outcome.index, "skipping item due to generation error");
                return ArtifactSlot::NoAudio;
            };
            if let Some(reason) = &dir_error {
                warn!(index = outcome.index, %reason, "cannot persist audio");
                return ArtifactSlot::Failed(reason.clone());
            }
            let path = artifact_path(output_dir, prefix, outcome.index);
            match write_wav(&path, audio) {
                Ok(()) => {
                    info!(index = outcome.index, path = %path.display(), "saved audio");
                    ArtifactSlot::Written(path)
                }
                Err(e) => {
                    let reason = format!("{e:#}");
                    warn!(index = outcome.index, %reason, "failed to save audio");
                    ArtifactSlot::Failed(reason)
                }
            }
        })
        .collect()
}

/// Aggregate one batch. `items`, `outcomes` and `artifacts` must be
/// positionally aligned.
pub fn summarize(
    items: &[RequestItem],
    outcomes: &[GenerationOutcome],
    artifacts: &[ArtifactSlot],
    backend: BackendMeta,
) -> DuetResult<BatchReport> {
    if outcomes.len() != items.len() || artifacts.len() != items.len() {
        return Err(DuetError::Report(format!(
            "{} items, {} outcomes and {} artifact slots do not line up",
            items.len(),
            outcomes.len(),
            artifacts.len()
        )));
    }
    if let Some((position, outcome)) = outcomes
        .iter()
        .enumerate()
        .find(|(position, outcome)| outcome.index != *position)
    {
        return Err(DuetError::Report(format!(
            "outcome at position {position} claims index {}",
            outcome.index
        )));
    }

    let mut results = Vec::new();
    let mut failures = Vec::new();
    for (outcome, slot) in outcomes.iter().zip(artifacts) {
        match &outcome.result {
            OutcomeResult::Audio(audio) => {
                results.push(ArtifactEntry {
                    index: outcome.index,
                    file: slot.path().map(Path::to_path_buf),
                    duration_secs: audio.duration_secs(),
                    sample_rate: audio.sample_rate,
                });
                if let ArtifactSlot::Failed(reason) = slot {
                    failures.push(ItemFailure {
                        index: outcome.index,
                        stage: FailureStage::Persistence,
                        reason: reason.clone(),
                    });
                }
            }
            OutcomeResult::Failure { reason } => failures.push(ItemFailure {
                index: outcome.index,
                stage: FailureStage::Generation,
                reason: reason.clone(),
            }),
        }
    }

    let total = items.len();
    let succeeded = results.len();
    Ok(BatchReport {
        total,
        succeeded,
        failed: total - succeeded,
        backend,
        results,
        failures,
        rejected: Vec::new(),
    })
}

/// Pretty JSON, parent directories created as needed.
pub fn write_report(report: &BatchReport, path: &Path) -> DuetResult<()> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| DuetError::Report(format!("encode report: {e}")))?;
    fs::write(path, json)
        .map_err(|e| DuetError::Report(format!("write {}: {e}", path.display())))?;
    info!(path = %path.display(), "report written");
    Ok(())
}

#[derive(Serialize)]
struct SummaryLine<'a> {
    index: usize,
    text: &'a str,
    normalized_text: &'a str,
    final_text: &'a str,
}

/// One JSON line per item with the texts actually used.
pub fn write_text_summary(outcomes: &[GenerationOutcome], path: &Path) -> DuetResult<()> {
    ensure_parent(path)?;
    let file = fs::File::create(path)
        .map_err(|e| DuetError::Report(format!("create {}: {e}", path.display())))?;
    let mut out = BufWriter::new(file);
    for outcome in outcomes {
        let line = SummaryLine {
            index: outcome.index,
            text: &outcome.text.original_text,
            normalized_text: &outcome.text.normalized_text,
            final_text: &outcome.text.final_text,
        };
        serde_json::to_writer(&mut out, &line)
            .map_err(|e| DuetError::Report(format!("encode summary line: {e}")))?;
        out.write_all(b"\n")
            .map_err(|e| DuetError::Report(format!("write {}: {e}", path.display())))?;
    }
    out.flush()
        .map_err(|e| DuetError::Report(format!("write {}: {e}", path.display())))?;
    info!(path = %path.display(), "saved summary");
    Ok(())
}

fn ensure_parent(path: &Path) -> DuetResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .map_err(|e| DuetError::Report(format!("create {}: {e}", parent.display()))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_domain::{
        ComputeDevice, Conditioning, ExecutionStrategy, Precision, RawAudio, TextTrace,
    };

    fn trace(text: &str) -> TextTrace {
        TextTrace {
            original_text: text.to_string(),
            normalized_text: text.to_string(),
            final_text: format!("<speaker1>{text}"),
            use_normalize: false,
        }
    }

    fn meta() -> BackendMeta {
        BackendMeta {
            model_ref: "m".into(),
            strategy: ExecutionStrategy::Sdpa,
            device: ComputeDevice::Cpu,
            precision: Precision::Fp32,
            use_normalize: true,
        }
    }

    fn items(n: usize) -> Vec<RequestItem> {
        (0..n)
            .map(|i| RequestItem::new(format!("line {i}"), Conditioning::None, false))
            .collect()
    }

    #[test]
    fn persist_leaves_placeholder_for_failures() {
        let dir = tempfile::tempdir().unwrap();
        let outcomes = vec![
            GenerationOutcome::failure(0, trace("a"), "oom"),
            GenerationOutcome::audio(1, trace("b"), RawAudio::mono(vec![0.1; 240], 24_000)),
        ];
        let slots = persist(&outcomes, dir.path(), "output");
        assert_eq!(slots[0], ArtifactSlot::NoAudio);
        assert_eq!(slots[1].path(), Some(dir.path().join("output_1.wav").as_path()));
        assert!(dir.path().join("output_1.wav").is_file());
        assert!(!dir.path().join("output_0.wav").exists());
    }

    #[test]
    fn persistence_failure_still_counts_as_generated() {
        let outcomes = vec![GenerationOutcome::audio(
            0,
            trace("a"),
            RawAudio::mono(vec![0.0; 24], 24_000),
        )];
        let slots = vec![ArtifactSlot::Failed("disk full".into())];
        let report = summarize(&items(1), &outcomes, &slots, meta()).unwrap();
        assert_eq!((report.total, report.succeeded, report.failed), (1, 1, 0));
        assert_eq!(report.written(), 0);
        assert_eq!(report.failures[0].stage, FailureStage::Persistence);
    }

    #[test]
    fn misaligned_inputs_are_rejected() {
        let err = summarize(&items(2), &[], &[], meta()).unwrap_err();
        assert!(matches!(err, DuetError::Report(_)));
    }

    #[test]
    fn text_summary_has_one_line_per_item() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("summary.jsonl");
        let outcomes = vec![
            GenerationOutcome::failure(0, trace("你好"), "x"),
            GenerationOutcome::failure(1, trace("b"), "y"),
        ];
        write_text_summary(&outcomes, &path).unwrap();
        let body = fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = body
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["text"], "你好");
        assert_eq!(lines[1]["final_text"], "<speaker1>b");
    }

    #[test]
    fn report_json_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let report = summarize(&items(0), &[], &[], meta()).unwrap();
        write_report(&report, &path).unwrap();
        let back: BatchReport =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, report);
    }
}
