//! Runs a batch of request items through the backend.
//!
//! Every item gets exactly one [`GenerationOutcome`], at its own position,
//! whatever happens to its neighbours. A single item's failure (unreadable
//! prompt audio, a backend error, a panic, a malformed waveform) is recorded
//! and the batch moves on.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use duet_domain::{
    Conditioning, DuetError, DuetResult, GenerationOutcome, PromptRef, RawAudio, RequestItem,
    TextTrace,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::audio::load_prompt_clip;
use crate::backend::{
    BackendHandle, ConditioningPayload, GenerationParams, GenerationRequest, PromptClip,
};
use crate::normalize::{DialogueNormalizer, Normalizer, final_text};

/// Batch driver bound to one backend handle.
pub struct BatchOrchestrator<'a> {
    handle: &'a BackendHandle,
    params: GenerationParams,
    normalizer: Arc<dyn Normalizer>,
    progress: ProgressBar,
}

/// Run `items` with the default normalizer and no progress output.
pub fn run_batch(
    items: &[RequestItem],
    handle: &BackendHandle,
    params: &GenerationParams,
) -> Vec<GenerationOutcome> {
    BatchOrchestrator::new(handle).params(params.clone()).run(items)
}

/// Terminal progress bar in the style used by the CLI.
pub fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} items ({eta})",
    )
    .map(|style| style.progress_chars("█▉▊▋▌▍▎▏ "))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(handle: &'a BackendHandle) -> Self {
        Self {
            handle,
            params: GenerationParams::default(),
            normalizer: Arc::new(DialogueNormalizer),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn normalizer(mut self, normalizer: impl Normalizer + 'static) -> Self {
        self.normalizer = Arc::new(normalizer);
        self
    }

    pub fn progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// One outcome per item, same order, same length.
    pub fn run(&self, items: &[RequestItem]) -> Vec<GenerationOutcome> {
        self.progress.set_length(items.len() as u64);
        info!(
            items = items.len(),
            strategy = %self.handle.strategy(),
            device = %self.handle.device(),
            "starting batch"
        );

        let traces: Vec<TextTrace> = items.iter().map(|item| self.trace(item)).collect();

        // Items whose prompt audio could not be loaded fail here; the rest
        // go to the backend.
        let mut results: Vec<Option<Result<RawAudio, String>>> = vec![None; items.len()];
        let mut ready = Vec::with_capacity(items.len());
        for (index, (item, trace)) in items.iter().zip(&traces).enumerate() {
            match load_payload(item.conditioning()) {
                Ok(conditioning) => ready.push(GenerationRequest {
                    index,
                    text: trace.final_text.clone(),
                    conditioning,
                }),
                Err(reason) => {
                    warn!(index, %reason, "prompt audio unavailable");
                    results[index] = Some(Err(reason));
                    self.progress.inc(1);
                }
            }
        }

        for (index, result) in self.generate(&ready) {
            results[index] = Some(result);
        }

        let outcomes: Vec<GenerationOutcome> = results
            .into_iter()
            .zip(traces)
            .enumerate()
            .map(|(index, (result, trace))| {
                match result.unwrap_or_else(|| Err("item was never dispatched".to_string())) {
                    Ok(audio) => GenerationOutcome::audio(index, trace, audio),
                    Err(reason) => GenerationOutcome::failure(index, trace, reason),
                }
            })
            .collect();

        self.progress.finish();
        let succeeded = outcomes.iter().filter(|o| o.is_audio()).count();
        info!(
            total = outcomes.len(),
            succeeded,
            failed = outcomes.len() - succeeded,
            "batch finished"
        );
        outcomes
    }

    fn trace(&self, item: &RequestItem) -> TextTrace {
        let original_text = format!("{}{}", item.conditioning().prompt_script(), item.text());
        let normalized_text = if item.normalize() {
            self.normalizer.normalize(&original_text)
        } else {
            original_text.clone()
        };
        let final_text = final_text(&normalized_text);
        TextTrace {
            original_text,
            normalized_text,
            final_text,
            use_normalize: item.normalize(),
        }
    }

    /// Batched call when it is worth trying, item by item otherwise.
    fn generate(&self, ready: &[GenerationRequest]) -> Vec<(usize, Result<RawAudio, String>)> {
        if ready.len() > 1 {
            match self.try_batch(ready) {
                Ok(results) => {
                    return ready
                        .iter()
                        .zip(results)
                        .map(|(request, result)| {
                            self.progress.inc(1);
                            (request.index, checked(request.index, result))
                        })
                        .collect();
                }
                Err(DuetError::Unsupported(_)) => {
                    debug!("backend cannot batch, generating item by item");
                }
                Err(e) => {
                    warn!(error = %e, "batched generation failed, retrying item by item");
                }
            }
        }

        ready
            .iter()
            .map(|request| {
                let result = guarded(|| self.handle.backend().generate(request, &self.params));
                self.progress.inc(1);
                (request.index, checked(request.index, result))
            })
            .collect()
    }

    fn try_batch(&self, ready: &[GenerationRequest]) -> DuetResult<Vec<DuetResult<RawAudio>>> {
        let results = guarded(|| self.handle.backend().generate_batch(ready, &self.params))?;
        if results.len() != ready.len() {
            return Err(DuetError::Generation(format!(
                "backend returned {} results for {} requests",
                results.len(),
                ready.len()
            )));
        }
        Ok(results)
    }
}

fn load_payload(conditioning: &Conditioning) -> Result<ConditioningPayload, String> {
    Ok(match conditioning {
        Conditioning::None => ConditioningPayload::None,
        Conditioning::Single(prompt) => ConditioningPayload::Single(load_clip(prompt)?),
        Conditioning::Role { speaker1, speaker2 } => ConditioningPayload::Role {
            speaker1: load_clip(speaker1)?,
            speaker2: load_clip(speaker2)?,
        },
    })
}

fn load_clip(prompt: &PromptRef) -> Result<PromptClip, String> {
    let audio = load_prompt_clip(&prompt.audio).map_err(|e| format!("{e:#}"))?;
    Ok(PromptClip {
        source: prompt.audio.clone(),
        text: prompt.text.clone(),
        audio,
    })
}

/// Run a backend call, turning a panic into a generation error.
fn guarded<T>(call: impl FnOnce() -> DuetResult<T>) -> DuetResult<T> {
    catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|payload| Err(DuetError::Generation(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("backend panicked: {detail}")
}

fn checked(index: usize, result: DuetResult<RawAudio>) -> Result<RawAudio, String> {
    let audio = result.map_err(|e| {
        warn!(index, error = %e, "generation failed");
        e.to_string()
    })?;
    audio.validate().map_err(|reason| {
        warn!(index, %reason, "backend returned unusable audio");
        format!("malformed audio: {reason}")
    })?;
    Ok(audio)
}
