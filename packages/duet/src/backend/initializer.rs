//! Lazily constructed, process-wide backend with ordered strategy fallback.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use duet_domain::{DuetError, DuetResult, ExecutionStrategy, StrategyAttempt};
use tracing::{info, warn};

use super::{BackendFactory, BackendHandle, ModelRefs};
use crate::device::DeviceProbe;

/// Owns the single cached [`BackendHandle`].
///
/// The cache guard is held for the whole construction, so concurrent
/// callers wait for the first construction instead of racing it.
pub struct BackendInitializer {
    spec: ModelRefs,
    strategies: Vec<ExecutionStrategy>,
    factory: Arc<dyn BackendFactory>,
    probe: Arc<dyn DeviceProbe>,
    slot: Mutex<Option<Arc<BackendHandle>>>,
    constructions: AtomicUsize,
}

impl BackendInitializer {
    pub fn new(
        spec: ModelRefs,
        strategies: Vec<ExecutionStrategy>,
        factory: Arc<dyn BackendFactory>,
        probe: Arc<dyn DeviceProbe>,
    ) -> Self {
        Self {
            spec,
            strategies,
            factory,
            probe,
            slot: Mutex::new(None),
            constructions: AtomicUsize::new(0),
        }
    }

    pub fn model_refs(&self) -> &ModelRefs {
        &self.spec
    }

    pub fn strategies(&self) -> &[ExecutionStrategy] {
        &self.strategies
    }

    /// Return the cached backend, building it on first use.
    pub fn get_backend(&self) -> DuetResult<Arc<BackendHandle>> {
        let mut slot = self.lock();
        if let Some(handle) = slot.as_ref() {
            return Ok(Arc::clone(handle));
        }

        let device = self.probe.probe();
        let precision = self.spec.precision.effective_for(device);
        if precision != self.spec.precision {
            info!(
                requested = %self.spec.precision,
                effective = %precision,
                device = %device,
                "precision adjusted for device"
            );
        }
        let spec = ModelRefs {
            precision,
            ..self.spec.clone()
        };

        let mut attempts = Vec::new();
        for &strategy in &self.strategies {
            if !strategy.supports(device) {
                warn!(%strategy, %device, "strategy not available on this device, skipping");
                attempts.push(StrategyAttempt {
                    strategy,
                    error: format!("requires CUDA, running on {device}"),
                });
                continue;
            }

            info!(%strategy, %device, %precision, model = %spec.model_ref, "loading backend");
            match self.factory.initialize(&spec, strategy, device) {
                Ok(backend) => {
                    let handle = Arc::new(BackendHandle::new(
                        backend,
                        spec.model_ref.clone(),
                        strategy,
                        device,
                        precision,
                        attempts,
                    ));
                    self.constructions.fetch_add(1, Ordering::SeqCst);
                    info!(%strategy, id = handle.id(), "backend ready");
                    *slot = Some(Arc::clone(&handle));
                    return Ok(handle);
                }
                Err(e) => {
                    warn!(%strategy, error = %e, "backend construction failed, trying next strategy");
                    attempts.push(StrategyAttempt {
                        strategy,
                        error: e.to_string(),
                    });
                }
            }
        }

        Err(DuetError::BackendUnavailable { attempts })
    }

    /// Drop the cached backend and free its resources. Returns whether a
    /// backend was actually held.
    pub fn release(&self) -> bool {
        let taken = self.lock().take();
        match taken {
            Some(handle) => {
                handle.backend().release();
                info!(id = handle.id(), "backend released");
                true
            }
            None => false,
        }
    }

    /// Number of successful constructions so far.
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<BackendHandle>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GenerationParams, GenerationRequest, SpeechBackend};
    use crate::device::FixedDevice;
    use duet_domain::{ComputeDevice, Precision, RawAudio};
    use std::sync::atomic::AtomicBool;

    struct Silent {
        released: Arc<AtomicBool>,
    }

    impl SpeechBackend for Silent {
        fn generate(&self, _: &GenerationRequest, _: &GenerationParams) -> DuetResult<RawAudio> {
            Ok(RawAudio::mono(vec![0.0; 8], 24_000))
        }

        fn release(&self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    fn model_refs() -> ModelRefs {
        ModelRefs {
            model_ref: "m".into(),
            tokenizer_config: "t".into(),
            checkpoint_ref: "c".into(),
            precision: Precision::Bf16,
        }
    }

    #[test]
    fn flash_is_skipped_off_cuda_and_recorded() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&released);
        let factory = move |_: &ModelRefs,
                            _: ExecutionStrategy,
                            _: ComputeDevice|
              -> DuetResult<Arc<dyn SpeechBackend>> {
            Ok(Arc::new(Silent {
                released: Arc::clone(&flag),
            }))
        };
        let init = BackendInitializer::new(
            model_refs(),
            ExecutionStrategy::FALLBACK_ORDER.to_vec(),
            Arc::new(factory),
            Arc::new(FixedDevice(ComputeDevice::Cpu)),
        );

        let handle = init.get_backend().unwrap();
        assert_eq!(handle.strategy(), ExecutionStrategy::Sdpa);
        assert_eq!(handle.precision(), Precision::Fp32);
        assert_eq!(handle.attempts().len(), 1);
        assert_eq!(handle.attempts()[0].strategy, ExecutionStrategy::FlashAttention2);

        assert!(init.release());
        assert!(released.load(Ordering::SeqCst));
        assert!(!init.release());
    }

    #[test]
    fn second_strategy_wins_after_first_fails() {
        let factory = |_: &ModelRefs,
                       strategy: ExecutionStrategy,
                       _: ComputeDevice|
         -> DuetResult<Arc<dyn SpeechBackend>> {
            if strategy == ExecutionStrategy::FlashAttention2 {
                Err(DuetError::Generation("kernel missing".into()))
            } else {
                Ok(Arc::new(Silent {
                    released: Arc::new(AtomicBool::new(false)),
                }))
            }
        };
        let init = BackendInitializer::new(
            model_refs(),
            ExecutionStrategy::FALLBACK_ORDER.to_vec(),
            Arc::new(factory),
            Arc::new(FixedDevice(ComputeDevice::Cuda)),
        );

        let handle = init.get_backend().unwrap();
        assert_eq!(handle.strategy(), ExecutionStrategy::Sdpa);
        assert_eq!(handle.precision(), Precision::Bf16);
        assert!(handle.attempts()[0].error.contains("kernel missing"));
    }

    #[test]
    fn empty_strategy_list_is_unavailable() {
        let factory = |_: &ModelRefs,
                       _: ExecutionStrategy,
                       _: ComputeDevice|
         -> DuetResult<Arc<dyn SpeechBackend>> {
            Err(DuetError::Generation("unused".into()))
        };
        let init = BackendInitializer::new(
            model_refs(),
            Vec::new(),
            Arc::new(factory),
            Arc::new(FixedDevice(ComputeDevice::Cpu)),
        );
        match init.get_backend() {
            Err(DuetError::BackendUnavailable { attempts }) => assert!(attempts.is_empty()),
            other => panic!("expected BackendUnavailable, got {other:?}"),
        }
        assert_eq!(init.constructions(), 0);
    }
}
