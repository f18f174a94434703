use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use duet::{
    BackendInitializer, ModelRefs, FixedDevice, GenerationParams, GenerationRequest,
    SpeechBackend, build_request, persist, run_batch, summarize,
};
use duet_domain::{
    ArtifactSlot, ComputeDevice, ConditioningMode, DuetError, DuetResult, ExecutionStrategy,
    FailureStage, Precision, RawAudio, RawRecord,
};

/// Fails any item whose script mentions `fail`, otherwise returns a short tone.
struct ScriptedBackend;

impl SpeechBackend for ScriptedBackend {
    fn generate(&self, request: &GenerationRequest, _: &GenerationParams) -> DuetResult<RawAudio> {
        if request.text.contains("fail") {
            return Err(DuetError::Generation("CUDA out of memory".into()));
        }
        Ok(RawAudio::mono(vec![0.25; 2_400], 24_000))
    }
}

fn model_refs() -> ModelRefs {
    ModelRefs {
        model_ref: "models/dialogue-tts".into(),
        tokenizer_config: "tok.yaml".into(),
        checkpoint_ref: "tok.ckpt".into(),
        precision: Precision::Bf16,
    }
}

fn counting_initializer(built: Arc<AtomicUsize>, device: ComputeDevice) -> BackendInitializer {
    let factory = move |_: &ModelRefs,
                        _: ExecutionStrategy,
                        _: ComputeDevice|
          -> DuetResult<Arc<dyn SpeechBackend>> {
        built.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedBackend))
    };
    BackendInitializer::new(
        model_refs(),
        ExecutionStrategy::FALLBACK_ORDER.to_vec(),
        Arc::new(factory),
        Arc::new(FixedDevice(device)),
    )
}

#[test]
fn get_backend_is_idempotent() {
    let built = Arc::new(AtomicUsize::new(0));
    let init = counting_initializer(Arc::clone(&built), ComputeDevice::Cuda);

    let first = init.get_backend().unwrap();
    let second = init.get_backend().unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(first.strategy(), second.strategy());
    assert_eq!(first.strategy(), ExecutionStrategy::FlashAttention2);
    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert_eq!(init.constructions(), 1);
}

#[tokio::test]
async fn concurrent_callers_share_one_construction() {
    let built = Arc::new(AtomicUsize::new(0));
    let init = Arc::new(counting_initializer(Arc::clone(&built), ComputeDevice::Cpu));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let init = Arc::clone(&init);
        tasks.push(tokio::task::spawn_blocking(move || init.get_backend().map(|h| h.id())));
    }
    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap());
    }

    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(built.load(Ordering::SeqCst), 1);
}

#[test]
fn release_then_get_rebuilds() {
    let built = Arc::new(AtomicUsize::new(0));
    let init = counting_initializer(Arc::clone(&built), ComputeDevice::Cpu);

    let first = init.get_backend().unwrap().id();
    assert!(init.release());
    assert!(!init.release());
    let second = init.get_backend().unwrap().id();

    assert_ne!(first, second);
    assert_eq!(init.constructions(), 2);
}

#[test]
fn every_strategy_failing_is_backend_unavailable() {
    let factory = |_: &ModelRefs,
                   strategy: ExecutionStrategy,
                   _: ComputeDevice|
     -> DuetResult<Arc<dyn SpeechBackend>> {
        Err(DuetError::Generation(format!("{strategy} failed to load")))
    };
    let init = BackendInitializer::new(
        model_refs(),
        ExecutionStrategy::FALLBACK_ORDER.to_vec(),
        Arc::new(factory),
        Arc::new(FixedDevice(ComputeDevice::Cuda)),
    );

    let err = init.get_backend().unwrap_err();
    assert!(err.is_fatal());
    match &err {
        DuetError::BackendUnavailable { attempts } => {
            let tried: Vec<_> = attempts.iter().map(|a| a.strategy).collect();
            assert_eq!(tried, ExecutionStrategy::FALLBACK_ORDER.to_vec());
        }
        other => panic!("expected BackendUnavailable, got {other:?}"),
    }
    assert!(err.to_string().contains("eager failed to load"));

    // nothing was cached, so a retry tries again
    assert!(init.get_backend().is_err());
    assert_eq!(init.constructions(), 0);
}

#[test]
fn unprompted_record_produces_one_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let init = counting_initializer(Arc::new(AtomicUsize::new(0)), ComputeDevice::Cpu);
    let handle = init.get_backend().unwrap();

    let item = build_request(&RawRecord::text("[S1]Hi[S2]Hi back")).unwrap();
    assert_eq!(item.conditioning_mode(), ConditioningMode::None);
    let items = vec![item];

    let outcomes = run_batch(&items, &handle, &GenerationParams::default());
    assert_eq!(outcomes.len(), 1);

    let slots = persist(&outcomes, dir.path(), "output");
    let report = summarize(&items, &outcomes, &slots, handle.meta(true)).unwrap();
    assert_eq!(report.total, 1);
    assert_eq!(report.succeeded + report.failed, report.total);
}

#[test]
fn partial_failure_keeps_positions() {
    let dir = tempfile::tempdir().unwrap();
    let init = counting_initializer(Arc::new(AtomicUsize::new(0)), ComputeDevice::Cpu);
    let handle = init.get_backend().unwrap();

    let items = vec![
        build_request(&RawRecord::text("[S1]This one will fail.")).unwrap(),
        build_request(&RawRecord::text("[S1]This one works.")).unwrap(),
    ];
    let outcomes = run_batch(&items, &handle, &GenerationParams::default());
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].failure_reason().unwrap().contains("out of memory"));
    assert!(outcomes[1].is_audio());

    let slots = persist(&outcomes, dir.path(), "output");
    assert_eq!(slots[0], ArtifactSlot::NoAudio);
    assert!(slots[1].path().unwrap().ends_with("output_1.wav"));

    let report = summarize(&items, &outcomes, &slots, handle.meta(true)).unwrap();
    assert_eq!((report.total, report.succeeded, report.failed), (2, 1, 1));
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].index, 1);
    assert!((report.results[0].duration_secs - 0.1).abs() < 1e-9);
    assert_eq!(report.failures[0].index, 0);
    assert_eq!(report.failures[0].stage, FailureStage::Generation);
    assert_eq!(report.backend.strategy, ExecutionStrategy::Sdpa);
    assert_eq!(report.backend.device, ComputeDevice::Cpu);
}

#[test]
fn empty_batch_reports_zero() {
    let init = counting_initializer(Arc::new(AtomicUsize::new(0)), ComputeDevice::Cpu);
    let handle = init.get_backend().unwrap();

    let outcomes = run_batch(&[], &handle, &GenerationParams::default());
    assert!(outcomes.is_empty());

    let report = summarize(&[], &outcomes, &[], handle.meta(false)).unwrap();
    assert_eq!((report.total, report.succeeded, report.failed), (0, 0, 0));
    assert!(!report.backend.use_normalize);
}
