use super::*;
use crate::error::FiguraError;
use crate::regenerate::{FnRegenerator, RegenerationRequest};
use crate::renderer::Renderer;
use crate::store::{ArtifactStore, StoredObject, UploadRetryPolicy};
use crate::types::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type Plan = fn(&RenderRequest) -> Result<Vec<u8>, FiguraError>;
type Delay = fn(&RenderRequest) -> Duration;

#[derive(Debug)]
struct Scripted {
    tier: Tier,
    pool: ResourcePool,
    plan: Plan,
    delay: Delay,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(tier: Tier, plan: Plan) -> Self {
        Self {
            tier,
            pool: ResourcePool::Process,
            plan,
            delay: |_| Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    fn with_delay(mut self, delay: Delay) -> Self {
        self.delay = delay;
        self
    }

    fn io(mut self) -> Self {
        self.pool = ResourcePool::Io;
        self
    }
}

#[async_trait]
impl Renderer for Scripted {
    fn info(&self) -> Arc<RendererInfo> {
        Arc::new(RendererInfo {
            name: format!("scripted-{}", self.tier),
            tier: self.tier,
            pool: self.pool,
        })
    }

    async fn render(&self, req: RenderRequest) -> Result<RenderedImage, FiguraError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = (self.delay)(&req);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        (self.plan)(&req).map(RenderedImage::png)
    }
}

/// Lets a test keep a handle on a renderer registered with the pipeline.
#[derive(Debug)]
struct Shared(Arc<Scripted>);

#[async_trait]
impl Renderer for Shared {
    fn info(&self) -> Arc<RendererInfo> {
        self.0.info()
    }

    async fn render(&self, req: RenderRequest) -> Result<RenderedImage, FiguraError> {
        self.0.render(req).await
    }
}

#[derive(Debug, Default)]
struct TestStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail: bool,
}

#[async_trait]
impl ArtifactStore for TestStore {
    fn info(&self) -> Arc<StoreInfo> {
        Arc::new(StoreInfo {
            id: "test".to_string(),
            name: "Test".to_string(),
        })
    }

    async fn put(&self, object: StoredObject) -> Result<(), FiguraError> {
        if self.fail {
            return Err(FiguraError::upload("bucket unavailable"));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(object.key, object.bytes.as_ref().clone());
        Ok(())
    }

    fn url_for(&self, key: &str) -> String {
        format!("https://cdn.test/{}", key)
    }
}

fn ok(_: &RenderRequest) -> Result<Vec<u8>, FiguraError> {
    Ok(vec![0x89, b'P', b'N', b'G'])
}

fn raise(_: &RenderRequest) -> Result<Vec<u8>, FiguraError> {
    Err(FiguraError::render("ZeroDivisionError: division by zero"))
}

fn spec(index: u32, diagram_type: DiagramType) -> DiagramSpec {
    DiagramSpec::new("asg-42", index, diagram_type, format!("diagram {}", index))
        .with_code("draw()")
}

#[derive(Debug, Default)]
struct Trails {
    resolved: Mutex<Vec<(u32, Vec<RenderAttempt>)>>,
}

#[async_trait]
impl crate::observer::RenderObserver for Trails {
    fn name(&self) -> &str {
        "trails"
    }

    async fn on_resolved(
        &self,
        ctx: &crate::observer::SpecContext,
        _entry: &BatchEntry,
        trail: &[RenderAttempt],
    ) -> Result<(), FiguraError> {
        self.resolved
            .lock()
            .unwrap()
            .push((ctx.question_index, trail.to_vec()));
        Ok(())
    }
}

#[tokio::test]
async fn test_empty_batch() {
    let pipeline = Pipeline::builder(TestStore::default())
        .renderer(Scripted::new(Tier::Plot, ok))
        .finish();

    let result = pipeline.generate_batch(Vec::new(), BatchOptions::new()).await;
    assert!(result.is_empty());
}

#[tokio::test]
async fn test_singleton_batch_persists_descriptor() {
    let pipeline = Pipeline::builder(TestStore::default())
        .renderer(Scripted::new(Tier::Plot, ok))
        .finish();

    let result = pipeline
        .generate_batch(vec![spec(7, DiagramType::Plot)], BatchOptions::new())
        .await;

    assert_eq!(result.len(), 1);
    let entry = &result.entries[0];
    assert!(entry.has_diagram);
    assert_eq!(entry.question_index, 7);
    let diagram = entry.diagram.as_ref().unwrap();
    assert_eq!(diagram.storage_key, crate::store::storage_key("asg-42", 7));
    assert_eq!(diagram.size_bytes, 4);
}

#[tokio::test]
async fn test_failing_spec_keeps_its_slot_and_siblings_run_in_parallel() {
    let svg = Scripted::new(Tier::Svg, |req| {
        if req.spec.question_index == 1 {
            raise(req)
        } else {
            ok(req)
        }
    })
    .with_delay(|_| Duration::from_millis(150));

    let pipeline = Pipeline::builder(TestStore::default())
        .renderer(svg)
        .finish();

    let specs: Vec<_> = (0..4).map(|i| spec(i, DiagramType::Svg)).collect();
    let start = Instant::now();
    let result = pipeline
        .generate_batch(specs, BatchOptions::new().with_concurrency(2))
        .await;
    let elapsed = start.elapsed();

    assert_eq!(result.len(), 4);
    assert!(!result.entries[1].has_diagram);
    assert_eq!(result.entries[1].absence, Some(AbsenceReason::Exhausted));
    for i in [0, 2, 3] {
        assert!(result.entries[i].has_diagram, "entry {} should be rendered", i);
        assert_eq!(result.entries[i].question_index, i as u32);
    }
    // Two rounds of two, not four sequential renders.
    assert!(elapsed < Duration::from_millis(550), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_primary_retry_then_ai_tier() {
    let plot = Arc::new(Scripted::new(Tier::Plot, raise));
    let ai = Arc::new(Scripted::new(Tier::AiImage, ok).io());
    let trails = Arc::new(Trails::default());
    let regenerations = Arc::new(AtomicUsize::new(0));

    let counter = regenerations.clone();
    let regenerator = FnRegenerator::new(move |req: RegenerationRequest| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            assert_eq!(req.failure, FailureKind::RenderError);
            Ok(Some("draw_again()".to_string()))
        }
    });

    let pipeline = Pipeline::builder(TestStore::default())
        .renderer(Shared(plot.clone()))
        .renderer(Shared(ai.clone()))
        .regenerator(Arc::new(regenerator))
        .observer(trails.clone())
        .finish();

    let outcome = pipeline.render_one(spec(0, DiagramType::Plot)).await;

    assert!(outcome.entry.has_diagram);
    assert_eq!(plot.calls.load(Ordering::SeqCst), 2);
    assert_eq!(ai.calls.load(Ordering::SeqCst), 1);
    assert_eq!(regenerations.load(Ordering::SeqCst), 1);

    let tiers: Vec<_> = outcome
        .attempts
        .iter()
        .map(|a| (a.tier, a.regenerated, a.is_success()))
        .collect();
    assert_eq!(
        tiers,
        vec![
            (Tier::Plot, false, false),
            (Tier::Plot, true, false),
            (Tier::AiImage, false, true),
        ]
    );

    let resolved = trails.resolved.lock().unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].1.len(), 3);
}

#[tokio::test]
async fn test_chain_without_ai_resolves_to_absence() {
    let svg = Arc::new(Scripted::new(Tier::Svg, raise));
    let ai = Arc::new(Scripted::new(Tier::AiImage, ok).io());

    let pipeline = Pipeline::builder(TestStore::default())
        .renderer(Shared(svg.clone()))
        .renderer(Shared(ai.clone()))
        .regenerator(Arc::new(FnRegenerator::new(|_req: RegenerationRequest| async {
            Ok(Some("<svg/>".to_string()))
        })))
        .finish();

    let outcome = pipeline.render_one(spec(3, DiagramType::Svg)).await;

    assert!(!outcome.entry.has_diagram);
    assert_eq!(outcome.entry.absence, Some(AbsenceReason::Exhausted));
    assert_eq!(svg.calls.load(Ordering::SeqCst), 2);
    assert_eq!(ai.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_declined_regeneration_advances_without_retry() {
    let plot = Arc::new(Scripted::new(Tier::Plot, raise));
    let svg = Arc::new(Scripted::new(Tier::Svg, ok));

    let pipeline = Pipeline::builder(TestStore::default())
        .renderer(Shared(plot.clone()))
        .renderer(Shared(svg.clone()))
        .finish();

    let outcome = pipeline
        .render_one(spec(0, DiagramType::Plot).with_svg_markup("<svg/>"))
        .await;

    assert!(outcome.entry.has_diagram);
    assert_eq!(plot.calls.load(Ordering::SeqCst), 1);
    let kinds: Vec<_> = outcome.attempts.iter().map(|a| (a.tier, a.outcome)).collect();
    assert_eq!(
        kinds,
        vec![
            (Tier::Plot, AttemptOutcome::Failure(FailureKind::RenderError)),
            (Tier::AiImage, AttemptOutcome::Failure(FailureKind::Unavailable)),
            (Tier::Svg, AttemptOutcome::Success),
        ]
    );
}

#[tokio::test]
async fn test_upload_failure_resolves_to_absence() {
    let pipeline = Pipeline::builder(TestStore {
        fail: true,
        ..Default::default()
    })
    .renderer(Scripted::new(Tier::Plot, ok))
    .finish();

    let result = pipeline
        .generate_batch(
            vec![spec(0, DiagramType::Plot), spec(1, DiagramType::Plot)],
            BatchOptions::new(),
        )
        .await;

    assert_eq!(result.len(), 2);
    assert!(result
        .iter()
        .all(|e| e.absence == Some(AbsenceReason::UploadFailed)));
}

#[tokio::test]
async fn test_empty_image_counts_as_no_output() {
    let pipeline = Pipeline::builder(TestStore::default())
        .renderer(Scripted::new(Tier::AiImage, |_| Ok(Vec::new())).io())
        .finish();

    let outcome = pipeline.render_one(spec(0, DiagramType::AiImage)).await;

    assert!(!outcome.entry.has_diagram);
    assert_eq!(
        outcome.attempts[0].outcome,
        AttemptOutcome::Failure(FailureKind::NoOutputProduced)
    );
}

#[tokio::test]
async fn test_order_is_input_order_not_completion_order() {
    let plot = Scripted::new(Tier::Plot, ok).with_delay(|req| {
        Duration::from_millis(20 * (5 - req.spec.question_index as u64))
    });

    let pipeline = Pipeline::builder(TestStore::default())
        .renderer(plot)
        .finish();

    let specs: Vec<_> = (0..5).map(|i| spec(i, DiagramType::Plot)).collect();
    let result = pipeline.generate_batch(specs, BatchOptions::new()).await;

    let order: Vec<_> = result.iter().map(|e| e.question_index).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
    assert_eq!(result.rendered_count(), 5);
}

#[tokio::test]
async fn test_cancellation_keeps_completed_entries() {
    let plot = Scripted::new(Tier::Plot, ok).with_delay(|req| {
        if req.spec.question_index < 2 {
            Duration::from_millis(10)
        } else {
            Duration::from_secs(30)
        }
    });

    let pipeline = Pipeline::builder(TestStore::default())
        .renderer(plot)
        .finish();

    let (handle, signal) = cancellation();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.cancel();
    });

    let specs: Vec<_> = (0..5).map(|i| spec(i, DiagramType::Plot)).collect();
    let start = Instant::now();
    let result = pipeline
        .generate_batch(specs, BatchOptions::new().with_cancel(signal))
        .await;

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(result.len(), 5);
    assert!(result.entries[0].has_diagram);
    assert!(result.entries[1].has_diagram);
    for entry in &result.entries[2..] {
        assert!(!entry.has_diagram);
        assert_eq!(entry.absence, Some(AbsenceReason::Cancelled));
    }
}

#[tokio::test]
async fn test_deadline_returns_partial_result() {
    let plot = Scripted::new(Tier::Plot, ok).with_delay(|req| {
        if req.spec.question_index == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(30)
        }
    });

    let pipeline = Pipeline::builder(TestStore::default())
        .renderer(plot)
        .finish();

    let specs: Vec<_> = (0..3).map(|i| spec(i, DiagramType::Plot)).collect();
    let result = pipeline
        .generate_batch(
            specs,
            BatchOptions::new().with_deadline(Duration::from_millis(150)),
        )
        .await;

    assert_eq!(result.len(), 3);
    assert!(result.entries[0].has_diagram);
    assert_eq!(result.entries[1].absence, Some(AbsenceReason::Cancelled));
    assert_eq!(result.entries[2].absence, Some(AbsenceReason::Cancelled));
}

#[tokio::test]
async fn test_tier_timeout_is_enforced() {
    let slow = Scripted::new(Tier::AiImage, ok)
        .io()
        .with_delay(|_| Duration::from_secs(30));

    let pipeline = Pipeline::builder(TestStore::default())
        .renderer(slow)
        .config(PipelineConfig::default().with_tier_timeout(Duration::from_millis(50)))
        .finish();

    let outcome = pipeline.render_one(spec(0, DiagramType::AiImage)).await;

    assert!(!outcome.entry.has_diagram);
    assert_eq!(
        outcome.attempts[0].outcome,
        AttemptOutcome::Failure(FailureKind::UpstreamError)
    );
}

#[tokio::test]
async fn test_rerender_overwrites_same_key() {
    let store = Arc::new(TestStore::default());

    #[derive(Debug)]
    struct SharedStore(Arc<TestStore>);

    #[async_trait]
    impl ArtifactStore for SharedStore {
        fn info(&self) -> Arc<StoreInfo> {
            self.0.info()
        }

        async fn put(&self, object: StoredObject) -> Result<(), FiguraError> {
            self.0.put(object).await
        }

        fn url_for(&self, key: &str) -> String {
            self.0.url_for(key)
        }
    }

    let pipeline = Pipeline::builder(SharedStore(store.clone()))
        .renderer(Scripted::new(Tier::Plot, ok))
        .finish();

    let first = pipeline.render_one(spec(2, DiagramType::Plot)).await;
    let second = pipeline.render_one(spec(2, DiagramType::Plot)).await;

    assert_eq!(first.entry.diagram, second.entry.diagram);
    assert_eq!(store.objects.lock().unwrap().len(), 1);
}

#[derive(Debug, Default)]
struct FlakyOnce {
    calls: AtomicUsize,
}

#[async_trait]
impl ArtifactStore for FlakyOnce {
    fn info(&self) -> Arc<StoreInfo> {
        Arc::new(StoreInfo {
            id: "flaky-once".to_string(),
            name: "FlakyOnce".to_string(),
        })
    }

    async fn put(&self, _object: StoredObject) -> Result<(), FiguraError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(FiguraError::storage("503 Service Unavailable"));
        }
        Ok(())
    }

    fn url_for(&self, key: &str) -> String {
        format!("https://cdn.test/{}", key)
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_upload_failure_is_retried_without_layers() {
    let pipeline = Pipeline::builder(FlakyOnce::default())
        .renderer(Scripted::new(Tier::Plot, ok))
        .finish();

    let outcome = pipeline.render_one(spec(0, DiagramType::Plot)).await;

    assert!(outcome.entry.has_diagram);
    assert_eq!(outcome.entry.absence, None);
}

#[tokio::test]
async fn test_upload_retry_can_be_disabled() {
    let pipeline = Pipeline::builder(FlakyOnce::default())
        .renderer(Scripted::new(Tier::Plot, ok))
        .config(PipelineConfig::default().with_upload_retry(UploadRetryPolicy::disabled()))
        .finish();

    let outcome = pipeline.render_one(spec(0, DiagramType::Plot)).await;

    assert_eq!(outcome.entry.absence, Some(AbsenceReason::UploadFailed));
}
