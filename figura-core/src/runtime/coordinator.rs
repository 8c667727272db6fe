//! Fallback coordinator.
//!
//! Drives one spec through its tier chain as an explicit state machine:
//!
//! ```text
//! Pending -> Attempt(0) -> Success
//!                       -> Attempt(0, regenerated)   (once, primary tier only)
//!                       -> Attempt(1) -> ... -> Exhausted
//! ```
//!
//! Every tier failure is caught here and recorded in the attempt trail. The
//! coordinator always resolves to a batch entry; it never returns an error.

use crate::error::{FiguraError, ViolationKind};
use crate::observer::{ObserverEngine, SpecContext};
use crate::regenerate::{CodeRegenerator, RegenerationRequest};
use crate::renderer::RendererSet;
use crate::router;
use crate::runtime::config::PipelineConfig;
use crate::store::DiagramStore;
use crate::types::*;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

/// Resolution of a single spec
#[derive(Debug, Clone)]
pub struct SpecOutcome {
    pub entry: BatchEntry,
    pub attempts: Vec<RenderAttempt>,
}

enum State {
    Pending,
    Attempt { index: usize, request: RenderRequest },
    Success { tier: Tier, image: RenderedImage },
    Exhausted,
}

/// Borrowed view of the pipeline used while a spec is in flight
pub(crate) struct Coordinator<'a> {
    pub(crate) renderers: &'a RendererSet,
    pub(crate) store: &'a DiagramStore,
    pub(crate) regenerator: &'a dyn CodeRegenerator,
    pub(crate) observers: &'a ObserverEngine,
    pub(crate) io_slots: &'a Semaphore,
    pub(crate) config: &'a PipelineConfig,
}

impl Coordinator<'_> {
    pub(crate) async fn run(&self, spec: DiagramSpec, ctx: SpecContext) -> SpecOutcome {
        let spec = Arc::new(spec);
        let chain = router::route(&spec);
        self.observers.on_spec_start(&ctx, &chain).await;

        tracing::debug!(
            "spec {} ({:?}) routed to [{}]",
            spec.id,
            spec.diagram_type,
            chain.iter().map(Tier::as_str).collect::<Vec<_>>().join(", ")
        );

        let mut trail = Vec::with_capacity(chain.len() + 1);
        let mut retried = false;
        let mut state = State::Pending;

        let rendered = loop {
            state = match state {
                State::Pending => Self::enter(&spec, &chain, 0),
                State::Attempt { index, request } => {
                    let tier = chain[index];
                    let failed_source = request.source.clone();
                    let (attempt, result) = self.attempt(tier, request).await;
                    self.observers.on_attempt(&ctx, &attempt).await;
                    let detail = attempt.error_detail.clone().unwrap_or_default();
                    trail.push(attempt);

                    match result {
                        Ok(image) => State::Success { tier, image },
                        Err(err) => {
                            tracing::warn!("spec {} tier {} failed: {}", spec.id, tier, detail);
                            let may_retry = index == 0
                                && !retried
                                && tier.consumes_source()
                                && !matches!(err, FiguraError::Unavailable(_));

                            if may_retry {
                                retried = true;
                                let regenerated = self
                                    .regenerate(&spec, tier, failed_source, detail, err.kind())
                                    .await;
                                match regenerated {
                                    Some(source) => State::Attempt {
                                        index,
                                        request: RenderRequest::regenerated(spec.clone(), source),
                                    },
                                    None => Self::enter(&spec, &chain, index + 1),
                                }
                            } else {
                                Self::enter(&spec, &chain, index + 1)
                            }
                        }
                    }
                }
                State::Success { tier, image } => break Some((tier, image)),
                State::Exhausted => break None,
            };
        };

        let entry = match rendered {
            Some((tier, image)) => self.persist(&spec, tier, image).await,
            None => {
                tracing::warn!(
                    "spec {} exhausted {} tier(s) after {} attempt(s): {}",
                    spec.id,
                    chain.len(),
                    trail.len(),
                    summarize(&trail)
                );
                BatchEntry::absent(spec.question_index, AbsenceReason::Exhausted)
            }
        };

        self.observers.on_resolved(&ctx, &entry, &trail).await;

        SpecOutcome {
            entry,
            attempts: trail,
        }
    }

    fn enter(spec: &Arc<DiagramSpec>, chain: &[Tier], index: usize) -> State {
        match chain.get(index) {
            Some(&tier) => State::Attempt {
                index,
                request: RenderRequest::for_tier(spec.clone(), tier),
            },
            None => State::Exhausted,
        }
    }

    async fn attempt(
        &self,
        tier: Tier,
        request: RenderRequest,
    ) -> (RenderAttempt, Result<RenderedImage, FiguraError>) {
        let regenerated = request.regenerated;
        let start = Instant::now();

        let Some(renderer) = self.renderers.get(tier) else {
            let err = FiguraError::unavailable(format!("no renderer configured for tier {}", tier));
            let attempt = RenderAttempt::failure(tier, "none", 0, &err);
            return (attempt.with_regenerated(regenerated), Err(err));
        };
        let info = renderer.info();

        let _permit = match info.pool {
            ResourcePool::Io => match self.io_slots.acquire().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    let err = FiguraError::other("I/O pool closed");
                    let attempt = RenderAttempt::failure(tier, info.name.clone(), 0, &err);
                    return (attempt.with_regenerated(regenerated), Err(err));
                }
            },
            ResourcePool::Process => None,
        };

        let timeout = self.config.tier_timeout();
        let result = match tokio::time::timeout(timeout, renderer.render(request)).await {
            Ok(Ok(image)) if image.bytes.is_empty() => Err(FiguraError::no_output(format!(
                "{} returned an empty image",
                info.name
            ))),
            Ok(result) => result,
            Err(_) => Err(match info.pool {
                ResourcePool::Process => FiguraError::sandbox_violation(
                    ViolationKind::Timeout,
                    format!("tier exceeded {:?}", timeout),
                ),
                ResourcePool::Io => {
                    FiguraError::upstream(format!("tier timed out after {:?}", timeout))
                }
            }),
        };

        let elapsed = start.elapsed().as_millis() as u64;
        let attempt = match &result {
            Ok(_) => RenderAttempt::success(tier, info.name.clone(), elapsed),
            Err(e) => RenderAttempt::failure(tier, info.name.clone(), elapsed, e),
        };

        (attempt.with_regenerated(regenerated), result)
    }

    async fn regenerate(
        &self,
        spec: &Arc<DiagramSpec>,
        tier: Tier,
        failed_source: Option<String>,
        error_detail: String,
        failure: FailureKind,
    ) -> Option<String> {
        let request = RegenerationRequest {
            spec: spec.clone(),
            tier,
            failed_source,
            error_detail,
            failure,
        };

        match self.regenerator.regenerate(request).await {
            Ok(Some(source)) if !source.trim().is_empty() => {
                tracing::debug!("spec {} retrying tier {} with regenerated code", spec.id, tier);
                Some(source)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("spec {} regeneration failed: {}", spec.id, e);
                None
            }
        }
    }

    async fn persist(&self, spec: &DiagramSpec, tier: Tier, image: RenderedImage) -> BatchEntry {
        let put = async {
            let _permit = self
                .io_slots
                .acquire()
                .await
                .map_err(|_| FiguraError::upload("I/O pool closed"))?;
            self.store
                .put(image, &spec.assignment_id, spec.question_index)
                .await
        };

        let timeout = self.config.store_timeout();
        let result = match tokio::time::timeout(timeout, put).await {
            Ok(result) => result,
            Err(_) => Err(FiguraError::upload(format!(
                "upload timed out after {:?}",
                timeout
            ))),
        };

        match result {
            Ok(descriptor) => {
                tracing::debug!(
                    "spec {} rendered by {} tier, stored at {}",
                    spec.id,
                    tier,
                    descriptor.storage_key
                );
                BatchEntry::present(spec.question_index, descriptor)
            }
            Err(e) => {
                tracing::error!("spec {} rendered but upload failed: {}", spec.id, e);
                BatchEntry::absent(spec.question_index, AbsenceReason::UploadFailed)
            }
        }
    }
}

fn summarize(trail: &[RenderAttempt]) -> String {
    trail
        .iter()
        .map(|a| {
            format!(
                "{}{}={}",
                a.tier,
                if a.regenerated { "(regen)" } else { "" },
                a.error_detail.as_deref().unwrap_or("ok")
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}
