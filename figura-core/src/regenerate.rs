//! Code regeneration seam.
//!
//! Authoring code is an upstream concern. The coordinator only asks for a
//! fresh code unit once, after the primary tier fails, and renders whatever
//! comes back.

use crate::error::FiguraError;
use crate::types::*;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Failure context handed to the regenerator
#[derive(Debug, Clone)]
pub struct RegenerationRequest {
    pub spec: Arc<DiagramSpec>,
    pub tier: Tier,
    /// The source that failed
    pub failed_source: Option<String>,
    /// Truncated error detail of the failed attempt
    pub error_detail: String,
    pub failure: FailureKind,
}

/// Upstream collaborator that re-authors a failed code unit
#[async_trait]
pub trait CodeRegenerator: Send + Sync + 'static {
    /// Produce replacement source, or `None` to skip the retry
    async fn regenerate(&self, req: RegenerationRequest) -> Result<Option<String>, FiguraError>;
}

/// Regenerator that always declines
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRegeneration;

#[async_trait]
impl CodeRegenerator for NoRegeneration {
    async fn regenerate(&self, _req: RegenerationRequest) -> Result<Option<String>, FiguraError> {
        Ok(None)
    }
}

type RegenerateFn = dyn Fn(
        RegenerationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, FiguraError>> + Send>>
    + Send
    + Sync;

/// Closure-based regenerator
pub struct FnRegenerator {
    f: Arc<RegenerateFn>,
}

impl FnRegenerator {
    /// Create a regenerator from an async closure
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(RegenerationRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<String>, FiguraError>> + Send + 'static,
    {
        Self {
            f: Arc::new(move |req| Box::pin(f(req))),
        }
    }
}

impl std::fmt::Debug for FnRegenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnRegenerator").finish_non_exhaustive()
    }
}

#[async_trait]
impl CodeRegenerator for FnRegenerator {
    async fn regenerate(&self, req: RegenerationRequest) -> Result<Option<String>, FiguraError> {
        (self.f)(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_regenerator() {
        let regen = FnRegenerator::new(|req: RegenerationRequest| async move {
            Ok(Some(format!("# retry for {}\n", req.tier)))
        });

        let spec = Arc::new(DiagramSpec::new("asg", 1, DiagramType::Plot, "parabola"));
        let code = regen
            .regenerate(RegenerationRequest {
                spec,
                tier: Tier::Plot,
                failed_source: Some("plt.plot(".to_string()),
                error_detail: "SyntaxError".to_string(),
                failure: FailureKind::RenderError,
            })
            .await
            .unwrap();

        assert_eq!(code.as_deref(), Some("# retry for plot\n"));
    }
}
