//! Core types for diagram rendering.

use crate::error::FiguraError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Maximum length of an error detail kept in the attempt trail.
pub const ERROR_DETAIL_LIMIT: usize = 300;

/// Content type of every persisted diagram.
pub const PNG_CONTENT_TYPE: &str = "image/png";

/// Requested diagram kind, as authored upstream
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "kebab-case")]
pub enum DiagramType {
    /// Function plots, physics and statics figures
    #[serde(alias = "function", alias = "physics", alias = "statics")]
    Plot,
    Circuit,
    Graph,
    Tree,
    #[serde(alias = "data_structure", alias = "datastructure")]
    DataStructure,
    /// Explicitly requested generative image
    #[serde(alias = "ai_image", alias = "image")]
    AiImage,
    Svg,
}

/// One candidate rendering strategy in a fallback chain.
///
/// This is a closed set: the router can only ever produce these variants,
/// which keeps every chain finite.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    Plot,
    Circuit,
    Graph,
    AiImage,
    Svg,
}

impl Tier {
    /// Stable name used in logs and attempt trails
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Plot => "plot",
            Tier::Circuit => "circuit",
            Tier::Graph => "graph",
            Tier::AiImage => "ai-image",
            Tier::Svg => "svg",
        }
    }

    /// Whether this tier renders authored source (and can therefore be
    /// retried with regenerated source)
    pub fn consumes_source(&self) -> bool {
        !matches!(self, Tier::AiImage)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The input unit describing what to render and how
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct DiagramSpec {
    /// Question index within the batch
    pub id: u32,
    pub diagram_type: DiagramType,
    /// Free text used for AI prompts and logging
    pub description: String,
    /// Generated source for code-based types
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_prompt: Option<String>,
    /// SVG markup usable by the SVG tier of non-svg specs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svg_markup: Option<String>,
    pub assignment_id: String,
    pub question_index: u32,
}

impl DiagramSpec {
    /// Create a new spec without code or prompts
    pub fn new(
        assignment_id: impl Into<String>,
        question_index: u32,
        diagram_type: DiagramType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: question_index,
            diagram_type,
            description: description.into(),
            code: None,
            ai_prompt: None,
            svg_markup: None,
            assignment_id: assignment_id.into(),
            question_index,
        }
    }

    /// Set generated code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Set an explicit AI prompt
    pub fn with_ai_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.ai_prompt = Some(prompt.into());
        self
    }

    /// Set SVG markup for the SVG tier
    pub fn with_svg_markup(mut self, markup: impl Into<String>) -> Self {
        self.svg_markup = Some(markup.into());
        self
    }

    /// Prompt for the AI tier: the explicit prompt, or the description
    pub fn effective_prompt(&self) -> &str {
        self.ai_prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&self.description)
    }

    /// Source the given tier would render, before any regeneration
    pub fn source_for(&self, tier: Tier) -> Option<&str> {
        match tier {
            Tier::Plot | Tier::Circuit | Tier::Graph => self.code.as_deref(),
            Tier::Svg => match self.diagram_type {
                DiagramType::Svg => self.code.as_deref().or(self.svg_markup.as_deref()),
                _ => self.svg_markup.as_deref(),
            },
            Tier::AiImage => None,
        }
    }
}

/// A request handed to a single tier
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub spec: Arc<DiagramSpec>,
    /// Source to render; regenerated source replaces the spec's own
    pub source: Option<String>,
    /// Whether `source` came from the regenerator
    pub regenerated: bool,
}

impl RenderRequest {
    /// Build the request for a tier from the spec's own source
    pub fn for_tier(spec: Arc<DiagramSpec>, tier: Tier) -> Self {
        let source = spec.source_for(tier).map(str::to_string);
        Self {
            spec,
            source,
            regenerated: false,
        }
    }

    /// Build a retry request carrying regenerated source
    pub fn regenerated(spec: Arc<DiagramSpec>, source: String) -> Self {
        Self {
            spec,
            source: Some(source),
            regenerated: true,
        }
    }

    /// The source, or an `InvalidSpec` error naming the tier
    pub fn require_source(&self, tier: Tier) -> Result<&str, FiguraError> {
        self.source
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                FiguraError::invalid_spec(format!(
                    "spec {} has no source for the {} tier",
                    self.spec.id, tier
                ))
            })
    }
}

/// Image bytes produced by a tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl RenderedImage {
    /// Wrap PNG bytes
    pub fn png(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            content_type: PNG_CONTENT_TYPE.to_string(),
        }
    }
}

/// Transient value returned by a single tier attempt
pub type ExecutionResult = Result<Vec<u8>, FiguraError>;

/// Which resource pool a renderer draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourcePool {
    /// CPU-bound work with its own slots (sandbox processes, rasterizing)
    Process,
    /// Network-bound work sharing the I/O slots with uploads
    Io,
}

/// Renderer information
#[derive(Debug, Clone)]
pub struct RendererInfo {
    pub name: String,
    pub tier: Tier,
    pub pool: ResourcePool,
}

/// Artifact store information
#[derive(Debug, Clone)]
pub struct StoreInfo {
    pub id: String,
    pub name: String,
}

/// Failure classification recorded in attempt trails
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    SandboxViolation,
    RenderError,
    NoOutputProduced,
    UpstreamError,
    ValidationError,
    UploadError,
    Unavailable,
    InvalidSpec,
}

/// Outcome of a single attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", content = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure(FailureKind),
}

/// One entry of a spec's diagnostic trail
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderAttempt {
    pub tier: Tier,
    pub renderer: String,
    pub outcome: AttemptOutcome,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub regenerated: bool,
}

impl RenderAttempt {
    /// Record a successful attempt
    pub fn success(tier: Tier, renderer: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            tier,
            renderer: renderer.into(),
            outcome: AttemptOutcome::Success,
            duration_ms,
            error_detail: None,
            regenerated: false,
        }
    }

    /// Record a failed attempt, truncating the error detail
    pub fn failure(
        tier: Tier,
        renderer: impl Into<String>,
        duration_ms: u64,
        error: &FiguraError,
    ) -> Self {
        Self {
            tier,
            renderer: renderer.into(),
            outcome: AttemptOutcome::Failure(error.kind()),
            duration_ms,
            error_detail: Some(truncate(&error.to_string(), ERROR_DETAIL_LIMIT)),
            regenerated: false,
        }
    }

    /// Mark the attempt as using regenerated source
    pub fn with_regenerated(mut self, regenerated: bool) -> Self {
        self.regenerated = regenerated;
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

/// The persisted contract returned to callers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiagramDescriptor {
    pub file_id: String,
    pub filename: String,
    pub storage_key: String,
    pub url: String,
    pub content_type: String,
    pub size_bytes: u64,
}

/// Why a batch entry carries no diagram
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AbsenceReason {
    /// Every tier failed
    Exhausted,
    /// Rendering succeeded but the upload did not
    UploadFailed,
    /// The batch was cancelled before the spec resolved
    Cancelled,
}

/// One slot of a batch result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub question_index: u32,
    pub has_diagram: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagram: Option<DiagramDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absence: Option<AbsenceReason>,
}

impl BatchEntry {
    /// An entry holding a persisted diagram
    pub fn present(question_index: u32, diagram: DiagramDescriptor) -> Self {
        Self {
            question_index,
            has_diagram: true,
            diagram: Some(diagram),
            absence: None,
        }
    }

    /// An absence marker
    pub fn absent(question_index: u32, reason: AbsenceReason) -> Self {
        Self {
            question_index,
            has_diagram: false,
            diagram: None,
            absence: Some(reason),
        }
    }
}

/// Ordered result of a batch, one entry per input spec
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct BatchResult {
    pub entries: Vec<BatchEntry>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BatchEntry> {
        self.entries.iter()
    }

    /// Number of entries carrying a diagram
    pub fn rendered_count(&self) -> usize {
        self.entries.iter().filter(|e| e.has_diagram).count()
    }
}

impl IntoIterator for BatchResult {
    type Item = BatchEntry;
    type IntoIter = std::vec::IntoIter<BatchEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Truncate to at most `max` characters on a char boundary
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
