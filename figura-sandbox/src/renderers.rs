//! Renderers backed by the sandbox or by in-process rasterizing.

use crate::executor::SandboxExecutor;
use async_trait::async_trait;
use figura_core::error::FiguraError;
use figura_core::renderer::Renderer;
use figura_core::types::*;
use resvg::tiny_skia;
use resvg::usvg;
use std::sync::Arc;

const PLOT_IMPORTS: &str = "\
import matplotlib
matplotlib.use(\"Agg\")
import matplotlib.pyplot as plt
import numpy as np
";

const CIRCUIT_IMPORTS: &str = "\
import schemdraw
import schemdraw.elements as elm
schemdraw.use(\"matplotlib\")
";

const GRAPH_IMPORTS: &str = "\
import networkx as nx
";

// Saves the current figure when the authored code did not write the output.
const EPILOGUE: &str = "
import os as _figura_os
if not _figura_os.path.exists(OUTPUT_PATH) and plt.get_fignums():
    plt.savefig(OUTPUT_PATH, dpi=150, bbox_inches=\"tight\")
";

/// Renders authored Python through the sandbox.
///
/// The authored code runs between a trusted prelude (non-interactive
/// backend, tier imports, `OUTPUT_PATH`) and an epilogue that saves the open
/// figure. Only the authored code is scanned.
#[derive(Debug)]
pub struct CodeRenderer {
    info: Arc<RendererInfo>,
    imports: &'static str,
    executor: Arc<SandboxExecutor>,
}

impl CodeRenderer {
    /// Function plots and physics figures (matplotlib)
    pub fn plot(executor: Arc<SandboxExecutor>) -> Self {
        Self::new(Tier::Plot, "matplotlib", "", executor)
    }

    /// Circuit schematics (schemdraw)
    pub fn circuit(executor: Arc<SandboxExecutor>) -> Self {
        Self::new(Tier::Circuit, "schemdraw", CIRCUIT_IMPORTS, executor)
    }

    /// Graphs, trees and data structures (networkx)
    pub fn graph(executor: Arc<SandboxExecutor>) -> Self {
        Self::new(Tier::Graph, "networkx", GRAPH_IMPORTS, executor)
    }

    fn new(
        tier: Tier,
        name: &str,
        imports: &'static str,
        executor: Arc<SandboxExecutor>,
    ) -> Self {
        Self {
            info: Arc::new(RendererInfo {
                name: name.to_string(),
                tier,
                pool: ResourcePool::Process,
            }),
            imports,
            executor,
        }
    }

    /// The full script run for `code`
    pub fn script(&self, code: &str) -> String {
        format!(
            "{}{}OUTPUT_PATH = \"{}\"\n\n{}\n{}",
            PLOT_IMPORTS,
            self.imports,
            self.executor.config().output_file,
            code,
            EPILOGUE
        )
    }
}

#[async_trait]
impl Renderer for CodeRenderer {
    fn info(&self) -> Arc<RendererInfo> {
        self.info.clone()
    }

    async fn render(&self, req: RenderRequest) -> Result<RenderedImage, FiguraError> {
        let code = req.require_source(self.info.tier)?;
        let config = self.executor.config();
        let bytes = self
            .executor
            .execute_script(
                code,
                &self.script(code),
                config.timeout(),
                config.memory_limit_bytes,
            )
            .await?;
        Ok(RenderedImage::png(bytes))
    }
}

/// Rasterizes SVG markup to PNG in-process. The markup is parsed, never
/// executed.
#[derive(Clone)]
pub struct SvgRenderer {
    info: Arc<RendererInfo>,
    fontdb: Arc<usvg::fontdb::Database>,
    scale: f32,
    max_dimension: u32,
}

impl SvgRenderer {
    /// Create a renderer that loads the system fonts once
    pub fn new() -> Self {
        let mut fontdb = usvg::fontdb::Database::new();
        fontdb.load_system_fonts();
        Self {
            info: Arc::new(RendererInfo {
                name: "resvg".to_string(),
                tier: Tier::Svg,
                pool: ResourcePool::Process,
            }),
            fontdb: Arc::new(fontdb),
            scale: 2.0,
            max_dimension: 4096,
        }
    }

    /// Pixels per SVG user unit
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    /// Rasterize markup to PNG bytes.
    ///
    /// Embedded images are honoured only as `data:` URIs; `href`s naming
    /// files or URLs resolve to nothing.
    pub fn rasterize(&self, markup: &str) -> Result<Vec<u8>, FiguraError> {
        let options = usvg::Options {
            resources_dir: None,
            fontdb: self.fontdb.clone(),
            image_href_resolver: usvg::ImageHrefResolver {
                resolve_data: usvg::ImageHrefResolver::default_data_resolver(),
                resolve_string: Box::new(|_: &str, _: &usvg::Options| None),
            },
            ..usvg::Options::default()
        };
        let tree = usvg::Tree::from_str(markup, &options)
            .map_err(|e| FiguraError::render(format!("failed to parse SVG: {}", e)))?;

        let size = tree.size();
        if size.width() <= 0.0 || size.height() <= 0.0 {
            return Err(FiguraError::render("SVG has an empty canvas"));
        }

        let longest = size.width().max(size.height());
        let scale = self.scale.min(self.max_dimension as f32 / longest);
        let width = (size.width() * scale).ceil().max(1.0) as u32;
        let height = (size.height() * scale).ceil().max(1.0) as u32;

        let mut pixmap = tiny_skia::Pixmap::new(width, height).ok_or_else(|| {
            FiguraError::render(format!("failed to allocate {}x{} canvas", width, height))
        })?;
        pixmap.fill(tiny_skia::Color::WHITE);
        resvg::render(
            &tree,
            tiny_skia::Transform::from_scale(scale, scale),
            &mut pixmap.as_mut(),
        );

        pixmap
            .encode_png()
            .map_err(|e| FiguraError::render(format!("failed to encode PNG: {}", e)))
    }
}

impl std::fmt::Debug for SvgRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SvgRenderer")
            .field("scale", &self.scale)
            .field("max_dimension", &self.max_dimension)
            .field("fonts", &self.fontdb.len())
            .finish()
    }
}

impl Default for SvgRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Renderer for SvgRenderer {
    fn info(&self) -> Arc<RendererInfo> {
        self.info.clone()
    }

    async fn render(&self, req: RenderRequest) -> Result<RenderedImage, FiguraError> {
        let markup = req.require_source(Tier::Svg)?.to_string();
        let renderer = self.clone();
        let bytes = tokio::task::spawn_blocking(move || renderer.rasterize(&markup))
            .await
            .map_err(|e| FiguraError::render(format!("rasterizer task failed: {}", e)))??;
        Ok(RenderedImage::png(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NetworkIsolation, SandboxConfig};

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

    fn request(spec: DiagramSpec, tier: Tier) -> RenderRequest {
        RenderRequest::for_tier(Arc::new(spec), tier)
    }

    #[test]
    fn test_script_wraps_code() {
        let executor = Arc::new(SandboxExecutor::new(SandboxConfig::default()).unwrap());
        let renderer = CodeRenderer::circuit(executor);

        let script = renderer.script("d = schemdraw.Drawing()");
        assert!(script.starts_with("import matplotlib\nmatplotlib.use(\"Agg\")"));
        assert!(script.contains("import schemdraw.elements as elm"));
        assert!(script.contains("OUTPUT_PATH = \"output.png\""));
        assert!(script.contains("d = schemdraw.Drawing()\n"));
        assert!(script.trim_end().ends_with("bbox_inches=\"tight\")"));
        assert_eq!(renderer.info().tier, Tier::Circuit);
    }

    #[tokio::test]
    async fn test_code_renderer_scans_only_authored_code() {
        let executor = Arc::new(SandboxExecutor::new(SandboxConfig::default()).unwrap());
        let renderer = CodeRenderer::plot(executor.clone());
        let spec = DiagramSpec::new("asg", 0, DiagramType::Plot, "escape")
            .with_code("import subprocess\nsubprocess.run(['ls'])");

        let err = renderer.render(request(spec, Tier::Plot)).await.unwrap_err();

        assert_eq!(err.kind(), FailureKind::SandboxViolation);
        assert_eq!(executor.spawned_processes(), 0);
    }

    #[tokio::test]
    async fn test_code_renderer_requires_code() {
        let executor = Arc::new(
            SandboxExecutor::new(SandboxConfig::for_shell().with_network(NetworkIsolation::Disabled))
                .unwrap(),
        );
        let renderer = CodeRenderer::graph(executor.clone());
        let spec = DiagramSpec::new("asg", 0, DiagramType::Tree, "binary tree");

        let err = renderer.render(request(spec, Tier::Graph)).await.unwrap_err();

        assert!(matches!(err, FiguraError::InvalidSpec(_)));
        assert_eq!(executor.spawned_processes(), 0);
    }

    #[tokio::test]
    async fn test_svg_rasterizes_to_png() {
        let renderer = SvgRenderer::new().with_scale(1.0);
        let spec = DiagramSpec::new("asg", 4, DiagramType::Svg, "square").with_code(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="20">
                 <rect x="5" y="5" width="30" height="10" fill="black"/>
               </svg>"#,
        );

        let image = renderer.render(request(spec, Tier::Svg)).await.unwrap();

        assert!(image.bytes.starts_with(PNG_MAGIC));
        assert_eq!(image.content_type, PNG_CONTENT_TYPE);
    }

    #[test]
    fn test_svg_scale_is_capped() {
        let renderer = SvgRenderer::new().with_max_dimension(100);
        let png = renderer
            .rasterize(
                r#"<svg xmlns="http://www.w3.org/2000/svg" width="1000" height="500">
                     <circle cx="500" cy="250" r="200" fill="red"/>
                   </svg>"#,
            )
            .unwrap();

        // IHDR width and height follow the 8-byte signature and chunk header
        let width = u32::from_be_bytes([png[16], png[17], png[18], png[19]]);
        let height = u32::from_be_bytes([png[20], png[21], png[22], png[23]]);
        assert_eq!((width, height), (100, 50));
    }

    #[test]
    fn test_svg_cannot_embed_host_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.png");
        let mut red = tiny_skia::Pixmap::new(10, 10).unwrap();
        red.fill(tiny_skia::Color::from_rgba8(255, 0, 0, 255));
        red.save_png(&path).unwrap();

        let markup = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="10" height="10">
                 <image x="0" y="0" width="10" height="10" xlink:href="{path}"/>
                 <image x="0" y="0" width="10" height="10" href="file://{path}"/>
               </svg>"#,
            path = path.display()
        );
        let png = SvgRenderer::new().with_scale(1.0).rasterize(&markup).unwrap();

        let pixmap = tiny_skia::Pixmap::decode_png(&png).unwrap();
        let pixel = pixmap.pixel(5, 5).unwrap();
        assert_eq!(
            (pixel.red(), pixel.green(), pixel.blue()),
            (255, 255, 255),
            "host image leaked into the raster"
        );
    }

    #[tokio::test]
    async fn test_malformed_svg_is_render_error() {
        let renderer = SvgRenderer::new();
        let spec = DiagramSpec::new("asg", 1, DiagramType::Svg, "broken").with_code("<svg");

        let err = renderer.render(request(spec, Tier::Svg)).await.unwrap_err();

        assert_eq!(err.kind(), FailureKind::RenderError);
    }
}
