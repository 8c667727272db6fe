//! Render a small batch end to end.
//!
//! This demonstrates:
//! 1. A sandboxed executor shared by the code renderers
//! 2. A logging store layer and upload retry tuned through `PipelineConfig`
//! 3. The AI image tier when `OPENAI_API_KEY` is set
//! 4. An observer printing every attempt
//! 5. A batch deadline
//!
//! Run with `cargo run --example batch`. Python with
//! matplotlib, schemdraw and networkx must be on `PATH` for the code tiers to
//! succeed; without them every spec still resolves, just to an absence.

use async_trait::async_trait;
use figura::prelude::*;
use figura::{RenderAttempt, SpecContext};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct PrintAttempts;

#[async_trait]
impl RenderObserver for PrintAttempts {
    fn name(&self) -> &str {
        "print-attempts"
    }

    async fn on_attempt(
        &self,
        ctx: &SpecContext,
        attempt: &RenderAttempt,
    ) -> std::result::Result<(), FiguraError> {
        println!(
            "  q{} {:<8} {:<13} {:>6}ms {:?} {}",
            ctx.question_index,
            attempt.tier.as_str(),
            attempt.renderer,
            attempt.duration_ms,
            attempt.outcome,
            attempt.error_detail.as_deref().unwrap_or("")
        );
        Ok(())
    }
}

fn specs(assignment_id: &str) -> Vec<DiagramSpec> {
    vec![
        DiagramSpec::new(assignment_id, 0, DiagramType::Plot, "Parabola y = x^2").with_code(
            "x = np.linspace(-3, 3, 200)\n\
             plt.plot(x, x ** 2)\n\
             plt.title('y = x^2')\n\
             plt.grid(True)",
        ),
        DiagramSpec::new(assignment_id, 1, DiagramType::Circuit, "Series RC circuit").with_code(
            "with schemdraw.Drawing(file=OUTPUT_PATH) as d:\n\
             \x20   d += elm.SourceV().label('5V')\n\
             \x20   d += elm.Resistor().right().label('1k')\n\
             \x20   d += elm.Capacitor().down().label('10uF')\n\
             \x20   d += elm.Line().left()",
        ),
        DiagramSpec::new(assignment_id, 2, DiagramType::Tree, "Binary search tree")
            .with_code(
                "g = nx.balanced_tree(2, 2)\n\
                 nx.draw(g, with_labels=True, node_color='lightblue')",
            )
            .with_svg_markup(
                r#"<svg xmlns="http://www.w3.org/2000/svg" width="120" height="80">
                     <circle cx="60" cy="15" r="10" fill="steelblue"/>
                     <circle cx="30" cy="60" r="10" fill="steelblue"/>
                     <circle cx="90" cy="60" r="10" fill="steelblue"/>
                     <line x1="60" y1="25" x2="30" y2="50" stroke="black"/>
                     <line x1="60" y1="25" x2="90" y2="50" stroke="black"/>
                   </svg>"#,
            ),
        // Rejected by the static scan before any process starts
        DiagramSpec::new(assignment_id, 3, DiagramType::Plot, "Directory listing")
            .with_code("import os\nprint(os.listdir('/'))"),
        DiagramSpec::new(assignment_id, 4, DiagramType::Svg, "Unit square").with_code(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="50" height="50">
                 <rect x="5" y="5" width="40" height="40" fill="none" stroke="black"/>
               </svg>"#,
        ),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let executor = Arc::new(SandboxExecutor::new(
        SandboxConfig::default().with_timeout(Duration::from_secs(20)),
    )?);
    let logging = LoggingLayer::new();

    let store = MemoryStore::new("https://cdn.example.com/diagrams");
    let config = PipelineConfig::default()
        .with_concurrency(3)
        .with_upload_retry(UploadRetryPolicy::default().with_max_retries(5));
    let mut builder = Pipeline::builder(store.clone())
        .store_layer(LoggingLayer::new())
        .layered_renderer(CodeRenderer::plot(executor.clone()), &logging)
        .layered_renderer(CodeRenderer::circuit(executor.clone()), &logging)
        .layered_renderer(CodeRenderer::graph(executor.clone()), &logging)
        .layered_renderer(SvgRenderer::new(), &logging)
        .observer(Arc::new(PrintAttempts))
        .config(config);

    match OpenAiImageBuilder::from_env().build() {
        Ok(renderer) => builder = builder.layered_renderer(renderer, &logging),
        Err(e) => println!("AI image tier disabled: {}", e),
    }
    let pipeline = builder.finish();

    println!("Rendering batch...");
    let result = pipeline
        .generate_batch(
            specs("asg-demo"),
            BatchOptions::new().with_deadline(Duration::from_secs(120)),
        )
        .await;

    println!(
        "\n{}/{} diagrams rendered, {} objects stored, {} sandbox processes spawned",
        result.rendered_count(),
        result.len(),
        store.len(),
        executor.spawned_processes()
    );
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
