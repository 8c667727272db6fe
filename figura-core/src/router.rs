//! Renderer router.
//!
//! Maps a spec to its ordered tier chain. The end of the chain is the implicit
//! "skip": once every tier has failed the spec resolves to no diagram.

use crate::types::{DiagramSpec, DiagramType, Tier};

/// Ordered tier chain for a diagram type
pub fn chain_for(diagram_type: DiagramType) -> &'static [Tier] {
    match diagram_type {
        DiagramType::Graph | DiagramType::Tree | DiagramType::DataStructure => {
            &[Tier::Graph, Tier::AiImage, Tier::Svg]
        }
        // SVG is a poor circuit substitute
        DiagramType::Circuit => &[Tier::Circuit, Tier::AiImage],
        DiagramType::Plot => &[Tier::Plot, Tier::AiImage, Tier::Svg],
        // No code was authored, so nothing to fall back to
        DiagramType::AiImage => &[Tier::AiImage],
        DiagramType::Svg => &[Tier::Svg],
    }
}

/// Ordered tier chain for a spec
pub fn route(spec: &DiagramSpec) -> Vec<Tier> {
    chain_for(spec.diagram_type).to_vec()
}
