//! # Figura Sandbox
//!
//! Isolated execution of model-generated rendering code, plus the renderers
//! that sit on top of it.
//!
//! Code units are rejected by a static pre-scan before any process exists.
//! Accepted code runs in a child process with a wall-clock timeout, an
//! address-space ceiling and a private scratch directory.

pub mod config;
pub mod executor;
pub mod renderers;
pub mod scan;

pub use config::{NetworkIsolation, SandboxConfig};
pub use executor::SandboxExecutor;
pub use renderers::{CodeRenderer, SvgRenderer};
pub use scan::{ScanRule, StaticScanner, DEFAULT_RULES};
