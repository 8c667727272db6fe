//! Artifact store backends.

pub mod fs;
pub mod http;
pub mod memory;

pub use fs::FsStore;
pub use http::HttpStore;
pub use memory::MemoryStore;
