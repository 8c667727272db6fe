//! # Figura Providers
//!
//! External services behind the core traits: the AI image tier and the
//! artifact store backends.

pub mod openai;
pub mod store;
pub mod validate;

#[cfg(test)]
mod test_server;

// Re-exports
pub use openai::{OpenAiImageBuilder, OpenAiImageRenderer};
pub use store::{FsStore, HttpStore, MemoryStore};
pub use validate::ImageValidator;

// Image sizes accepted by the builder
pub use async_openai::types::ImageSize;
