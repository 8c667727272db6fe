//! Error types for Figura rendering operations.

use crate::types::FailureKind;

/// Why the sandbox refused or terminated a code unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// The static pre-scan matched a forbidden construct
    ForbiddenConstruct,
    /// The wall-clock or CPU-time ceiling was exceeded
    Timeout,
    /// The address-space ceiling was exceeded
    MemoryLimit,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ViolationKind::ForbiddenConstruct => "forbidden construct",
            ViolationKind::Timeout => "timeout",
            ViolationKind::MemoryLimit => "memory limit",
        };
        f.write_str(name)
    }
}

/// The main error type for rendering operations.
#[derive(Debug, thiserror::Error)]
pub enum FiguraError {
    /// Sandbox rejected or killed the code unit
    #[error("Sandbox violation ({kind}): {detail}")]
    SandboxViolation { kind: ViolationKind, detail: String },

    /// Renderer code raised during normal execution
    #[error("Render error: {0}")]
    Render(String),

    /// Renderer finished without emitting an artifact
    #[error("No output produced: {0}")]
    NoOutput(String),

    /// AI image provider failure
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Malformed or implausible image payload
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage failure after retries were exhausted
    #[error("Upload error: {0}")]
    Upload(String),

    /// Transient storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// No renderer is configured for a tier
    #[error("Tier unavailable: {0}")]
    Unavailable(String),

    /// Spec is missing what a tier needs
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generic errors
    #[error("Error: {0}")]
    Other(String),
}

impl FiguraError {
    /// Create a sandbox violation error
    pub fn sandbox_violation(kind: ViolationKind, detail: impl Into<String>) -> Self {
        Self::SandboxViolation {
            kind,
            detail: detail.into(),
        }
    }

    /// Create a render error
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    /// Create a no-output error
    pub fn no_output(msg: impl Into<String>) -> Self {
        Self::NoOutput(msg.into())
    }

    /// Create an upstream error
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an upload error
    pub fn upload(msg: impl Into<String>) -> Self {
        Self::Upload(msg.into())
    }

    /// Create a transient storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an unavailable-tier error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create an invalid spec error
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FiguraError::Network(_) | FiguraError::Storage(_) | FiguraError::Io(_)
        )
    }

    /// Classify this error for the attempt trail
    pub fn kind(&self) -> FailureKind {
        match self {
            FiguraError::SandboxViolation { .. } => FailureKind::SandboxViolation,
            FiguraError::Render(_) => FailureKind::RenderError,
            FiguraError::NoOutput(_) => FailureKind::NoOutputProduced,
            FiguraError::Upstream(_) | FiguraError::Network(_) => FailureKind::UpstreamError,
            FiguraError::Validation(_) => FailureKind::ValidationError,
            FiguraError::Upload(_) | FiguraError::Storage(_) => FailureKind::UploadError,
            FiguraError::Unavailable(_) => FailureKind::Unavailable,
            FiguraError::InvalidSpec(_) => FailureKind::InvalidSpec,
            FiguraError::Io(_)
            | FiguraError::Serialization(_)
            | FiguraError::Configuration(_)
            | FiguraError::Other(_) => FailureKind::RenderError,
        }
    }
}

impl From<String> for FiguraError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<&str> for FiguraError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(FiguraError::storage("503").is_retryable());
        assert!(FiguraError::Io(std::io::Error::other("disk")).is_retryable());
        assert!(!FiguraError::upload("gave up").is_retryable());
        assert!(!FiguraError::render("ZeroDivisionError").is_retryable());
    }

    #[test]
    fn test_failure_kinds() {
        let err = FiguraError::sandbox_violation(ViolationKind::Timeout, "5s");
        assert_eq!(err.kind(), FailureKind::SandboxViolation);
        assert_eq!(FiguraError::no_output("x").kind(), FailureKind::NoOutputProduced);
        assert_eq!(FiguraError::upstream("429").kind(), FailureKind::UpstreamError);
        assert_eq!(err.to_string(), "Sandbox violation (timeout): 5s");
    }
}
