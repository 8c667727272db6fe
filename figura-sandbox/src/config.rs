//! Sandbox configuration.

use crate::scan::{ScanRule, DEFAULT_RULES};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How the child is cut off from the network
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkIsolation {
    /// Fail the spawn if fresh user and network namespaces cannot be entered
    Required,
    /// Enter fresh namespaces when the host allows it
    #[default]
    BestEffort,
    /// Rely on the static scan and the cleared environment only
    Disabled,
}

/// Immutable sandbox configuration, shared by every execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Interpreter program, resolved against `path_env`
    pub interpreter: String,
    /// Arguments placed before the script name
    pub interpreter_args: Vec<String>,
    /// File name the source is written to inside the scratch directory
    pub script_name: String,
    /// `PATH` handed to the child
    pub path_env: String,
    /// Wall-clock ceiling used by renderers
    pub timeout_ms: u64,
    /// Address-space ceiling used by renderers
    pub memory_limit_bytes: u64,
    /// CPU-time backstop; derived from the timeout when unset
    pub cpu_limit_secs: Option<u64>,
    /// Largest file the child may write
    pub max_file_bytes: u64,
    /// The designated artifact, relative to the scratch directory
    pub output_file: String,
    /// Parent of the per-execution scratch directories
    pub scratch_root: Option<PathBuf>,
    /// Bytes of stderr kept per execution
    pub stderr_limit: usize,
    /// Live sandbox children allowed at once
    pub process_slots: usize,
    pub network: NetworkIsolation,
    pub rules: Vec<ScanRule>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            // Isolated mode: no user site-packages, no PYTHON* variables
            interpreter_args: vec!["-I".to_string(), "-B".to_string()],
            script_name: "figure.py".to_string(),
            path_env: "/usr/local/bin:/usr/bin:/bin".to_string(),
            timeout_ms: 30_000,
            memory_limit_bytes: 1024 * 1024 * 1024,
            cpu_limit_secs: None,
            max_file_bytes: 32 * 1024 * 1024,
            output_file: "output.png".to_string(),
            scratch_root: None,
            stderr_limit: 64 * 1024,
            process_slots: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
            network: NetworkIsolation::default(),
            rules: DEFAULT_RULES.clone(),
        }
    }
}

impl SandboxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration running scripts with `/bin/sh` and no scan rules
    pub fn for_shell() -> Self {
        Self {
            interpreter: "/bin/sh".to_string(),
            interpreter_args: Vec::new(),
            script_name: "figure.sh".to_string(),
            rules: Vec::new(),
            ..Self::default()
        }
    }

    /// Load from a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_interpreter(
        mut self,
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.interpreter = program.into();
        self.interpreter_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_script_name(mut self, name: impl Into<String>) -> Self {
        self.script_name = name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    pub fn with_cpu_limit_secs(mut self, secs: u64) -> Self {
        self.cpu_limit_secs = Some(secs);
        self
    }

    pub fn with_output_file(mut self, name: impl Into<String>) -> Self {
        self.output_file = name.into();
        self
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn with_process_slots(mut self, slots: usize) -> Self {
        self.process_slots = slots;
        self
    }

    pub fn with_network(mut self, network: NetworkIsolation) -> Self {
        self.network = network;
        self
    }

    pub fn with_rules(mut self, rules: Vec<ScanRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// CPU seconds for a run bounded by `timeout`
    pub fn cpu_limit_for(&self, timeout: Duration) -> u64 {
        self.cpu_limit_secs
            .unwrap_or_else(|| timeout.as_secs().saturating_add(1))
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_overrides_defaults() {
        let config = SandboxConfig::from_json(
            r#"{"timeout_ms": 5000, "network": "disabled", "process_slots": 3}"#,
        )
        .unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.network, NetworkIsolation::Disabled);
        assert_eq!(config.process_slots, 3);
        assert_eq!(config.output_file, "output.png");
        assert_eq!(config.rules.len(), DEFAULT_RULES.len());
    }

    #[test]
    fn test_cpu_limit_derivation() {
        let config = SandboxConfig::default();
        assert_eq!(config.cpu_limit_for(Duration::from_millis(2500)), 3);
        assert_eq!(config.with_cpu_limit_secs(9).cpu_limit_for(Duration::from_secs(1)), 9);
    }
}
