//! Static pre-scan of untrusted source text.

use figura_core::error::{FiguraError, ViolationKind};
use once_cell::sync::Lazy;
use regex::RegexSet;
use serde::{Deserialize, Serialize};

/// A named forbidden pattern
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanRule {
    pub name: String,
    pub pattern: String,
}

impl ScanRule {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
        }
    }
}

/// Modules that reach the host: processes, files, interpreter internals
const HOST_MODULES: &str = "os|sys|subprocess|shutil|socket|ctypes|multiprocessing|threading|signal|pathlib|glob|importlib|pty|pickle|marshal|builtins|io|tempfile|asyncio";

/// Modules that reach the network
const NETWORK_MODULES: &str =
    "urllib|urllib3|http|requests|httpx|aiohttp|ftplib|smtplib|telnetlib|webbrowser";

/// `import a, b as c` and `from a import (b, c)`: the named module may sit
/// anywhere in the list, after line continuations or inside parentheses.
fn import_pattern(modules: &str) -> String {
    format!(
        r"\b(?:import|from)[\s\\(]+(?:[\w.]+(?:\s+as\s+\w+)?[\s\\]*,[\s\\(]*)*(?:{})\b",
        modules
    )
}

/// Rules for model-generated Python plotting code.
pub static DEFAULT_RULES: Lazy<Vec<ScanRule>> = Lazy::new(|| {
    vec![
        // Absolute, home-relative and drive-letter path literals
        ScanRule::new("absolute-path", r#"["'](?:/|~|\\\\|[A-Za-z]:[\\/])"#),
        ScanRule::new("parent-path", r#"["'][^"'\n]*\.\.[\\/]"#),
        ScanRule::new("host-module-import", import_pattern(HOST_MODULES)),
        ScanRule::new("network-module-import", import_pattern(NETWORK_MODULES)),
        ScanRule::new(
            "host-module-access",
            r"\b(?:os|sys|subprocess|shutil|socket|ctypes|pathlib|importlib)\s*\.",
        ),
        ScanRule::new(
            "dynamic-evaluation",
            r"\b(?:eval|exec|compile|__import__|globals|locals|vars|getattr|setattr|delattr|breakpoint|open|input)\s*\(",
        ),
        ScanRule::new(
            "dunder-introspection",
            r"__(?:builtins|class|subclasses|globals|code|dict|bases|mro|loader|spec|getattribute|reduce|reduce_ex)__",
        ),
    ]
});

/// Compiled rule set, checked in a single pass over the source
#[derive(Debug, Clone)]
pub struct StaticScanner {
    set: RegexSet,
    names: Vec<String>,
}

impl StaticScanner {
    /// Compile a rule set
    pub fn new(rules: &[ScanRule]) -> Result<Self, FiguraError> {
        let set = RegexSet::new(rules.iter().map(|r| r.pattern.as_str()))
            .map_err(|e| FiguraError::configuration(format!("invalid scan rule: {}", e)))?;
        Ok(Self {
            set,
            names: rules.iter().map(|r| r.name.clone()).collect(),
        })
    }

    /// Names of every rule the source matches
    pub fn matches(&self, code: &str) -> Vec<&str> {
        self.set
            .matches(code)
            .into_iter()
            .map(|idx| self.names[idx].as_str())
            .collect()
    }

    /// Reject the source if any rule matches
    pub fn check(&self, code: &str) -> Result<(), FiguraError> {
        let hits = self.matches(code);
        if hits.is_empty() {
            Ok(())
        } else {
            Err(FiguraError::sandbox_violation(
                ViolationKind::ForbiddenConstruct,
                format!("source matched forbidden pattern(s): {}", hits.join(", ")),
            ))
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> StaticScanner {
        StaticScanner::new(&DEFAULT_RULES).unwrap()
    }

    #[test]
    fn test_plotting_code_passes() {
        let code = r#"
x = np.linspace(0, 2 * np.pi, 200)
fig, ax = plt.subplots()
ax.plot(x, np.sin(x), label="sin(x)")
ax.set_title("Sine wave")
ax.legend()
plt.savefig("output.png")
"#;
        assert!(scanner().check(code).is_ok());
    }

    #[test]
    fn test_forbidden_constructs() {
        let scanner = scanner();
        let cases = [
            ("import os", "host-module-import"),
            ("from subprocess import run", "host-module-import"),
            ("import matplotlib, subprocess as sp", "host-module-import"),
            ("import numpy as np, os.path", "host-module-import"),
            ("import matplotlib,\\\n    subprocess", "host-module-import"),
            ("from matplotlib import (cm,\n    os)", "host-module-import"),
            ("import json, urllib.request as ur", "network-module-import"),
            ("import requests", "network-module-import"),
            ("data = open('notes.txt')", "dynamic-evaluation"),
            ("eval('1 + 1')", "dynamic-evaluation"),
            ("plt.savefig('/tmp/out.png')", "absolute-path"),
            ("plt.savefig('../out.png')", "parent-path"),
            ("().__class__.__bases__", "dunder-introspection"),
        ];
        for (code, rule) in cases {
            let hits = scanner.matches(code);
            assert!(hits.contains(&rule), "{code:?} should match {rule}, got {hits:?}");
        }
    }

    #[test]
    fn test_aliased_import_list_is_rejected() {
        let code = "import matplotlib, subprocess as sp\nsp.run(['touch', 'pwned'])";
        let err = scanner().check(code).unwrap_err();
        assert_eq!(err.kind(), figura_core::types::FailureKind::SandboxViolation);
    }

    #[test]
    fn test_harmless_import_lists_pass() {
        let scanner = scanner();
        for code in [
            "import numpy as np, matplotlib.pyplot as plt",
            "from matplotlib import cm, colors",
            "import networkx as nx, osmnx",
            "from schemdraw import elements as elm",
        ] {
            assert!(scanner.matches(code).is_empty(), "{code:?} should pass");
        }
    }

    #[test]
    fn test_violation_names_rules() {
        let err = scanner().check("import socket\nexec('x')").unwrap_err();
        match err {
            FiguraError::SandboxViolation { kind, detail } => {
                assert_eq!(kind, ViolationKind::ForbiddenConstruct);
                assert!(detail.contains("host-module-import"));
                assert!(detail.contains("dynamic-evaluation"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_rule_is_configuration_error() {
        let err = StaticScanner::new(&[ScanRule::new("broken", "(")]).unwrap_err();
        assert!(matches!(err, FiguraError::Configuration(_)));
    }
}
