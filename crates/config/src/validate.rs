//! Semantic checks run on a loaded [`BrokerConfig`] before startup.

use crate::schema::BrokerConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => f.write_str("error"),
            Self::Warning => f.write_str("warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "probe.multiplier"
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.path, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    fn push(&mut self, severity: Severity, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.to_string(),
            message: message.into(),
        });
    }
}

pub fn validate(cfg: &BrokerConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if cfg.sync.interval_secs == 0 {
        result.push(Severity::Error, "sync.interval_secs", "must be greater than zero");
    }
    if !(cfg.probe.multiplier >= 1.0) {
        result.push(Severity::Error, "probe.multiplier", "must be at least 1.0");
    }
    if cfg.probe.initial_interval_ms == 0 {
        result.push(Severity::Error, "probe.initial_interval_ms", "must be greater than zero");
    }
    if cfg.probe.max_elapsed_ms == 0 {
        result.push(
            Severity::Warning,
            "probe.max_elapsed_ms",
            "zero retries unreachable plugins forever and can stall discovery",
        );
    }

    if !cfg.docker.enabled && !cfg.csi.enabled {
        result.push(Severity::Error, "docker.enabled", "no plugin family is enabled");
    }
    if cfg.docker.enabled && cfg.docker.spec_paths.is_empty() {
        result.push(Severity::Error, "docker.spec_paths", "must list at least one directory");
    }
    if cfg.csi.enabled {
        if cfg.csi.spec_paths.is_empty() {
            result.push(Severity::Error, "csi.spec_paths", "must list at least one directory");
        }
        let parts: Vec<&str> = cfg.csi.required_version.split('.').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.parse::<u32>().is_err()) {
            result.push(
                Severity::Error,
                "csi.required_version",
                format!("'{}' is not major.minor.patch", cfg.csi.required_version),
            );
        }
    }

    result
}
