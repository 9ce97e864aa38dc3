//! Pre-flight requirement checks.
//!
//! Checks run before planning. Any requirement at [`Severity::Error`] blocks
//! the run with no state mutation; warnings are logged and reported.

use super::error::UpdateError;
use super::host::UpdateServices;
use serde::Serialize;
use std::fmt;

/// Requirement severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational.
    Info,
    /// Worth attention, does not block.
    Warning,
    /// Blocks the run.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Result of one requirement check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Requirement {
    /// Short title.
    pub title: String,
    /// Severity.
    pub severity: Severity,
    /// Details.
    pub description: String,
}

impl Requirement {
    /// Create an informational requirement.
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(title, Severity::Info, description)
    }

    /// Create a warning.
    pub fn warning(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(title, Severity::Warning, description)
    }

    /// Create a blocking requirement.
    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(title, Severity::Error, description)
    }

    fn new(title: impl Into<String>, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            severity,
            description: description.into(),
        }
    }
}

/// A pre-flight check.
pub trait RequirementCheck: Send + Sync {
    /// Evaluate the check against the current services.
    fn check(&self, services: &UpdateServices) -> Vec<Requirement>;
}

impl<F> RequirementCheck for F
where
    F: Fn(&UpdateServices) -> Vec<Requirement> + Send + Sync,
{
    fn check(&self, services: &UpdateServices) -> Vec<Requirement> {
        self(services)
    }
}

/// Requires a module to be at least at a given schema version.
///
/// Useful for gating a release on an intermediate upgrade having been run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleVersionRequirement {
    /// Module name.
    pub module: String,
    /// Minimum installed schema version.
    pub minimum: u32,
}

impl ModuleVersionRequirement {
    /// Create a new module version requirement.
    pub fn new(module: impl Into<String>, minimum: u32) -> Self {
        Self {
            module: module.into(),
            minimum,
        }
    }
}

impl RequirementCheck for ModuleVersionRequirement {
    fn check(&self, services: &UpdateServices) -> Vec<Requirement> {
        let title = format!("{} schema", self.module);
        match services.versions.get(&self.module) {
            Ok(installed) if installed >= self.minimum => Vec::new(),
            Ok(installed) => vec![Requirement::error(
                title,
                format!(
                    "schema version {installed} is below the required {}",
                    self.minimum
                ),
            )],
            Err(e) => vec![Requirement::error(
                title,
                format!("schema version could not be read: {e}"),
            )],
        }
    }
}

/// Collected results of every requirement check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequirementReport {
    /// Every reported requirement, in check order.
    pub requirements: Vec<Requirement>,
}

impl RequirementReport {
    /// Requirements at a given severity.
    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Requirement> {
        self.requirements
            .iter()
            .filter(move |r| r.severity == severity)
    }

    /// Check whether any requirement blocks the run.
    pub fn has_errors(&self) -> bool {
        self.with_severity(Severity::Error).next().is_some()
    }

    /// Convert blocking requirements into an error.
    pub fn into_result(self) -> Result<Self, UpdateError> {
        if !self.has_errors() {
            return Ok(self);
        }
        let failures = self
            .with_severity(Severity::Error)
            .map(|r| format!("{}: {}", r.title, r.description))
            .collect();
        Err(UpdateError::Requirement { failures })
    }
}
