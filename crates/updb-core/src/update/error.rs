//! Update-specific error types.

use super::unit::SchemaUpdateId;
use thiserror::Error;

/// Fatal errors that stop an update operation before (or between) units.
///
/// Failures raised by an individual update body are not represented here;
/// those become [`UnitFailure`] values recorded against the unit.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Version bookkeeping is inconsistent with the registered updates.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Declared dependencies cannot be ordered.
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// A pre-flight requirement failed at error severity.
    #[error("requirements not met: {}", .failures.join("; "))]
    Requirement {
        /// Titles and descriptions of the failing requirements.
        failures: Vec<String>,
    },

    /// The host environment refused an operation the run depends on.
    #[error(transparent)]
    Host(#[from] HostError),

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] crate::error::Error),

    /// Operation not valid in the engine's current state.
    #[error("invalid engine state: {0}")]
    InvalidState(String),
}

/// Inconsistent or corrupt catalog/version bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// Installed version is higher than any update the module knows about.
    #[error("module {module} is at schema version {installed}, but its highest known update is {highest}")]
    VersionAhead {
        /// Module name.
        module: String,
        /// Installed schema version.
        installed: u32,
        /// Highest registered or removed update number.
        highest: u32,
    },

    /// Installed version predates updates that no longer exist.
    #[error("module {module} is at schema version {installed}, but updates up to {last_removed} have been removed; upgrade through an intermediate release first")]
    RemovedUpdateRequired {
        /// Module name.
        module: String,
        /// Installed schema version.
        installed: u32,
        /// Last removed update number.
        last_removed: u32,
    },

    /// Module registered twice.
    #[error("module {module} is registered more than once")]
    DuplicateModule {
        /// Module name.
        module: String,
    },

    /// Same update registered twice.
    #[error("update {unit} is registered more than once")]
    DuplicateUpdate {
        /// Update identifier.
        unit: String,
    },

    /// Update numbers start at 1; 0 means "nothing applied".
    #[error("module {module} registers update number 0")]
    InvalidUpdateNumber {
        /// Module name.
        module: String,
    },

    /// A pending update depends on an update that is neither registered nor applied.
    #[error("update {unit} depends on {dependency}, which is not registered and has not been applied")]
    MissingDependency {
        /// The dependent update.
        unit: SchemaUpdateId,
        /// The missing dependency.
        dependency: SchemaUpdateId,
    },
}

/// The dependency graph between pending updates contains a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle among pending updates: {}", format_units(.units))]
pub struct CycleError {
    /// Updates that could not be ordered, sorted by (module, number).
    pub units: Vec<SchemaUpdateId>,
}

fn format_units(units: &[SchemaUpdateId]) -> String {
    units
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure raised by a single update unit's body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct UnitFailure {
    /// Human-readable failure message.
    pub message: String,
}

impl UnitFailure {
    /// Create a new unit failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for UnitFailure {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for UnitFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Failure applying entity/field definition changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("entity storage error: {message}")]
pub struct EntityStorageError {
    /// Error message.
    pub message: String,
}

impl EntityStorageError {
    /// Create a new entity storage error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure reported by the host environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("host operation failed: {0}")]
pub struct HostError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_error_display() {
        let err = CatalogError::VersionAhead {
            module: "content".to_string(),
            installed: 9,
            highest: 6,
        };
        let text = err.to_string();
        assert!(text.contains("content"));
        assert!(text.contains('9'));
        assert!(text.contains('6'));
    }

    #[test]
    fn test_cycle_error_lists_units() {
        let err = CycleError {
            units: vec![
                SchemaUpdateId::new("a", 1),
                SchemaUpdateId::new("b", 1),
            ],
        };
        assert_eq!(
            err.to_string(),
            "dependency cycle among pending updates: a_update_1, b_update_1"
        );
    }

    #[test]
    fn test_requirement_error_joins_failures() {
        let err = UpdateError::Requirement {
            failures: vec!["disk: full".to_string(), "php: too old".to_string()],
        };
        assert_eq!(err.to_string(), "requirements not met: disk: full; php: too old");
    }

    #[test]
    fn test_unit_failure_conversions() {
        assert_eq!(UnitFailure::from("boom").message, "boom");
        assert_eq!(UnitFailure::from("boom".to_string()).to_string(), "boom");
    }
}
