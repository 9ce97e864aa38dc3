//! Module schema update orchestration.
//!
//! Each module owns a numbered sequence of schema updates. This module
//! finds the pending ones, orders them, and runs them exactly once:
//! - Catalog of registered updates per module
//! - Dependency resolution into a deterministic execution plan
//! - Resumable, step-driven batch execution with abort propagation
//! - Per-module schema version bookkeeping
//! - Entity definition updates and post-updates as later phases
//!
//! # Phases
//!
//! | Phase | Unit kind | Ordering |
//! |-------|-----------|----------|
//! | 1 | `hook_update_n` | Dependency order, ties by (module, number) |
//! | 2 | `entity-update` | One unit, after every schema update was attempted |
//! | 3 | `post-update` | Registration order, after entity definitions |
//!
//! # Example
//!
//! ```ignore
//! use updb_core::update::{ModuleUpdates, UpdateCatalog, UpdateDefinition, UpdateServices, Updater};
//!
//! let catalog = UpdateCatalog::builder()
//!     .module(ModuleUpdates::new("content").with_update(UpdateDefinition::new(
//!         1,
//!         "Add revision table",
//!         |_: &mut Sandbox| Ok(StepReport::done()),
//!     )))
//!     .build()?;
//!
//! let updater = Updater::new(UpdateServices::new(Arc::new(catalog), versions));
//! for item in updater.status()? {
//!     println!("{} {:?} {}", item.module, item.update_id, item.description);
//! }
//! let summary = updater.run()?;
//! std::process::exit(summary.exit_code());
//! ```

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod orchestrator;
pub mod post_update;
pub mod requirements;
pub mod resolver;
pub mod status;
pub mod unit;
pub mod version_store;

// Catalog and planning
pub use catalog::{CatalogBuilder, ModuleUpdateList, ModuleUpdates, UpdateCatalog, UpdateDefinition};
pub use resolver::{DependencyResolver, ExecutionPlan, PlanOptions, PlannedUnit};
pub use unit::{PostUpdateId, Sandbox, SchemaUpdateId, StepReport, UnitId, UnitKind, UpdateBody};

// Execution
pub use config::UpdateOptions;
pub use engine::{
    BatchEngine, EngineState, RunOutcome, RunSummary, StepEvent, UnitOutcome, UnitReport,
    UnitResult,
};
pub use orchestrator::Updater;

// Collaborators and persistence
pub use host::{
    EntitySchemaManager, HostEnvironment, NoEntityChanges, NoPostUpdates, NoopHost,
    PostUpdateInfo, PostUpdateRegistry, UpdateServices,
};
pub use post_update::{ExecutedRecord, SledPostUpdateRegistry};
pub use version_store::{MemoryVersionStore, SchemaVersionStore, SledVersionStore};

// Reporting
pub use requirements::{
    ModuleVersionRequirement, Requirement, RequirementCheck, RequirementReport, Severity,
};
pub use status::{PendingItem, StatusOptions, StatusReporter};

// Error types
pub use error::{CatalogError, CycleError, EntityStorageError, HostError, UnitFailure, UpdateError};
