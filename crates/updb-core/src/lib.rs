//! updb core - module schema update orchestration.
//!
//! This crate provides the catalog of versioned update procedures, the
//! dependency resolver that orders them, and the resumable batch engine
//! that runs them while keeping per-module schema versions consistent.

pub mod error;
pub mod update;

pub use error::Error;
pub use update::{
    BatchEngine, CatalogError, CycleError, DependencyResolver, EngineState, EntitySchemaManager,
    EntityStorageError, ExecutionPlan, HostEnvironment, HostError, MemoryVersionStore,
    ModuleUpdates, ModuleVersionRequirement, PendingItem, PostUpdateId, PostUpdateInfo,
    PostUpdateRegistry, Requirement, RequirementCheck, RunOutcome, RunSummary, Sandbox,
    SchemaUpdateId, SchemaVersionStore, Severity, SledPostUpdateRegistry, SledVersionStore,
    StatusOptions, StatusReporter, StepEvent, StepReport, UnitFailure, UnitId, UnitKind,
    UnitOutcome, UnitReport, UnitResult, UpdateBody, UpdateCatalog, UpdateDefinition,
    UpdateError, UpdateOptions, UpdateServices, Updater,
};
