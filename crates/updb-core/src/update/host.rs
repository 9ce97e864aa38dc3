//! Collaborators the update engine drives but does not own.
//!
//! The entity schema manager reconciles entity/field definitions, the
//! post-update registry tracks one-shot data updates, and the host
//! environment owns maintenance mode, caches, and the service container.

use super::catalog::UpdateCatalog;
use super::error::{EntityStorageError, HostError, UnitFailure};
use super::unit::{PostUpdateId, Sandbox, StepReport};
use super::version_store::SchemaVersionStore;
use crate::error::Error;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reconciles installed entity/field definitions with their code definitions.
pub trait EntitySchemaManager: Send + Sync {
    /// Check whether installed definitions differ from code.
    fn needs_updates(&self) -> bool;

    /// Human-readable changes per entity type.
    fn change_summary(&self) -> BTreeMap<String, Vec<String>>;

    /// Apply every outstanding definition change.
    fn apply_updates(&self) -> Result<(), EntityStorageError>;
}

/// Entity schema manager for hosts without entity definitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEntityChanges;

impl EntitySchemaManager for NoEntityChanges {
    fn needs_updates(&self) -> bool {
        false
    }

    fn change_summary(&self) -> BTreeMap<String, Vec<String>> {
        BTreeMap::new()
    }

    fn apply_updates(&self) -> Result<(), EntityStorageError> {
        Ok(())
    }
}

/// A pending post-update and its description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostUpdateInfo {
    /// Post-update identifier.
    pub id: PostUpdateId,
    /// Description shown in status listings.
    pub description: String,
}

/// Registry of post-updates and their executed flags.
pub trait PostUpdateRegistry: Send + Sync {
    /// Pending post-updates with descriptions.
    ///
    /// Modules appear in registration order; within a module, post-updates
    /// appear in declaration order. One module's post-updates are never
    /// split around another's.
    fn pending_update_information(&self) -> Result<Vec<PostUpdateInfo>, Error>;

    /// Pending post-update identifiers, in execution order.
    fn pending_update_functions(&self) -> Result<Vec<PostUpdateId>, Error> {
        Ok(self
            .pending_update_information()?
            .into_iter()
            .map(|info| info.id)
            .collect())
    }

    /// Pending post-updates grouped by module, in execution order.
    fn pending_by_module(&self) -> Result<Vec<(String, Vec<PostUpdateInfo>)>, Error> {
        let mut groups: Vec<(String, Vec<PostUpdateInfo>)> = Vec::new();
        for info in self.pending_update_information()? {
            match groups.iter_mut().find(|(module, _)| *module == info.id.module) {
                Some((_, infos)) => infos.push(info),
                None => groups.push((info.id.module.clone(), vec![info])),
            }
        }
        Ok(groups)
    }

    /// Run one step of a post-update.
    fn invoke(&self, id: &PostUpdateId, sandbox: &mut Sandbox) -> Result<StepReport, UnitFailure>;

    /// Record that a post-update has completed.
    fn mark_executed(&self, id: &PostUpdateId) -> Result<(), Error>;
}

/// Post-update registry with nothing registered.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPostUpdates;

impl PostUpdateRegistry for NoPostUpdates {
    fn pending_update_information(&self) -> Result<Vec<PostUpdateInfo>, Error> {
        Ok(Vec::new())
    }

    fn invoke(&self, id: &PostUpdateId, _sandbox: &mut Sandbox) -> Result<StepReport, UnitFailure> {
        Err(UnitFailure::new(format!("post-update {id} is not registered")))
    }

    fn mark_executed(&self, _id: &PostUpdateId) -> Result<(), Error> {
        Ok(())
    }
}

/// Host-level operations around a run.
pub trait HostEnvironment: Send + Sync {
    /// Turn maintenance mode on or off.
    fn set_maintenance_mode(&self, enabled: bool) -> Result<(), HostError>;

    /// Whether maintenance mode is currently on.
    fn maintenance_mode(&self) -> bool;

    /// Flush every cache.
    fn flush_all_caches(&self) -> Result<(), HostError>;

    /// Rebuild the service container.
    fn rebuild_service_container(&self) -> Result<(), HostError>;
}

/// Host environment that accepts every operation and does nothing.
#[derive(Debug, Default)]
pub struct NoopHost {
    maintenance: parking_lot::Mutex<bool>,
}

impl HostEnvironment for NoopHost {
    fn set_maintenance_mode(&self, enabled: bool) -> Result<(), HostError> {
        *self.maintenance.lock() = enabled;
        Ok(())
    }

    fn maintenance_mode(&self) -> bool {
        *self.maintenance.lock()
    }

    fn flush_all_caches(&self) -> Result<(), HostError> {
        Ok(())
    }

    fn rebuild_service_container(&self) -> Result<(), HostError> {
        Ok(())
    }
}

/// Everything the engine needs to run a plan.
#[derive(Clone)]
pub struct UpdateServices {
    /// Registered schema updates.
    pub catalog: Arc<UpdateCatalog>,
    /// Installed schema versions.
    pub versions: Arc<dyn SchemaVersionStore>,
    /// Entity definition reconciliation.
    pub entity_schema: Arc<dyn EntitySchemaManager>,
    /// Post-update registry.
    pub post_updates: Arc<dyn PostUpdateRegistry>,
    /// Host environment.
    pub host: Arc<dyn HostEnvironment>,
}

impl UpdateServices {
    /// Create services with no entity changes, no post-updates, and a no-op host.
    pub fn new(catalog: Arc<UpdateCatalog>, versions: Arc<dyn SchemaVersionStore>) -> Self {
        Self {
            catalog,
            versions,
            entity_schema: Arc::new(NoEntityChanges),
            post_updates: Arc::new(NoPostUpdates),
            host: Arc::new(NoopHost::default()),
        }
    }

    /// Set the entity schema manager.
    pub fn with_entity_schema(mut self, entity_schema: Arc<dyn EntitySchemaManager>) -> Self {
        self.entity_schema = entity_schema;
        self
    }

    /// Set the post-update registry.
    pub fn with_post_updates(mut self, post_updates: Arc<dyn PostUpdateRegistry>) -> Self {
        self.post_updates = post_updates;
        self
    }

    /// Set the host environment.
    pub fn with_host(mut self, host: Arc<dyn HostEnvironment>) -> Self {
        self.host = host;
        self
    }
}
