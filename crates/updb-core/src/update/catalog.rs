//! Update catalog: the registry of schema updates per module.
//!
//! Modules register their numbered updates up front, each with a
//! description, optional cross-module dependencies and an executable body.
//! The catalog answers which updates are pending for a given set of
//! installed schema versions.

use super::error::{CatalogError, UpdateError};
use super::unit::{SchemaUpdateId, UpdateBody};
use super::version_store::SchemaVersionStore;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// A single registered schema update.
#[derive(Clone)]
pub struct UpdateDefinition {
    /// Update number, unique within its module.
    pub number: u32,
    /// Human-readable description.
    pub description: String,
    /// Updates of other modules that must be applied first.
    pub dependencies: Vec<SchemaUpdateId>,
    body: Arc<dyn UpdateBody>,
}

impl UpdateDefinition {
    /// Create a new update definition.
    pub fn new(number: u32, description: impl Into<String>, body: impl UpdateBody + 'static) -> Self {
        Self {
            number,
            description: description.into(),
            dependencies: Vec::new(),
            body: Arc::new(body),
        }
    }

    /// Declare that this update requires another module's update.
    pub fn depends_on(mut self, module: impl Into<String>, number: u32) -> Self {
        self.dependencies.push(SchemaUpdateId::new(module, number));
        self
    }

    /// The executable body.
    pub fn body(&self) -> &Arc<dyn UpdateBody> {
        &self.body
    }
}

impl fmt::Debug for UpdateDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateDefinition")
            .field("number", &self.number)
            .field("description", &self.description)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// All schema updates owned by one module.
#[derive(Debug, Clone)]
pub struct ModuleUpdates {
    name: String,
    last_removed: Option<u32>,
    updates: Vec<UpdateDefinition>,
}

impl ModuleUpdates {
    /// Start registering updates for a module.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_removed: None,
            updates: Vec::new(),
        }
    }

    /// Register an update.
    pub fn with_update(mut self, update: UpdateDefinition) -> Self {
        self.updates.push(update);
        self
    }

    /// Declare that updates up to `number` were removed from code.
    pub fn with_last_removed(mut self, number: u32) -> Self {
        self.last_removed = Some(number);
        self
    }

    /// Module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last removed update number, if any.
    pub fn last_removed(&self) -> Option<u32> {
        self.last_removed
    }

    /// Registered updates in ascending number order.
    pub fn updates(&self) -> &[UpdateDefinition] {
        &self.updates
    }

    /// Highest number this module knows about, registered or removed.
    pub fn highest_known(&self) -> u32 {
        let registered = self.updates.last().map(|u| u.number).unwrap_or(0);
        registered.max(self.last_removed.unwrap_or(0))
    }

    /// Updates strictly above the installed version.
    ///
    /// Fails if the installed version cannot be reconciled with the
    /// registered updates; such an install is never silently clamped.
    pub fn pending(&self, installed: u32) -> Result<Vec<&UpdateDefinition>, CatalogError> {
        let highest = self.highest_known();
        if installed > highest {
            return Err(CatalogError::VersionAhead {
                module: self.name.clone(),
                installed,
                highest,
            });
        }

        if let Some(last_removed) = self.last_removed {
            if installed != 0 && installed < last_removed {
                return Err(CatalogError::RemovedUpdateRequired {
                    module: self.name.clone(),
                    installed,
                    last_removed,
                });
            }
        }

        Ok(self
            .updates
            .iter()
            .filter(|u| u.number > installed)
            .collect())
    }
}

/// Pending updates of one module, as listed for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleUpdateList {
    /// First pending update number.
    pub start: u32,
    /// Pending update numbers and their descriptions.
    pub pending: BTreeMap<u32, String>,
}

/// Registry of schema updates for every module.
#[derive(Debug, Clone, Default)]
pub struct UpdateCatalog {
    modules: Vec<ModuleUpdates>,
    index: HashMap<String, usize>,
}

impl UpdateCatalog {
    /// Start building a catalog.
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// Modules in registration order.
    pub fn modules(&self) -> &[ModuleUpdates] {
        &self.modules
    }

    /// Look up a module.
    pub fn module(&self, name: &str) -> Option<&ModuleUpdates> {
        self.index.get(name).map(|&idx| &self.modules[idx])
    }

    /// Look up a registered update.
    pub fn definition(&self, id: &SchemaUpdateId) -> Option<&UpdateDefinition> {
        let module = self.module(&id.module)?;
        module
            .updates
            .binary_search_by_key(&id.number, |u| u.number)
            .ok()
            .map(|idx| &module.updates[idx])
    }

    /// Installed versions of every registered module.
    pub fn installed_versions(
        &self,
        store: &dyn SchemaVersionStore,
    ) -> Result<BTreeMap<String, u32>, UpdateError> {
        let mut versions = BTreeMap::new();
        for module in &self.modules {
            versions.insert(module.name.clone(), store.get(&module.name)?);
        }
        Ok(versions)
    }

    /// Pending schema updates per module.
    ///
    /// Modules with nothing pending are omitted. Modules missing from
    /// `versions` are treated as being at version 0.
    pub fn list_pending(
        &self,
        versions: &BTreeMap<String, u32>,
    ) -> Result<BTreeMap<String, Vec<SchemaUpdateId>>, CatalogError> {
        let mut pending = BTreeMap::new();
        for module in &self.modules {
            let installed = versions.get(&module.name).copied().unwrap_or(0);
            let ids: Vec<SchemaUpdateId> = module
                .pending(installed)?
                .into_iter()
                .map(|u| SchemaUpdateId::new(module.name.clone(), u.number))
                .collect();
            if !ids.is_empty() {
                pending.insert(module.name.clone(), ids);
            }
        }
        Ok(pending)
    }

    /// Pending updates per module with their descriptions.
    pub fn update_list(
        &self,
        versions: &BTreeMap<String, u32>,
    ) -> Result<BTreeMap<String, ModuleUpdateList>, CatalogError> {
        let mut list = BTreeMap::new();
        for module in &self.modules {
            let installed = versions.get(&module.name).copied().unwrap_or(0);
            let pending: BTreeMap<u32, String> = module
                .pending(installed)?
                .into_iter()
                .map(|u| (u.number, u.description.clone()))
                .collect();
            if let Some(&start) = pending.keys().next() {
                list.insert(module.name.clone(), ModuleUpdateList { start, pending });
            }
        }
        Ok(list)
    }
}

/// Builder that validates module registrations.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    modules: Vec<ModuleUpdates>,
}

impl CatalogBuilder {
    /// Register a module.
    pub fn module(mut self, module: ModuleUpdates) -> Self {
        self.modules.push(module);
        self
    }

    /// Validate and build the catalog.
    pub fn build(self) -> Result<UpdateCatalog, CatalogError> {
        let mut modules = Vec::with_capacity(self.modules.len());
        let mut index = HashMap::new();

        for mut module in self.modules {
            if index.contains_key(&module.name) {
                return Err(CatalogError::DuplicateModule {
                    module: module.name,
                });
            }

            module.updates.sort_by_key(|u| u.number);
            if module.updates.first().is_some_and(|u| u.number == 0) {
                return Err(CatalogError::InvalidUpdateNumber {
                    module: module.name,
                });
            }
            if let Some(pair) = module
                .updates
                .windows(2)
                .find(|pair| pair[0].number == pair[1].number)
            {
                return Err(CatalogError::DuplicateUpdate {
                    unit: SchemaUpdateId::new(module.name.clone(), pair[0].number).to_string(),
                });
            }

            index.insert(module.name.clone(), modules.len());
            modules.push(module);
        }

        Ok(UpdateCatalog { modules, index })
    }
}
