//! Read-only projection of pending work.

use super::error::UpdateError;
use super::host::UpdateServices;
use super::unit::UnitKind;
use serde::Serialize;

/// One line of the pending-work listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingItem {
    /// Owning module, or the entity type for entity definition changes.
    pub module: String,
    /// Update number or post-update name; absent for entity definition changes.
    pub update_id: Option<String>,
    /// What the item does.
    pub description: String,
    /// Item kind.
    #[serde(rename = "type")]
    pub kind: UnitKind,
}

/// Which collaborators to consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusOptions {
    /// Include pending entity definition changes.
    pub entity_updates: bool,
    /// Include pending post-updates.
    pub post_updates: bool,
}

impl Default for StatusOptions {
    fn default() -> Self {
        Self {
            entity_updates: false,
            post_updates: true,
        }
    }
}

/// Lists pending work without executing or persisting anything.
pub struct StatusReporter<'a> {
    services: &'a UpdateServices,
}

impl<'a> StatusReporter<'a> {
    /// Create a reporter over the given services.
    pub fn new(services: &'a UpdateServices) -> Self {
        Self { services }
    }

    /// Pending items: schema updates, then entity changes, then post-updates.
    ///
    /// Modules with nothing pending are omitted. An empty result means
    /// there is nothing to confirm or run.
    pub fn status(&self, options: &StatusOptions) -> Result<Vec<PendingItem>, UpdateError> {
        let catalog = &self.services.catalog;
        let versions = catalog.installed_versions(self.services.versions.as_ref())?;
        let mut items = Vec::new();

        for (module, list) in catalog.update_list(&versions)? {
            for (number, description) in list.pending {
                items.push(PendingItem {
                    module: module.clone(),
                    update_id: Some(number.to_string()),
                    description,
                    kind: UnitKind::SchemaUpdate,
                });
            }
        }

        if options.entity_updates && self.services.entity_schema.needs_updates() {
            for (entity_type, changes) in self.services.entity_schema.change_summary() {
                for change in changes {
                    items.push(PendingItem {
                        module: entity_type.clone(),
                        update_id: None,
                        description: change,
                        kind: UnitKind::EntityDefinitionUpdate,
                    });
                }
            }
        }

        if options.post_updates {
            for info in self.services.post_updates.pending_update_information()? {
                items.push(PendingItem {
                    module: info.id.module,
                    update_id: Some(info.id.name),
                    description: info.description,
                    kind: UnitKind::PostUpdate,
                });
            }
        }

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::catalog::{ModuleUpdates, UpdateCatalog, UpdateDefinition};
    use crate::update::error::{EntityStorageError, UnitFailure};
    use crate::update::host::{EntitySchemaManager, PostUpdateInfo, PostUpdateRegistry};
    use crate::update::unit::{PostUpdateId, Sandbox, StepReport};
    use crate::update::version_store::{MemoryVersionStore, SchemaVersionStore};
    use crate::Error;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn ok(_: &mut Sandbox) -> Result<StepReport, UnitFailure> {
        Ok(StepReport::done())
    }

    struct PendingEntities;

    impl EntitySchemaManager for PendingEntities {
        fn needs_updates(&self) -> bool {
            true
        }

        fn change_summary(&self) -> BTreeMap<String, Vec<String>> {
            BTreeMap::from([(
                "node".to_string(),
                vec!["The Status field needs to be installed.".to_string()],
            )])
        }

        fn apply_updates(&self) -> Result<(), EntityStorageError> {
            Ok(())
        }
    }

    struct OnePostUpdate;

    impl PostUpdateRegistry for OnePostUpdate {
        fn pending_update_information(&self) -> Result<Vec<PostUpdateInfo>, Error> {
            Ok(vec![PostUpdateInfo {
                id: PostUpdateId::new("media", "thumbnails"),
                description: "Regenerate thumbnails".to_string(),
            }])
        }

        fn invoke(&self, _id: &PostUpdateId, _sandbox: &mut Sandbox) -> Result<StepReport, UnitFailure> {
            Ok(StepReport::done())
        }

        fn mark_executed(&self, _id: &PostUpdateId) -> Result<(), Error> {
            Ok(())
        }
    }

    fn services(store: Arc<MemoryVersionStore>) -> UpdateServices {
        let catalog = UpdateCatalog::builder()
            .module(
                ModuleUpdates::new("content")
                    .with_update(UpdateDefinition::new(5, "Add revision table", ok))
                    .with_update(UpdateDefinition::new(6, "Add status column", ok)),
            )
            .module(ModuleUpdates::new("media").with_update(UpdateDefinition::new(2, "Add alt text", ok)))
            .build()
            .unwrap();
        UpdateServices::new(Arc::new(catalog), store)
            .with_entity_schema(Arc::new(PendingEntities))
            .with_post_updates(Arc::new(OnePostUpdate))
    }

    #[test]
    fn test_status_lists_all_kinds_in_phase_order() {
        let store = Arc::new(MemoryVersionStore::with_versions([("content", 4), ("media", 1)]));
        let services = services(store);
        let options = StatusOptions {
            entity_updates: true,
            post_updates: true,
        };

        let items = StatusReporter::new(&services).status(&options).unwrap();
        let kinds: Vec<UnitKind> = items.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                UnitKind::SchemaUpdate,
                UnitKind::SchemaUpdate,
                UnitKind::SchemaUpdate,
                UnitKind::EntityDefinitionUpdate,
                UnitKind::PostUpdate,
            ]
        );
        assert_eq!(items[0].module, "content");
        assert_eq!(items[0].update_id.as_deref(), Some("5"));
        assert_eq!(items[3].module, "node");
        assert_eq!(items[3].update_id, None);
    }

    #[test]
    fn test_status_omits_up_to_date_modules() {
        let store = Arc::new(MemoryVersionStore::with_versions([("content", 6), ("media", 1)]));
        let services = services(store);
        let options = StatusOptions {
            entity_updates: false,
            post_updates: false,
        };

        let items = StatusReporter::new(&services).status(&options).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].module, "media");
    }

    #[test]
    fn test_status_does_not_mutate_versions() {
        let store = Arc::new(MemoryVersionStore::with_versions([("content", 4)]));
        let services = services(store.clone());

        StatusReporter::new(&services)
            .status(&StatusOptions::default())
            .unwrap();
        assert_eq!(store.all().unwrap(), BTreeMap::from([("content".to_string(), 4)]));
    }

    #[test]
    fn test_status_surfaces_catalog_errors() {
        let store = Arc::new(MemoryVersionStore::with_versions([("media", 7)]));
        let services = services(store);
        assert!(matches!(
            StatusReporter::new(&services).status(&StatusOptions::default()),
            Err(UpdateError::Catalog(_))
        ));
    }
}
