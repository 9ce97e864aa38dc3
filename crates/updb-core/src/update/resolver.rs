//! Dependency resolution.
//!
//! Turns the catalog's pending updates into a deterministic execution plan:
//! schema updates in dependency order, then the entity definition update,
//! then post-updates.

use super::catalog::UpdateCatalog;
use super::error::{CatalogError, CycleError, UpdateError};
use super::unit::{PostUpdateId, SchemaUpdateId, UnitId, UnitKind};
use std::collections::{BTreeMap, BTreeSet};

/// One unit of an execution plan together with its direct dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUnit {
    /// The unit.
    pub id: UnitId,
    /// Units that must succeed before this one runs.
    pub dependencies: Vec<UnitId>,
}

/// Ordered, duplicate-free sequence of units to execute.
///
/// Every unit appears after all of its dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    units: Vec<PlannedUnit>,
}

impl ExecutionPlan {
    /// Plan containing only the entity definition update.
    pub fn entity_definitions_only() -> Self {
        Self {
            units: vec![PlannedUnit {
                id: UnitId::EntityDefinitions,
                dependencies: Vec::new(),
            }],
        }
    }

    /// Units in execution order.
    pub fn units(&self) -> &[PlannedUnit] {
        &self.units
    }

    /// Unit identifiers in execution order.
    pub fn ids(&self) -> impl Iterator<Item = &UnitId> {
        self.units.iter().map(|u| &u.id)
    }

    /// Number of units.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Check if the plan is empty (nothing pending).
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Position of a unit in the plan.
    pub fn position(&self, id: &UnitId) -> Option<usize> {
        self.units.iter().position(|u| &u.id == id)
    }

    /// Number of units of a given kind.
    pub fn count_of(&self, kind: UnitKind) -> usize {
        self.units.iter().filter(|u| u.id.kind() == kind).count()
    }
}

/// What to plan beyond the pending schema updates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Append the entity definition update unit.
    pub entity_updates: bool,
    /// Pending post-updates, in registration order.
    pub post_updates: Vec<PostUpdateId>,
}

/// Builds execution plans from the catalog.
///
/// Pure with respect to run state: resolving twice with the same inputs
/// yields the same plan.
pub struct DependencyResolver<'a> {
    catalog: &'a UpdateCatalog,
}

impl<'a> DependencyResolver<'a> {
    /// Create a resolver over a catalog.
    pub fn new(catalog: &'a UpdateCatalog) -> Self {
        Self { catalog }
    }

    /// Plan the pending schema updates only.
    pub fn resolve(&self, versions: &BTreeMap<String, u32>) -> Result<ExecutionPlan, UpdateError> {
        self.resolve_with(versions, &PlanOptions::default())
    }

    /// Plan pending schema updates, then the extra phases in `options`.
    pub fn resolve_with(
        &self,
        versions: &BTreeMap<String, u32>,
        options: &PlanOptions,
    ) -> Result<ExecutionPlan, UpdateError> {
        let graph = self.build_graph(versions)?;
        let mut units = graph.topological_order()?;

        if options.entity_updates {
            units.push(PlannedUnit {
                id: UnitId::EntityDefinitions,
                dependencies: Vec::new(),
            });
        }

        let mut seen = BTreeSet::new();
        for id in &options.post_updates {
            if seen.insert(id) {
                units.push(PlannedUnit {
                    id: UnitId::Post(id.clone()),
                    dependencies: Vec::new(),
                });
            }
        }

        Ok(ExecutionPlan { units })
    }

    fn build_graph(&self, versions: &BTreeMap<String, u32>) -> Result<UpdateGraph, UpdateError> {
        let pending = self.catalog.list_pending(versions)?;
        let mut graph = UpdateGraph::default();

        for ids in pending.values() {
            for id in ids {
                graph.add_node(id.clone());
            }
            // Same-module updates run in ascending order.
            for pair in ids.windows(2) {
                graph.add_edge(&pair[1], &pair[0]);
            }
        }

        for ids in pending.values() {
            for id in ids {
                let Some(definition) = self.catalog.definition(id) else {
                    continue;
                };
                for dependency in &definition.dependencies {
                    let applied = versions.get(&dependency.module).copied().unwrap_or(0);
                    if dependency.number <= applied {
                        continue;
                    }
                    if !graph.contains(dependency) {
                        return Err(CatalogError::MissingDependency {
                            unit: id.clone(),
                            dependency: dependency.clone(),
                        }
                        .into());
                    }
                    graph.add_edge(id, dependency);
                }
            }
        }

        Ok(graph)
    }
}

/// Directed graph of pending schema updates; edges point at dependencies.
#[derive(Debug, Default)]
struct UpdateGraph {
    dependencies: BTreeMap<SchemaUpdateId, BTreeSet<SchemaUpdateId>>,
    dependents: BTreeMap<SchemaUpdateId, BTreeSet<SchemaUpdateId>>,
}

impl UpdateGraph {
    fn add_node(&mut self, id: SchemaUpdateId) {
        self.dependents.entry(id.clone()).or_default();
        self.dependencies.entry(id).or_default();
    }

    fn contains(&self, id: &SchemaUpdateId) -> bool {
        self.dependencies.contains_key(id)
    }

    fn add_edge(&mut self, from: &SchemaUpdateId, to: &SchemaUpdateId) {
        if let Some(deps) = self.dependencies.get_mut(from) {
            deps.insert(to.clone());
        }
        if let Some(dependents) = self.dependents.get_mut(to) {
            dependents.insert(from.clone());
        }
    }

    /// Kahn's algorithm, always taking the smallest `(module, number)` that is ready.
    fn topological_order(&self) -> Result<Vec<PlannedUnit>, CycleError> {
        let mut in_degree: BTreeMap<&SchemaUpdateId, usize> = self
            .dependencies
            .iter()
            .map(|(id, deps)| (id, deps.len()))
            .collect();

        let mut ready: BTreeSet<&SchemaUpdateId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(self.dependencies.len());
        while let Some(id) = ready.pop_first() {
            order.push(PlannedUnit {
                id: UnitId::Schema(id.clone()),
                dependencies: self.dependencies[id]
                    .iter()
                    .cloned()
                    .map(UnitId::Schema)
                    .collect(),
            });

            for dependent in &self.dependents[id] {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() < self.dependencies.len() {
            let units = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(id, _)| id.clone())
                .collect();
            return Err(CycleError { units });
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::catalog::{ModuleUpdates, UpdateDefinition};
    use crate::update::error::UnitFailure;
    use crate::update::unit::{Sandbox, StepReport};

    fn noop(_: &mut Sandbox) -> Result<StepReport, UnitFailure> {
        Ok(StepReport::done())
    }

    fn update(number: u32) -> UpdateDefinition {
        UpdateDefinition::new(number, format!("update {number}"), noop)
    }

    fn versions(pairs: &[(&str, u32)]) -> BTreeMap<String, u32> {
        pairs.iter().map(|(m, v)| (m.to_string(), *v)).collect()
    }

    fn schema_ids(plan: &ExecutionPlan) -> Vec<String> {
        plan.ids().map(ToString::to_string).collect()
    }

    fn assert_topologically_valid(plan: &ExecutionPlan) {
        for (idx, unit) in plan.units().iter().enumerate() {
            for dep in &unit.dependencies {
                let dep_idx = plan.position(dep).expect("dependency missing from plan");
                assert!(dep_idx < idx, "{} runs before its dependency {}", unit.id, dep);
            }
        }
    }

    #[test]
    fn test_independent_modules_ordered_by_name_then_number() {
        let catalog = UpdateCatalog::builder()
            .module(ModuleUpdates::new("media").with_update(update(2)))
            .module(ModuleUpdates::new("content").with_update(update(5)).with_update(update(6)))
            .build()
            .unwrap();

        let plan = DependencyResolver::new(&catalog)
            .resolve(&versions(&[("content", 4), ("media", 1)]))
            .unwrap();

        assert_eq!(
            schema_ids(&plan),
            vec!["content_update_5", "content_update_6", "media_update_2"]
        );
        assert_topologically_valid(&plan);
    }

    #[test]
    fn test_same_module_edges() {
        let catalog = UpdateCatalog::builder()
            .module(ModuleUpdates::new("content").with_update(update(5)).with_update(update(6)))
            .build()
            .unwrap();

        let plan = DependencyResolver::new(&catalog).resolve(&BTreeMap::new()).unwrap();
        assert_eq!(plan.units()[0].dependencies, Vec::<UnitId>::new());
        assert_eq!(plan.units()[1].dependencies, vec![UnitId::schema("content", 5)]);
    }

    #[test]
    fn test_cross_module_dependency_reorders() {
        // content 2 needs media 1, which would otherwise sort after it.
        let catalog = UpdateCatalog::builder()
            .module(
                ModuleUpdates::new("content")
                    .with_update(update(1))
                    .with_update(update(2).depends_on("media", 1)),
            )
            .module(ModuleUpdates::new("media").with_update(update(1)))
            .build()
            .unwrap();

        let plan = DependencyResolver::new(&catalog).resolve(&BTreeMap::new()).unwrap();

        assert_eq!(
            schema_ids(&plan),
            vec!["content_update_1", "media_update_1", "content_update_2"]
        );
        assert!(plan.units()[2]
            .dependencies
            .contains(&UnitId::schema("media", 1)));
        assert_topologically_valid(&plan);
    }

    #[test]
    fn test_dependency_on_applied_update_is_dropped() {
        let catalog = UpdateCatalog::builder()
            .module(ModuleUpdates::new("content").with_update(update(2).depends_on("media", 1)))
            .module(ModuleUpdates::new("media").with_update(update(1)))
            .build()
            .unwrap();

        let plan = DependencyResolver::new(&catalog)
            .resolve(&versions(&[("media", 1)]))
            .unwrap();

        assert_eq!(schema_ids(&plan), vec!["content_update_2"]);
        assert!(plan.units()[0].dependencies.is_empty());
    }

    #[test]
    fn test_missing_dependency() {
        let catalog = UpdateCatalog::builder()
            .module(ModuleUpdates::new("content").with_update(update(2).depends_on("files", 3)))
            .build()
            .unwrap();

        let result = DependencyResolver::new(&catalog).resolve(&BTreeMap::new());
        assert!(matches!(
            result,
            Err(UpdateError::Catalog(CatalogError::MissingDependency { .. }))
        ));
    }

    #[test]
    fn test_cycle_detected() {
        // a1 -> b1 -> c1 -> a1
        let catalog = UpdateCatalog::builder()
            .module(ModuleUpdates::new("a").with_update(update(1).depends_on("c", 1)))
            .module(ModuleUpdates::new("b").with_update(update(1).depends_on("a", 1)))
            .module(ModuleUpdates::new("c").with_update(update(1).depends_on("b", 1)))
            .build()
            .unwrap();

        let result = DependencyResolver::new(&catalog).resolve(&BTreeMap::new());
        match result {
            Err(UpdateError::Cycle(err)) => {
                assert_eq!(
                    err.units,
                    vec![
                        SchemaUpdateId::new("a", 1),
                        SchemaUpdateId::new("b", 1),
                        SchemaUpdateId::new("c", 1),
                    ]
                );
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_catalog_error_surfaces() {
        let catalog = UpdateCatalog::builder()
            .module(ModuleUpdates::new("content").with_update(update(1)))
            .build()
            .unwrap();

        let result = DependencyResolver::new(&catalog).resolve(&versions(&[("content", 3)]));
        assert!(matches!(
            result,
            Err(UpdateError::Catalog(CatalogError::VersionAhead { .. }))
        ));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let catalog = UpdateCatalog::builder()
            .module(ModuleUpdates::new("views").with_update(update(1)).with_update(update(2)))
            .module(
                ModuleUpdates::new("content")
                    .with_update(update(1).depends_on("views", 2))
                    .with_update(update(2)),
            )
            .module(ModuleUpdates::new("media").with_update(update(1).depends_on("content", 2)))
            .build()
            .unwrap();

        let resolver = DependencyResolver::new(&catalog);
        let first = resolver.resolve(&BTreeMap::new()).unwrap();
        let second = resolver.resolve(&BTreeMap::new()).unwrap();

        assert_eq!(first, second);
        assert_topologically_valid(&first);
        assert_eq!(
            schema_ids(&first),
            vec![
                "views_update_1",
                "views_update_2",
                "content_update_1",
                "content_update_2",
                "media_update_1",
            ]
        );
    }

    #[test]
    fn test_entity_and_post_updates_appended_in_order() {
        let catalog = UpdateCatalog::builder()
            .module(ModuleUpdates::new("content").with_update(update(1)))
            .build()
            .unwrap();

        let options = PlanOptions {
            entity_updates: true,
            post_updates: vec![
                PostUpdateId::new("media", "thumbnails"),
                PostUpdateId::new("content", "reindex"),
                PostUpdateId::new("media", "thumbnails"),
            ],
        };
        let plan = DependencyResolver::new(&catalog)
            .resolve_with(&BTreeMap::new(), &options)
            .unwrap();

        assert_eq!(
            schema_ids(&plan),
            vec![
                "content_update_1",
                "entity definitions",
                "media_post_update_thumbnails",
                "content_post_update_reindex",
            ]
        );
        assert_eq!(plan.count_of(UnitKind::PostUpdate), 2);
        assert!(plan.units()[1].dependencies.is_empty());
    }

    #[test]
    fn test_nothing_pending_gives_empty_plan() {
        let catalog = UpdateCatalog::builder()
            .module(ModuleUpdates::new("content").with_update(update(1)))
            .build()
            .unwrap();

        let plan = DependencyResolver::new(&catalog)
            .resolve(&versions(&[("content", 1)]))
            .unwrap();
        assert!(plan.is_empty());
    }
}
