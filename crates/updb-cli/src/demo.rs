//! Demo application with a small set of modules over a sled data directory.
//!
//! Gives the binary something real to operate on: three modules with
//! numbered updates (one of them batched), entity definitions, post-updates,
//! and a host whose maintenance flag and caches live in the same database.

use crate::error::CliError;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use updb_core::update::SledPostUpdateRegistry;
use updb_core::{
    EntitySchemaManager, EntityStorageError, HostEnvironment, HostError, ModuleUpdates,
    Requirement, Sandbox, SledVersionStore, StepReport, UnitFailure, UpdateCatalog,
    UpdateDefinition, UpdateOptions, UpdateServices, Updater,
};

/// Number of nodes created by the first content update.
pub const NODE_COUNT: u32 = 25;

/// Nodes processed per step by the status backfill.
pub const BACKFILL_BATCH: usize = 10;

const SETTINGS_TREE: &str = "system:settings";
const NODE_TREE: &str = "content:node";
const TITLE_INDEX_TREE: &str = "content:title_index";
const MEDIA_TREE: &str = "media:item";
const ENTITY_TREE: &str = "entity:definitions";
const HOST_TREE: &str = "host:state";
const CACHE_TREE: &str = "cache";

const MAINTENANCE_KEY: &str = "maintenance_mode";
const CONTAINER_KEY: &str = "container_built_at";

/// The demo application: services over one sled database.
pub struct DemoApp {
    db: sled::Db,
    data_path: String,
    services: UpdateServices,
}

impl DemoApp {
    /// Open (or create) the demo application in a data directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CliError> {
        let path = path.as_ref();
        let db = sled::open(path)?;

        let versions = Arc::new(SledVersionStore::open(&db)?);
        let catalog = Arc::new(demo_catalog(&db)?);
        let post_updates = Arc::new(demo_post_updates(&db)?);
        let entity_schema = Arc::new(DemoEntitySchema::open(&db)?);
        let host = Arc::new(DemoHost::open(&db)?);

        let services = UpdateServices::new(catalog, versions)
            .with_post_updates(post_updates)
            .with_entity_schema(entity_schema)
            .with_host(host);

        Ok(Self {
            db,
            data_path: path.display().to_string(),
            services,
        })
    }

    /// Services backing the demo.
    pub fn services(&self) -> &UpdateServices {
        &self.services
    }

    /// Build an updater with the given options.
    pub fn updater(&self, options: UpdateOptions) -> Updater {
        let data_path = self.data_path.clone();
        Updater::new(self.services.clone())
            .with_options(options)
            .with_requirement(move |_: &UpdateServices| {
                vec![Requirement::info("Data directory", data_path.clone())]
            })
    }

    /// Open one of the demo's trees.
    pub fn tree(&self, name: &str) -> Result<sled::Tree, CliError> {
        Ok(self.db.open_tree(name)?)
    }
}

fn failure(context: &str, e: impl std::fmt::Display) -> UnitFailure {
    UnitFailure::new(format!("{context}: {e}"))
}

fn decode(bytes: &[u8]) -> Result<Value, UnitFailure> {
    serde_json::from_slice(bytes).map_err(|e| failure("corrupt record", e))
}

fn encode(value: &Value) -> Result<Vec<u8>, UnitFailure> {
    serde_json::to_vec(value).map_err(|e| failure("could not encode record", e))
}

fn node_key(nid: u32) -> [u8; 4] {
    nid.to_be_bytes()
}

fn demo_catalog(db: &sled::Db) -> Result<UpdateCatalog, CliError> {
    let settings = db.open_tree(SETTINGS_TREE)?;
    let nodes = db.open_tree(NODE_TREE)?;
    let title_index = db.open_tree(TITLE_INDEX_TREE)?;
    let media = db.open_tree(MEDIA_TREE)?;

    let system = ModuleUpdates::new("system")
        .with_update(UpdateDefinition::new(1, "Install default settings", {
            let settings = settings.clone();
            move |_: &mut Sandbox| -> Result<StepReport, UnitFailure> {
                // Keep a site name that is already set.
                let _ = settings
                    .compare_and_swap("site_name", None as Option<&[u8]>, Some("updb demo"))
                    .map_err(|e| failure("settings", e))?;
                Ok(StepReport::done())
            }
        }))
        .with_update(UpdateDefinition::new(2, "Add the cron interval setting", {
            let settings = settings.clone();
            move |_: &mut Sandbox| -> Result<StepReport, UnitFailure> {
                settings
                    .insert("cron_interval", "3600")
                    .map_err(|e| failure("settings", e))?;
                Ok(StepReport::done_with("cron runs hourly"))
            }
        }));

    let content = ModuleUpdates::new("content")
        .with_update(UpdateDefinition::new(1, "Create demo content", {
            let nodes = nodes.clone();
            move |_: &mut Sandbox| -> Result<StepReport, UnitFailure> {
                for nid in 1..=NODE_COUNT {
                    let node = json!({ "title": format!("Article {nid}") });
                    nodes
                        .insert(node_key(nid), encode(&node)?)
                        .map_err(|e| failure("nodes", e))?;
                }
                Ok(StepReport::done_with(format!("created {NODE_COUNT} nodes")))
            }
        }))
        .with_update(UpdateDefinition::new(2, "Backfill node publishing status", {
            let nodes = nodes.clone();
            move |sandbox: &mut Sandbox| -> Result<StepReport, UnitFailure> {
                backfill_status(&nodes, sandbox)
            }
        }))
        .with_update(
            UpdateDefinition::new(3, "Index node titles", {
                let nodes = nodes.clone();
                let title_index = title_index.clone();
                move |_: &mut Sandbox| -> Result<StepReport, UnitFailure> {
                    let count = rebuild_title_index(&nodes, &title_index)?;
                    Ok(StepReport::done_with(format!("indexed {count} titles")))
                }
            })
            .depends_on("system", 1),
        );

    let media_module = ModuleUpdates::new("media")
        .with_update(
            UpdateDefinition::new(1, "Create media library", {
                let media = media.clone();
                move |_: &mut Sandbox| -> Result<StepReport, UnitFailure> {
                    for (id, name) in [(1u32, "hero"), (2, "logo"), (3, "banner")] {
                        let item = json!({ "name": name, "node": id });
                        media
                            .insert(id.to_be_bytes(), encode(&item)?)
                            .map_err(|e| failure("media", e))?;
                    }
                    Ok(StepReport::done())
                }
            })
            .depends_on("content", 1),
        )
        .with_update(UpdateDefinition::new(2, "Add alt text to media items", {
            let media = media.clone();
            move |_: &mut Sandbox| -> Result<StepReport, UnitFailure> {
                update_each(&media, |item| {
                    if item.get("alt").is_none() {
                        item["alt"] = json!("");
                    }
                })?;
                Ok(StepReport::done())
            }
        }));

    Ok(UpdateCatalog::builder()
        .module(system)
        .module(content)
        .module(media_module)
        .build()?)
}

/// Publish nodes in batches, resuming from the sandbox cursor.
fn backfill_status(nodes: &sled::Tree, sandbox: &mut Sandbox) -> Result<StepReport, UnitFailure> {
    if sandbox.is_empty() {
        sandbox.insert("max", nodes.len() as u64);
        sandbox.insert("processed", 0u64);
        sandbox.insert("last_nid", 0u64);
    }
    let max = sandbox.get_u64("max").unwrap_or(0);
    if max == 0 {
        return Ok(StepReport::done_with("no nodes to update"));
    }

    let last_nid = sandbox.get_u64("last_nid").unwrap_or(0) as u32;
    let start = node_key(last_nid.saturating_add(1));
    let mut processed = sandbox.get_u64("processed").unwrap_or(0);

    for entry in nodes.range(start..).take(BACKFILL_BATCH) {
        let (key, bytes) = entry.map_err(|e| failure("nodes", e))?;
        let mut node = decode(&bytes)?;
        node["status"] = json!("published");
        nodes
            .insert(&key, encode(&node)?)
            .map_err(|e| failure("nodes", e))?;

        let raw: [u8; 4] = key
            .as_ref()
            .try_into()
            .map_err(|_| UnitFailure::new("node key is not 4 bytes"))?;
        sandbox.insert("last_nid", u32::from_be_bytes(raw) as u64);
        processed += 1;
    }
    sandbox.insert("processed", processed);

    let finished = if processed >= max {
        1.0
    } else {
        processed as f64 / max as f64
    };
    Ok(StepReport::partial(finished).with_message(format!("published {processed} of {max} nodes")))
}

fn rebuild_title_index(nodes: &sled::Tree, index: &sled::Tree) -> Result<usize, UnitFailure> {
    index.clear().map_err(|e| failure("title index", e))?;
    let mut count = 0;
    for entry in nodes.iter() {
        let (key, bytes) = entry.map_err(|e| failure("nodes", e))?;
        let node = decode(&bytes)?;
        if let Some(title) = node.get("title").and_then(Value::as_str) {
            index
                .insert(title, key)
                .map_err(|e| failure("title index", e))?;
            count += 1;
        }
    }
    Ok(count)
}

fn update_each(tree: &sled::Tree, mut f: impl FnMut(&mut Value)) -> Result<usize, UnitFailure> {
    let mut count = 0;
    for entry in tree.iter() {
        let (key, bytes) = entry.map_err(|e| failure("records", e))?;
        let mut value = decode(&bytes)?;
        f(&mut value);
        tree.insert(key, encode(&value)?)
            .map_err(|e| failure("records", e))?;
        count += 1;
    }
    Ok(count)
}

fn demo_post_updates(db: &sled::Db) -> Result<SledPostUpdateRegistry, CliError> {
    let nodes = db.open_tree(NODE_TREE)?;
    let settings = db.open_tree(SETTINGS_TREE)?;
    let media = db.open_tree(MEDIA_TREE)?;

    let mut registry = SledPostUpdateRegistry::open(db)?;
    registry.register(
        "content",
        "count_published",
        "Record the number of published nodes",
        move |_: &mut Sandbox| -> Result<StepReport, UnitFailure> {
            let mut published = 0u64;
            for entry in nodes.iter() {
                let (_, bytes) = entry.map_err(|e| failure("nodes", e))?;
                if decode(&bytes)?.get("status").and_then(Value::as_str) == Some("published") {
                    published += 1;
                }
            }
            settings
                .insert("published_count", published.to_string().as_bytes())
                .map_err(|e| failure("settings", e))?;
            Ok(StepReport::done_with(format!("{published} published nodes")))
        },
    )?;
    registry.register(
        "media",
        "regenerate_thumbnails",
        "Regenerate media thumbnails",
        move |_: &mut Sandbox| -> Result<StepReport, UnitFailure> {
            let count = update_each(&media, |item| {
                let name = item
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("media")
                    .to_string();
                item["thumbnail"] = json!(format!("{name}_thumb.png"));
            })?;
            Ok(StepReport::done_with(format!("{count} thumbnails")))
        },
    )?;
    Ok(registry)
}

/// Entity definitions: field names per entity type, installed vs. code.
pub struct DemoEntitySchema {
    tree: sled::Tree,
    definitions: BTreeMap<String, Vec<String>>,
}

impl DemoEntitySchema {
    fn open(db: &sled::Db) -> Result<Self, CliError> {
        let definitions = BTreeMap::from([
            (
                "media".to_string(),
                vec!["name".to_string(), "alt".to_string()],
            ),
            (
                "node".to_string(),
                vec!["title".to_string(), "status".to_string(), "created".to_string()],
            ),
        ]);
        Ok(Self {
            tree: db.open_tree(ENTITY_TREE)?,
            definitions,
        })
    }

    /// Installed fields for an entity type.
    ///
    /// Unreadable records are logged and treated as empty, so the fields
    /// show up as needing installation.
    fn installed(&self, entity_type: &str) -> BTreeSet<String> {
        let bytes = match self.tree.get(entity_type) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return BTreeSet::new(),
            Err(e) => {
                tracing::warn!(entity_type, error = %e, "failed to read installed entity definition");
                return BTreeSet::new();
            }
        };
        match serde_json::from_slice::<Vec<String>>(&bytes) {
            Ok(fields) => fields.into_iter().collect(),
            Err(e) => {
                tracing::warn!(entity_type, error = %e, "corrupt installed entity definition");
                BTreeSet::new()
            }
        }
    }
}

impl EntitySchemaManager for DemoEntitySchema {
    fn needs_updates(&self) -> bool {
        !self.change_summary().is_empty()
    }

    fn change_summary(&self) -> BTreeMap<String, Vec<String>> {
        let mut summary = BTreeMap::new();
        for (entity_type, fields) in &self.definitions {
            let installed = self.installed(entity_type);
            let wanted: BTreeSet<String> = fields.iter().cloned().collect();

            let mut changes = Vec::new();
            for field in wanted.difference(&installed) {
                changes.push(format!("The {field} field needs to be installed."));
            }
            for field in installed.difference(&wanted) {
                changes.push(format!("The {field} field needs to be uninstalled."));
            }
            if !changes.is_empty() {
                summary.insert(entity_type.clone(), changes);
            }
        }
        summary
    }

    fn apply_updates(&self) -> Result<(), EntityStorageError> {
        for (entity_type, fields) in &self.definitions {
            let bytes =
                serde_json::to_vec(fields).map_err(|e| EntityStorageError::new(e.to_string()))?;
            self.tree
                .insert(entity_type.as_bytes(), bytes)
                .map_err(|e| EntityStorageError::new(e.to_string()))?;
        }
        self.tree
            .flush()
            .map_err(|e| EntityStorageError::new(e.to_string()))?;
        Ok(())
    }
}

/// Host whose maintenance flag and caches live in sled.
pub struct DemoHost {
    state: sled::Tree,
    cache: sled::Tree,
}

impl DemoHost {
    fn open(db: &sled::Db) -> Result<Self, CliError> {
        Ok(Self {
            state: db.open_tree(HOST_TREE)?,
            cache: db.open_tree(CACHE_TREE)?,
        })
    }
}

impl HostEnvironment for DemoHost {
    fn set_maintenance_mode(&self, enabled: bool) -> Result<(), HostError> {
        self.state
            .insert(MAINTENANCE_KEY, vec![u8::from(enabled)])
            .map_err(|e| HostError(e.to_string()))?;
        self.state.flush().map_err(|e| HostError(e.to_string()))?;
        Ok(())
    }

    fn maintenance_mode(&self) -> bool {
        matches!(self.state.get(MAINTENANCE_KEY), Ok(Some(v)) if v.first() == Some(&1))
    }

    fn flush_all_caches(&self) -> Result<(), HostError> {
        self.cache.clear().map_err(|e| HostError(e.to_string()))
    }

    fn rebuild_service_container(&self) -> Result<(), HostError> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.state
            .insert(CONTAINER_KEY, now.to_be_bytes().to_vec())
            .map_err(|e| HostError(e.to_string()))?;
        Ok(())
    }
}
