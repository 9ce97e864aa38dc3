//! Post-update registry persisted in sled.
//!
//! Post-updates are registered in code in a fixed order; the set of
//! executed ones lives in the `post_update:executed` tree so a post-update
//! that completed once is never pending again.

use super::error::{CatalogError, UnitFailure};
use super::host::{PostUpdateInfo, PostUpdateRegistry};
use super::unit::{PostUpdateId, Sandbox, StepReport, UpdateBody};
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Record stored for each executed post-update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedRecord {
    /// When the post-update completed (microseconds since epoch).
    pub executed_at: u64,
}

struct PostUpdateEntry {
    id: PostUpdateId,
    description: String,
    body: Arc<dyn UpdateBody>,
}

/// Post-update registry backed by a sled tree.
pub struct SledPostUpdateRegistry {
    tree: sled::Tree,
    entries: Vec<PostUpdateEntry>,
}

impl SledPostUpdateRegistry {
    /// Tree name for executed post-updates.
    pub const TREE_NAME: &'static str = "post_update:executed";

    /// Open or create the registry.
    pub fn open(db: &sled::Db) -> Result<Self, Error> {
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(Self {
            tree,
            entries: Vec::new(),
        })
    }

    /// Register a post-update.
    ///
    /// A module's post-updates run in the order they are registered, and
    /// modules run in the order of their first registration.
    pub fn register(
        &mut self,
        module: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        body: impl UpdateBody + 'static,
    ) -> Result<(), CatalogError> {
        let id = PostUpdateId::new(module, name);
        if self.entries.iter().any(|e| e.id == id) {
            return Err(CatalogError::DuplicateUpdate {
                unit: id.to_string(),
            });
        }
        let position = self
            .entries
            .iter()
            .rposition(|e| e.id.module == id.module)
            .map_or(self.entries.len(), |last| last + 1);
        self.entries.insert(
            position,
            PostUpdateEntry {
                id,
                description: description.into(),
                body: Arc::new(body),
            },
        );
        Ok(())
    }

    /// Check whether a post-update has been executed.
    pub fn is_executed(&self, id: &PostUpdateId) -> Result<bool, Error> {
        Ok(self.tree.contains_key(Self::key(id))?)
    }

    /// When a post-update was executed, if it was.
    pub fn executed_record(&self, id: &PostUpdateId) -> Result<Option<ExecutedRecord>, Error> {
        match self.tree.get(Self::key(id))? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| Error::Deserialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// `module NUL name`; NUL cannot appear in an identifier.
    fn key(id: &PostUpdateId) -> Vec<u8> {
        let mut key = Vec::with_capacity(id.module.len() + id.name.len() + 1);
        key.extend_from_slice(id.module.as_bytes());
        key.push(0);
        key.extend_from_slice(id.name.as_bytes());
        key
    }
}

impl PostUpdateRegistry for SledPostUpdateRegistry {
    fn pending_update_information(&self) -> Result<Vec<PostUpdateInfo>, Error> {
        let mut pending = Vec::new();
        for entry in &self.entries {
            if !self.is_executed(&entry.id)? {
                pending.push(PostUpdateInfo {
                    id: entry.id.clone(),
                    description: entry.description.clone(),
                });
            }
        }
        Ok(pending)
    }

    fn invoke(&self, id: &PostUpdateId, sandbox: &mut Sandbox) -> Result<StepReport, UnitFailure> {
        match self.entries.iter().find(|e| &e.id == id) {
            Some(entry) => entry.body.run(sandbox),
            None => Err(UnitFailure::new(format!("post-update {id} is not registered"))),
        }
    }

    fn mark_executed(&self, id: &PostUpdateId) -> Result<(), Error> {
        let record = ExecutedRecord {
            executed_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_micros() as u64)
                .unwrap_or(0),
        };
        let bytes = serde_json::to_vec(&record).map_err(|e| Error::Serialization(e.to_string()))?;
        self.tree.insert(Self::key(id), bytes)?;
        self.tree.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(_: &mut Sandbox) -> Result<StepReport, UnitFailure> {
        Ok(StepReport::done())
    }

    fn registry(db: &sled::Db) -> SledPostUpdateRegistry {
        let mut registry = SledPostUpdateRegistry::open(db).unwrap();
        registry.register("media", "thumbnails", "Regenerate thumbnails", ok).unwrap();
        registry.register("content", "reindex", "Rebuild search index", ok).unwrap();
        registry.register("media", "alt_text", "Fill empty alt text", ok).unwrap();
        registry
    }

    #[test]
    fn test_pending_grouped_by_module() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = sled::open(temp_dir.path()).unwrap();
        let registry = registry(&db);

        let ids: Vec<String> = registry
            .pending_update_functions()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            ids,
            vec![
                "media_post_update_thumbnails",
                "media_post_update_alt_text",
                "content_post_update_reindex",
            ]
        );

        let groups = registry.pending_by_module().unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "media");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "content");
    }

    #[test]
    fn test_grouping_skips_executed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = sled::open(temp_dir.path()).unwrap();
        let registry = registry(&db);
        registry
            .mark_executed(&PostUpdateId::new("media", "thumbnails"))
            .unwrap();

        let groups = registry.pending_by_module().unwrap();
        assert_eq!(groups[0].0, "media");
        assert_eq!(groups[0].1[0].id.name, "alt_text");
        assert_eq!(groups[1].1[0].id.name, "reindex");
    }

    #[test]
    fn test_keys_do_not_collide_across_separators() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = sled::open(temp_dir.path()).unwrap();
        let mut registry = SledPostUpdateRegistry::open(&db).unwrap();
        registry.register("a/b", "c", "first", ok).unwrap();
        registry.register("a", "b/c", "second", ok).unwrap();

        registry.mark_executed(&PostUpdateId::new("a/b", "c")).unwrap();

        assert!(!registry.is_executed(&PostUpdateId::new("a", "b/c")).unwrap());
        let pending = registry.pending_update_functions().unwrap();
        assert_eq!(pending, vec![PostUpdateId::new("a", "b/c")]);
    }

    #[test]
    fn test_executed_is_no_longer_pending_after_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let thumbnails = PostUpdateId::new("media", "thumbnails");
        {
            let db = sled::open(temp_dir.path()).unwrap();
            let registry = registry(&db);
            registry.mark_executed(&thumbnails).unwrap();
            assert!(registry.executed_record(&thumbnails).unwrap().is_some());
        }

        let db = sled::open(temp_dir.path()).unwrap();
        let registry = registry(&db);
        assert!(registry.is_executed(&thumbnails).unwrap());
        assert_eq!(registry.pending_update_information().unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = sled::open(temp_dir.path()).unwrap();
        let mut registry = registry(&db);

        let err = registry
            .register("media", "thumbnails", "again", ok)
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateUpdate { .. }));
    }

    #[test]
    fn test_invoke_unknown_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = sled::open(temp_dir.path()).unwrap();
        let registry = registry(&db);

        let mut sandbox = Sandbox::new();
        assert!(registry
            .invoke(&PostUpdateId::new("views", "missing"), &mut sandbox)
            .is_err());
        assert!(registry
            .invoke(&PostUpdateId::new("content", "reindex"), &mut sandbox)
            .unwrap()
            .is_finished());
    }
}
