//! Schema version persistence.
//!
//! One integer per module: the number of the last successfully applied
//! schema update. This is the single source of truth for "already applied".

use crate::error::Error;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Key-value store of installed schema versions.
///
/// `set` must be durable when it returns: the engine calls it in the same
/// step as the unit that justifies the bump, so a crash in between leaves
/// the unit pending for the next run.
pub trait SchemaVersionStore: Send + Sync {
    /// Installed version of a module, 0 if unknown.
    fn get(&self, module: &str) -> Result<u32, Error>;

    /// Record a module's installed version.
    fn set(&self, module: &str, version: u32) -> Result<(), Error>;

    /// All recorded versions.
    fn all(&self) -> Result<BTreeMap<String, u32>, Error>;
}

/// Schema version store backed by a sled tree.
pub struct SledVersionStore {
    tree: sled::Tree,
}

impl SledVersionStore {
    /// Tree name for schema versions.
    pub const TREE_NAME: &'static str = "schema:versions";

    /// Open or create the version store.
    pub fn open(db: &sled::Db) -> Result<Self, Error> {
        let tree = db.open_tree(Self::TREE_NAME)?;
        Ok(Self { tree })
    }

    fn decode(module: &[u8], bytes: &[u8]) -> Result<u32, Error> {
        let raw: [u8; 4] = bytes.try_into().map_err(|_| {
            Error::InvalidData(format!(
                "schema version for {} has {} bytes, expected 4",
                String::from_utf8_lossy(module),
                bytes.len()
            ))
        })?;
        Ok(u32::from_be_bytes(raw))
    }
}

impl SchemaVersionStore for SledVersionStore {
    fn get(&self, module: &str) -> Result<u32, Error> {
        match self.tree.get(module.as_bytes())? {
            Some(bytes) => Self::decode(module.as_bytes(), &bytes),
            None => Ok(0),
        }
    }

    fn set(&self, module: &str, version: u32) -> Result<(), Error> {
        self.tree
            .insert(module.as_bytes(), version.to_be_bytes().to_vec())?;
        self.tree.flush()?;
        Ok(())
    }

    fn all(&self) -> Result<BTreeMap<String, u32>, Error> {
        let mut versions = BTreeMap::new();
        for result in self.tree.iter() {
            let (key, value) = result?;
            let module = String::from_utf8(key.to_vec())
                .map_err(|e| Error::InvalidData(format!("module name is not UTF-8: {e}")))?;
            let version = Self::decode(&key, &value)?;
            versions.insert(module, version);
        }
        Ok(versions)
    }
}

/// In-memory schema version store.
#[derive(Debug, Default)]
pub struct MemoryVersionStore {
    versions: RwLock<BTreeMap<String, u32>>,
}

impl MemoryVersionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with versions.
    pub fn with_versions<I, S>(versions: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let versions = versions
            .into_iter()
            .map(|(module, version)| (module.into(), version))
            .collect();
        Self {
            versions: RwLock::new(versions),
        }
    }
}

impl SchemaVersionStore for MemoryVersionStore {
    fn get(&self, module: &str) -> Result<u32, Error> {
        Ok(self.versions.read().get(module).copied().unwrap_or(0))
    }

    fn set(&self, module: &str, version: u32) -> Result<(), Error> {
        self.versions.write().insert(module.to_string(), version);
        Ok(())
    }

    fn all(&self) -> Result<BTreeMap<String, u32>, Error> {
        Ok(self.versions.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sled_store_defaults_to_zero() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = sled::open(temp_dir.path()).unwrap();
        let store = SledVersionStore::open(&db).unwrap();

        assert_eq!(store.get("content").unwrap(), 0);
        assert!(store.all().unwrap().is_empty());
    }

    #[test]
    fn test_sled_store_set_and_get() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = sled::open(temp_dir.path()).unwrap();
        let store = SledVersionStore::open(&db).unwrap();

        store.set("content", 5).unwrap();
        store.set("media", 2).unwrap();
        store.set("content", 6).unwrap();

        assert_eq!(store.get("content").unwrap(), 6);
        assert_eq!(store.get("media").unwrap(), 2);

        let all = store.all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get("content"), Some(&6));
    }

    #[test]
    fn test_sled_store_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        {
            let db = sled::open(temp_dir.path()).unwrap();
            let store = SledVersionStore::open(&db).unwrap();
            store.set("content", 8001).unwrap();
        }

        let db = sled::open(temp_dir.path()).unwrap();
        let store = SledVersionStore::open(&db).unwrap();
        assert_eq!(store.get("content").unwrap(), 8001);
    }

    #[test]
    fn test_sled_store_rejects_corrupt_value() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = sled::open(temp_dir.path()).unwrap();
        let store = SledVersionStore::open(&db).unwrap();

        db.open_tree(SledVersionStore::TREE_NAME)
            .unwrap()
            .insert("content", vec![1u8, 2])
            .unwrap();

        assert!(matches!(store.get("content"), Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryVersionStore::with_versions([("content", 4)]);
        assert_eq!(store.get("content").unwrap(), 4);
        assert_eq!(store.get("media").unwrap(), 0);

        store.set("media", 1).unwrap();
        assert_eq!(store.all().unwrap().len(), 2);
    }
}
