//! Update unit identity, sandbox state, and the update body contract.

use super::error::UnitFailure;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Kind of an update unit.
///
/// Phases always run in declaration order: schema updates, then the
/// entity definition update, then post-updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum UnitKind {
    /// Numbered, per-module schema update.
    #[serde(rename = "hook_update_n")]
    SchemaUpdate,
    /// Batch reconciliation of entity/field definitions.
    #[serde(rename = "entity-update")]
    EntityDefinitionUpdate,
    /// Data update run after all structural work.
    #[serde(rename = "post-update")]
    PostUpdate,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::SchemaUpdate => write!(f, "hook_update_n"),
            UnitKind::EntityDefinitionUpdate => write!(f, "entity-update"),
            UnitKind::PostUpdate => write!(f, "post-update"),
        }
    }
}

/// Identifier of a numbered schema update.
///
/// Ordering is `(module, number)`, which is also the resolver's tie-break order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SchemaUpdateId {
    /// Owning module.
    pub module: String,
    /// Update number, unique within the module.
    pub number: u32,
}

impl SchemaUpdateId {
    /// Create a new schema update identifier.
    pub fn new(module: impl Into<String>, number: u32) -> Self {
        Self {
            module: module.into(),
            number,
        }
    }
}

impl fmt::Display for SchemaUpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_update_{}", self.module, self.number)
    }
}

/// Identifier of a post-update.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PostUpdateId {
    /// Owning module.
    pub module: String,
    /// Post-update name, unique within the module.
    pub name: String,
}

impl PostUpdateId {
    /// Create a new post-update identifier.
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PostUpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_post_update_{}", self.module, self.name)
    }
}

/// Identity of one executable unit in an execution plan.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitId {
    /// A numbered schema update.
    Schema(SchemaUpdateId),
    /// The single synthetic "apply all entity definition changes" unit.
    EntityDefinitions,
    /// A post-update.
    Post(PostUpdateId),
}

impl UnitId {
    /// Shorthand for a schema update unit.
    pub fn schema(module: impl Into<String>, number: u32) -> Self {
        UnitId::Schema(SchemaUpdateId::new(module, number))
    }

    /// Shorthand for a post-update unit.
    pub fn post(module: impl Into<String>, name: impl Into<String>) -> Self {
        UnitId::Post(PostUpdateId::new(module, name))
    }

    /// The unit's kind.
    pub fn kind(&self) -> UnitKind {
        match self {
            UnitId::Schema(_) => UnitKind::SchemaUpdate,
            UnitId::EntityDefinitions => UnitKind::EntityDefinitionUpdate,
            UnitId::Post(_) => UnitKind::PostUpdate,
        }
    }

    /// The owning module, if the unit belongs to one.
    pub fn module(&self) -> Option<&str> {
        match self {
            UnitId::Schema(id) => Some(&id.module),
            UnitId::EntityDefinitions => None,
            UnitId::Post(id) => Some(&id.module),
        }
    }

    /// The schema update number, for schema units.
    pub fn number(&self) -> Option<u32> {
        match self {
            UnitId::Schema(id) => Some(id.number),
            _ => None,
        }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitId::Schema(id) => write!(f, "{id}"),
            UnitId::EntityDefinitions => write!(f, "entity definitions"),
            UnitId::Post(id) => write!(f, "{id}"),
        }
    }
}

impl From<SchemaUpdateId> for UnitId {
    fn from(id: SchemaUpdateId) -> Self {
        UnitId::Schema(id)
    }
}

impl From<PostUpdateId> for UnitId {
    fn from(id: PostUpdateId) -> Self {
        UnitId::Post(id)
    }
}

/// Scratch state owned by one unit across re-invocations.
///
/// A unit that reports partial progress gets the same sandbox back on its
/// next invocation. The sandbox is dropped once the unit completes or aborts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sandbox {
    values: BTreeMap<String, Value>,
}

impl Sandbox {
    /// Create an empty sandbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// True on a unit's first invocation.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a raw value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Get a value as an unsigned integer.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    /// Get a value as a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Check whether a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Insert a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    /// Remove a value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }
}

/// What one invocation of an update body reports back.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    /// Fraction of the unit's work done so far, 0.0 to 1.0.
    pub finished: f64,
    /// Optional outcome text.
    pub message: Option<String>,
}

impl StepReport {
    /// The unit is done.
    pub fn done() -> Self {
        Self {
            finished: 1.0,
            message: None,
        }
    }

    /// The unit is done, with an outcome message.
    pub fn done_with(message: impl Into<String>) -> Self {
        Self {
            finished: 1.0,
            message: Some(message.into()),
        }
    }

    /// The unit made progress and must be invoked again.
    pub fn partial(finished: f64) -> Self {
        Self {
            finished,
            message: None,
        }
    }

    /// Attach a message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Check whether the unit reported completion.
    pub fn is_finished(&self) -> bool {
        self.finished >= 1.0
    }
}

impl Default for StepReport {
    fn default() -> Self {
        Self::done()
    }
}

/// Executable body of an update unit.
///
/// Called repeatedly with the same sandbox until it reports completion or
/// fails. Closures of the matching shape implement this trait.
pub trait UpdateBody: Send + Sync {
    /// Run one step of the update.
    fn run(&self, sandbox: &mut Sandbox) -> Result<StepReport, UnitFailure>;
}

impl<F> UpdateBody for F
where
    F: Fn(&mut Sandbox) -> Result<StepReport, UnitFailure> + Send + Sync,
{
    fn run(&self, sandbox: &mut Sandbox) -> Result<StepReport, UnitFailure> {
        self(sandbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_id_display() {
        assert_eq!(UnitId::schema("content", 5).to_string(), "content_update_5");
        assert_eq!(
            UnitId::post("media", "thumbnails").to_string(),
            "media_post_update_thumbnails"
        );
        assert_eq!(UnitId::EntityDefinitions.to_string(), "entity definitions");
    }

    #[test]
    fn test_unit_id_accessors() {
        let id = UnitId::schema("content", 5);
        assert_eq!(id.kind(), UnitKind::SchemaUpdate);
        assert_eq!(id.module(), Some("content"));
        assert_eq!(id.number(), Some(5));

        assert_eq!(UnitId::EntityDefinitions.module(), None);
        assert_eq!(UnitId::post("media", "x").number(), None);
    }

    #[test]
    fn test_schema_ids_order_by_module_then_number() {
        let mut ids = vec![
            SchemaUpdateId::new("media", 1),
            SchemaUpdateId::new("content", 10),
            SchemaUpdateId::new("content", 2),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                SchemaUpdateId::new("content", 2),
                SchemaUpdateId::new("content", 10),
                SchemaUpdateId::new("media", 1),
            ]
        );
    }

    #[test]
    fn test_kind_order_matches_phases() {
        assert!(UnitKind::SchemaUpdate < UnitKind::EntityDefinitionUpdate);
        assert!(UnitKind::EntityDefinitionUpdate < UnitKind::PostUpdate);
    }

    #[test]
    fn test_sandbox() {
        let mut sandbox = Sandbox::new();
        assert!(sandbox.is_empty());

        sandbox.insert("processed", 25u64);
        sandbox.insert("cursor", "node:25");
        assert_eq!(sandbox.get_u64("processed"), Some(25));
        assert_eq!(sandbox.get_str("cursor"), Some("node:25"));
        assert!(sandbox.contains_key("processed"));

        sandbox.remove("processed");
        assert!(!sandbox.contains_key("processed"));
    }

    #[test]
    fn test_step_report() {
        assert!(StepReport::done().is_finished());
        assert!(!StepReport::partial(0.5).is_finished());
        assert_eq!(
            StepReport::partial(0.5).with_message("halfway").message.as_deref(),
            Some("halfway")
        );
    }

    #[test]
    fn test_closure_body() {
        let body = |sandbox: &mut Sandbox| -> Result<StepReport, UnitFailure> {
            let calls = sandbox.get_u64("calls").unwrap_or(0) + 1;
            sandbox.insert("calls", calls);
            Ok(StepReport::partial(calls as f64 / 2.0))
        };

        let mut sandbox = Sandbox::new();
        assert!(!body.run(&mut sandbox).unwrap().is_finished());
        assert!(body.run(&mut sandbox).unwrap().is_finished());
    }
}
