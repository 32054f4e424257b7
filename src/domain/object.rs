//! Named objects and the descriptor that parameterizes a repository.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A persisted, identity-bearing record with key/value metadata.
///
/// The object remembers the name and metadata it was last persisted with, so
/// the repository can tell a rename apart from a no-op and the metadata store
/// can write only what changed.
#[derive(Debug, Clone)]
pub struct NamedObject {
    id: i64,
    pub name: String,
    pub metadata: BTreeMap<String, String>,
    persisted_name: String,
    persisted_metadata: BTreeMap<String, String>,
}

impl NamedObject {
    pub(crate) fn new(id: i64, name: String) -> Self {
        Self {
            id,
            persisted_name: name.clone(),
            name,
            metadata: BTreeMap::new(),
            persisted_metadata: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name as currently stored.
    pub fn persisted_name(&self) -> &str {
        &self.persisted_name
    }

    pub fn get_meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn remove_meta(&mut self, key: &str) -> Option<String> {
        self.metadata.remove(key)
    }

    /// Metadata entries added or changed, and keys removed, since the last save.
    pub fn metadata_delta(&self) -> MetadataDelta {
        let upserts = self
            .metadata
            .iter()
            .filter(|(k, v)| self.persisted_metadata.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let removals = self
            .persisted_metadata
            .keys()
            .filter(|k| !self.metadata.contains_key(*k))
            .cloned()
            .collect();
        MetadataDelta { upserts, removals }
    }

    /// Replaces the metadata with what storage holds.
    pub(crate) fn hydrate_metadata(&mut self, metadata: BTreeMap<String, String>) {
        self.persisted_metadata = metadata.clone();
        self.metadata = metadata;
    }

    pub(crate) fn mark_metadata_saved(&mut self) {
        self.persisted_metadata = self.metadata.clone();
    }

    pub(crate) fn mark_renamed(&mut self, name: String) {
        self.persisted_name = name.clone();
        self.name = name;
    }
}

/// Pending metadata writes for one object.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetadataDelta {
    pub upserts: Vec<(String, String)>,
    pub removals: Vec<String>,
}

impl MetadataDelta {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }
}

/// The raw `{id, name}` row kept in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRow {
    pub id: i64,
    pub name: String,
}

/// Anything a repository can hand out: a type wrapping a [`NamedObject`].
pub trait NamedEntity: Send + Sync {
    fn object(&self) -> &NamedObject;

    fn object_mut(&mut self) -> &mut NamedObject;
}

impl NamedEntity for NamedObject {
    fn object(&self) -> &NamedObject {
        self
    }

    fn object_mut(&mut self) -> &mut NamedObject {
        self
    }
}

/// Type name plus constructor for the entities a repository manages.
pub struct EntityDescriptor<T> {
    type_name: String,
    construct: fn(NamedObject) -> T,
}

impl<T> EntityDescriptor<T> {
    /// `type_name` names the tables and the cache namespace, so it must be a
    /// plain SQL identifier.
    pub fn new(type_name: impl Into<String>, construct: fn(NamedObject) -> T) -> Result<Self> {
        let type_name = type_name.into();
        if !validate_ident(&type_name) {
            return Err(StoreError::invalid(format!(
                "'{}' is not a valid type name",
                type_name
            )));
        }
        Ok(Self {
            type_name,
            construct,
        })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn construct(&self, object: NamedObject) -> T {
        (self.construct)(object)
    }
}

impl EntityDescriptor<NamedObject> {
    /// Descriptor for bare [`NamedObject`]s.
    pub fn plain(type_name: impl Into<String>) -> Result<Self> {
        Self::new(type_name, |object| object)
    }
}

/// ASCII letter or underscore, then letters, digits, underscores.
pub fn validate_ident(ident: &str) -> bool {
    let mut chars = ident.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
