//! Backend Registry
//!
//! Name-keyed factory table for swappable store implementations. Each
//! backend module exposes a `register` function; callers build a registry
//! explicitly and inject it into [`Database::open_with_registry`].
//!
//! ```rust,ignore
//! let mut registry = PluginRegistry::new();
//! chainstore::metadata::sqlite::register(&mut registry)?;
//!
//! let ctx = PluginContext { data_dir: None, cache_kib: 2_000, busy_timeout_ms: 1_000 };
//! let store = registry.new_metadata_store("sqlite", &ctx)?;
//! ```
//!
//! [`Database::open_with_registry`]: crate::Database::open_with_registry

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::{Result, StoreError};
use crate::metadata::MetadataStore;

/// Role a plugin fills
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PluginCategory {
    Metadata,
}

impl fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginCategory::Metadata => f.write_str("metadata"),
        }
    }
}

/// Arguments handed to a backend factory
#[derive(Debug, Clone, Copy)]
pub struct PluginContext<'a> {
    /// `None` selects the backend's in-memory mode
    pub data_dir: Option<&'a Path>,
    pub cache_kib: u32,
    pub busy_timeout_ms: u64,
}

pub type MetadataFactory = fn(&PluginContext<'_>) -> Result<Box<dyn MetadataStore>>;

#[derive(Clone)]
pub struct PluginEntry {
    pub category: PluginCategory,
    pub name: String,
    pub description: &'static str,
    pub factory: MetadataFactory,
}

impl fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginEntry")
            .field("category", &self.category)
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

#[derive(Debug, Default, Clone)]
pub struct PluginRegistry {
    entries: BTreeMap<(PluginCategory, String), PluginEntry>,
}

impl PluginRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every backend bundled with this crate
    pub fn with_builtin() -> Result<Self> {
        let mut registry = Self::new();
        crate::metadata::sqlite::register(&mut registry)?;
        Ok(registry)
    }

    /// Add an entry; a second entry under the same (category, name) fails
    pub fn register(&mut self, entry: PluginEntry) -> Result<()> {
        let key = (entry.category, entry.name.clone());
        if self.entries.contains_key(&key) {
            return Err(StoreError::DuplicatePlugin {
                category: entry.category,
                name: entry.name,
            });
        }
        tracing::debug!(
            category = %entry.category,
            name = %entry.name,
            "registry: plugin registered"
        );
        self.entries.insert(key, entry);
        Ok(())
    }

    pub fn get(&self, category: PluginCategory, name: &str) -> Result<&PluginEntry> {
        self.entries
            .get(&(category, name.to_string()))
            .ok_or_else(|| StoreError::PluginNotFound {
                category,
                name: name.to_string(),
            })
    }

    /// Registered names in `category`, sorted
    pub fn names(&self, category: PluginCategory) -> Vec<&str> {
        self.entries
            .keys()
            .filter(|(c, _)| *c == category)
            .map(|(_, name)| name.as_str())
            .collect()
    }

    /// Construct the metadata backend registered as `name`
    pub fn new_metadata_store(
        &self,
        name: &str,
        ctx: &PluginContext<'_>,
    ) -> Result<Box<dyn MetadataStore>> {
        let entry = self.get(PluginCategory::Metadata, name)?;
        (entry.factory)(ctx)
    }
}
