//! Protected resource catalog.
//!
//! The gateway only ever reads the catalog, keyed by identifier, for the
//! duration of one request. [`ResourceCatalog`] is the seam; the shipped
//! implementation is an immutable in-memory table built from configuration.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Sensitivity classification of a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Anyone with a valid identity may be allowed to read
    Public,
    /// Internal to the organisation
    Internal,
    /// Highest sensitivity
    TopSecret,
}

impl Category {
    /// Wire name used in policy attributes and JSON bodies
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Internal => "internal",
            Self::TopSecret => "top_secret",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A protected resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Stable identifier used in request paths
    pub id: String,
    /// Human-readable label
    pub title: String,
    /// Sensitivity classification
    pub category: Category,
    /// Owning entity
    pub owner: String,
}

impl CatalogEntry {
    /// Convenience constructor
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        category: Category,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            category,
            owner: owner.into(),
        }
    }
}

/// Read-only lookup of protected resources.
pub trait ResourceCatalog: Send + Sync {
    /// Look up an entry by identifier; `None` when it does not exist.
    fn lookup(&self, id: &str) -> Option<CatalogEntry>;
}

/// Immutable in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: HashMap<String, CatalogEntry>,
}

impl StaticCatalog {
    /// Build a catalog from a list of entries.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` on an empty or duplicate identifier.
    pub fn from_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> Result<Self> {
        let mut map = HashMap::new();
        for entry in entries {
            if entry.id.is_empty() {
                return Err(Error::Config("catalog entry with empty id".to_string()));
            }
            if map.contains_key(&entry.id) {
                return Err(Error::Config(format!(
                    "duplicate catalog entry id: {}",
                    entry.id
                )));
            }
            map.insert(entry.id.clone(), entry);
        }
        Ok(Self { entries: map })
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResourceCatalog for StaticCatalog {
    fn lookup(&self, id: &str) -> Option<CatalogEntry> {
        self.entries.get(id).cloned()
    }
}

/// The demo document set served when no catalog is configured.
#[must_use]
pub fn demo_documents() -> Vec<CatalogEntry> {
    vec![
        CatalogEntry::new("doc1", "Bat mobile blue prints", Category::TopSecret, "Lucius Fox"),
        CatalogEntry::new("doc2", "Friday bowling league", Category::Internal, "Joe Bloggs"),
        CatalogEntry::new(
            "doc3",
            "Press release: Gotham marathon",
            Category::Public,
            "Jane Barton",
        ),
    ]
}
