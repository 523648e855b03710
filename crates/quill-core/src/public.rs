//! [`PublicTable`]: the capability table a module shares with its dependents.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

/// Type-erased capability value stored in a [`PublicTable`].
pub type PublicArc = Arc<dyn Any + Send + Sync>;

/// A module's public capability table.
///
/// Cloning a `PublicTable` clones the handle, not the contents: the kernel
/// hands the same live table to every dependent, so anything the owner
/// inserts later is visible to all holders.
///
/// Consumers must treat the table as read-only. Only the owning module (or a
/// mutator function it documents) should call [`insert`](Self::insert).
///
/// ```rust,ignore
/// struct Workspaces { /* ... */ }
///
/// let public = PublicTable::new();
/// public.insert("workspaces", Workspaces::default());
///
/// // in a dependent
/// let ws: Arc<Workspaces> = handle.public().get("workspaces").unwrap();
/// ```
#[derive(Clone, Default)]
pub struct PublicTable {
    entries: Arc<RwLock<BTreeMap<String, PublicArc>>>,
}

impl PublicTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts (or replaces) a capability.
    pub fn insert<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.insert_arc(key, Arc::new(value));
    }

    /// Inserts an already shared capability.
    pub fn insert_arc(&self, key: impl Into<String>, value: PublicArc) {
        self.entries.write().insert(key.into(), value);
    }

    /// Looks up a capability and downcasts it to `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.entries
            .read()
            .get(key)
            .and_then(|value| Arc::clone(value).downcast::<T>().ok())
    }

    /// Returns the raw capability stored under `key`.
    pub fn get_raw(&self, key: &str) -> Option<PublicArc> {
        self.entries.read().get(key).cloned()
    }

    /// Returns `true` if `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Number of capabilities.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns `true` if both handles point at the same table.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    /// Copies every entry of `other` into this table.
    ///
    /// Returns the first key present in both tables without inserting
    /// anything.
    pub fn absorb(&self, other: &PublicTable) -> Result<(), String> {
        if self.ptr_eq(other) {
            return Ok(());
        }
        let incoming = other.entries.read().clone();
        let mut entries = self.entries.write();
        if let Some(key) = incoming.keys().find(|key| entries.contains_key(*key)) {
            return Err(key.clone());
        }
        entries.extend(incoming);
        Ok(())
    }
}

impl fmt::Debug for PublicTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicTable")
            .field("keys", &self.keys())
            .finish()
    }
}
