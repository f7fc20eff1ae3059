use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::directory::DirectoryStore;
use crate::dn;
use crate::entry::{find_key, AttributeMap, LdapEntry};
use crate::error::CoreError;
use crate::export::ldif as ldif_out;
use crate::filter::Filter;
use crate::import::ldif;

/// An in-memory directory backed by an LDIF snapshot.
///
/// Flat store: no parent container is required for `create`.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entries: RwLock<Vec<LdapEntry>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an LDIF string into a directory.
    pub fn from_ldif(content: &str) -> Self {
        Self::from_entries(ldif::parse_ldif(content))
    }

    pub fn from_entries(entries: Vec<LdapEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Load an LDIF snapshot file. A missing file yields an empty directory.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            debug!("offline snapshot {} not found, starting empty", path.display());
            return Ok(Self::new());
        }
        Ok(Self::from_entries(ldif::import(path)?.entries))
    }

    /// Write the current contents back to an LDIF file.
    pub fn save(&self, path: &Path, wrap: usize) -> Result<usize, CoreError> {
        ldif_out::export(&self.entries(), path, wrap)
    }

    /// Snapshot of all entries in insertion order.
    pub fn entries(&self) -> Vec<LdapEntry> {
        self.read().clone()
    }

    pub fn to_ldif(&self, wrap: usize) -> String {
        ldif_out::to_string(&self.read(), wrap)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<LdapEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<LdapEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn same_dn(a: &str, b: &str) -> bool {
    dn::normalize(a) == dn::normalize(b)
}

fn in_scope(entry_dn: &str, base_dn: &str) -> bool {
    let base = dn::normalize(base_dn);
    if base.is_empty() {
        return true;
    }
    let entry = dn::normalize(entry_dn);
    entry == base || entry.ends_with(&format!(",{}", base))
}

#[async_trait]
impl DirectoryStore for MemoryDirectory {
    async fn exists(&self, dn: &str) -> Result<bool, CoreError> {
        Ok(self.read().iter().any(|e| same_dn(&e.dn, dn)))
    }

    async fn get(&self, dn: &str) -> Result<Option<LdapEntry>, CoreError> {
        Ok(self.read().iter().find(|e| same_dn(&e.dn, dn)).cloned())
    }

    async fn create(
        &self,
        dn: &str,
        object_classes: &[String],
        attrs: &AttributeMap,
    ) -> Result<(), CoreError> {
        let mut entries = self.write();
        if entries.iter().any(|e| same_dn(&e.dn, dn)) {
            return Err(CoreError::AlreadyExists(dn.to_string()));
        }

        let mut attributes = attrs.clone();
        if !object_classes.is_empty() {
            let key = find_key(&attributes, "objectClass")
                .cloned()
                .unwrap_or_else(|| "objectClass".to_string());
            let existing = attributes.entry(key).or_default();
            for oc in object_classes {
                if !existing.iter().any(|e| e.eq_ignore_ascii_case(oc)) {
                    existing.push(oc.clone());
                }
            }
        }

        debug!("offline create: {}", dn);
        entries.push(LdapEntry::new(dn.to_string(), attributes));
        Ok(())
    }

    async fn replace(&self, dn: &str, attrs: &AttributeMap) -> Result<(), CoreError> {
        let mut entries = self.write();
        let entry = entries
            .iter_mut()
            .find(|e| same_dn(&e.dn, dn))
            .ok_or_else(|| CoreError::NoSuchEntry(dn.to_string()))?;

        for (attr, values) in attrs {
            let key = find_key(&entry.attributes, attr)
                .cloned()
                .unwrap_or_else(|| attr.clone());
            if values.is_empty() {
                entry.attributes.remove(&key);
            } else {
                entry.attributes.insert(key, values.clone());
            }
        }

        debug!("offline replace: {} ({} attributes)", dn, attrs.len());
        Ok(())
    }

    async fn search(&self, base_dn: &str, filter: &str) -> Result<Vec<LdapEntry>, CoreError> {
        let filter = Filter::parse(filter).map_err(CoreError::SearchFailed)?;
        Ok(self
            .read()
            .iter()
            .filter(|e| in_scope(&e.dn, base_dn) && filter.matches(e))
            .cloned()
            .collect())
    }
}
