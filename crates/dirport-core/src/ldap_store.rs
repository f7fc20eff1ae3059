use std::collections::HashSet;

use async_trait::async_trait;
use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{Mod, Scope, SearchEntry, SearchResult};
use tracing::{debug, info};

use crate::connection::LdapConnection;
use crate::directory::DirectoryStore;
use crate::entry::{AttributeMap, LdapEntry};
use crate::error::CoreError;

const RC_NO_SUCH_OBJECT: u32 = 32;
const RC_ALREADY_EXISTS: u32 = 68;

/// A [`DirectoryStore`] backed by a live LDAP server.
///
/// Each operation works on a clone of the connection handle, so calls need
/// only `&self`.
pub struct LdapDirectory {
    conn: LdapConnection,
}

impl LdapDirectory {
    pub fn new(conn: LdapConnection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &LdapConnection {
        &self.conn
    }

    pub fn into_connection(self) -> LdapConnection {
        self.conn
    }

    async fn lookup(&self, dn: &str) -> Result<Option<LdapEntry>, CoreError> {
        let mut ldap = self.conn.ldap.clone();
        let SearchResult(entries, res) = ldap
            .search(dn, Scope::Base, "(objectClass=*)", vec!["*"])
            .await
            .map_err(CoreError::Ldap)?;

        if res.rc == RC_NO_SUCH_OBJECT {
            return Ok(None);
        }
        if res.rc != 0 {
            return Err(CoreError::SearchFailed(format!(
                "Lookup {} failed rc={}: {}",
                dn, res.rc, res.text
            )));
        }

        Ok(entries
            .into_iter()
            .next()
            .map(|e| LdapEntry::from_search_entry(SearchEntry::construct(e))))
    }

    /// Subtree search, fetched in pages of `settings.page_size`.
    async fn paged_search(&self, base_dn: &str, filter: &str) -> Result<Vec<LdapEntry>, CoreError> {
        let mut ldap = self.conn.ldap.clone();
        let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(page_size(self.conn.settings.page_size))),
        ];

        let mut stream = ldap
            .streaming_search_with(adapters, base_dn, Scope::Subtree, filter, vec!["*"])
            .await
            .map_err(CoreError::Ldap)?;

        let mut entries = Vec::new();
        while let Some(entry) = stream.next().await.map_err(CoreError::Ldap)? {
            entries.push(LdapEntry::from_search_entry(SearchEntry::construct(entry)));
        }

        stream.finish().await.success().map_err(|e| {
            CoreError::SearchFailed(format!("Search under {} failed: {}", base_dn, e))
        })?;

        debug!(base = %base_dn, filter = %filter, "paged search returned {} entries", entries.len());
        Ok(entries)
    }
}

/// Page size for the paged results control. Zero means one unbounded page.
fn page_size(configured: u32) -> i32 {
    match configured {
        0 => i32::MAX,
        n => i32::try_from(n).unwrap_or(i32::MAX),
    }
}

#[async_trait]
impl DirectoryStore for LdapDirectory {
    async fn exists(&self, dn: &str) -> Result<bool, CoreError> {
        Ok(self.lookup(dn).await?.is_some())
    }

    async fn get(&self, dn: &str) -> Result<Option<LdapEntry>, CoreError> {
        self.lookup(dn).await
    }

    async fn create(
        &self,
        dn: &str,
        object_classes: &[String],
        attrs: &AttributeMap,
    ) -> Result<(), CoreError> {
        let attrs = add_request(object_classes, attrs);
        debug!("add_entry dn={} ({} attributes)", dn, attrs.len());

        let mut ldap = self.conn.ldap.clone();
        let result = ldap.add(dn, attrs).await.map_err(CoreError::Ldap)?;

        debug!("add_entry result rc={} text={}", result.rc, result.text);
        match result.rc {
            0 => {
                info!("Added entry: {}", dn);
                Ok(())
            }
            RC_ALREADY_EXISTS => Err(CoreError::AlreadyExists(dn.to_string())),
            rc => Err(CoreError::AddFailed(format!(
                "Add {} failed rc={}: {}",
                dn, rc, result.text
            ))),
        }
    }

    async fn replace(&self, dn: &str, attrs: &AttributeMap) -> Result<(), CoreError> {
        let mods = replace_mods(attrs);
        for m in &mods {
            if let Mod::Replace(attr, vals) = m {
                debug!("  mod REPLACE attr={} ({} values)", attr, vals.len());
            }
        }

        let mut ldap = self.conn.ldap.clone();
        let result = ldap.modify(dn, mods).await.map_err(CoreError::Ldap)?;

        debug!("modify_entry result rc={} text={}", result.rc, result.text);
        match result.rc {
            0 => {
                info!("Modified entry: {}", dn);
                Ok(())
            }
            RC_NO_SUCH_OBJECT => Err(CoreError::NoSuchEntry(dn.to_string())),
            rc => Err(CoreError::ModifyFailed(format!(
                "Modify {} failed rc={}: {}",
                dn, rc, result.text
            ))),
        }
    }

    async fn search(&self, base_dn: &str, filter: &str) -> Result<Vec<LdapEntry>, CoreError> {
        self.paged_search(base_dn, filter).await
    }
}

/// Attribute list for an add request, with object classes merged into `objectClass`.
fn add_request(object_classes: &[String], attrs: &AttributeMap) -> Vec<(String, HashSet<String>)> {
    let mut classes: HashSet<String> = object_classes.iter().cloned().collect();
    let mut out = Vec::with_capacity(attrs.len() + 1);

    for (attr, values) in attrs {
        if attr.eq_ignore_ascii_case("objectClass") {
            classes.extend(values.iter().cloned());
            continue;
        }
        let values: HashSet<String> = values.iter().cloned().collect();
        if !values.is_empty() {
            out.push((attr.clone(), values));
        }
    }

    if !classes.is_empty() {
        out.insert(0, ("objectClass".to_string(), classes));
    }
    out
}

fn replace_mods(attrs: &AttributeMap) -> Vec<Mod<String>> {
    attrs
        .iter()
        .map(|(attr, values)| Mod::Replace(attr.clone(), values.iter().cloned().collect()))
        .collect()
}
