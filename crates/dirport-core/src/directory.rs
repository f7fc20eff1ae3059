use async_trait::async_trait;

use crate::entry::{AttributeMap, LdapEntry};
use crate::error::CoreError;

/// The directory the engine reads from and writes to.
///
/// Any `Err` is treated by the orchestrators as a failure of the current row only.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn exists(&self, dn: &str) -> Result<bool, CoreError>;

    async fn get(&self, dn: &str) -> Result<Option<LdapEntry>, CoreError>;

    /// Create a new entry. Fails if the DN is taken.
    async fn create(
        &self,
        dn: &str,
        object_classes: &[String],
        attrs: &AttributeMap,
    ) -> Result<(), CoreError>;

    /// Replace every listed attribute with the given values. Unlisted attributes are kept.
    async fn replace(&self, dn: &str, attrs: &AttributeMap) -> Result<(), CoreError>;

    /// Subtree search under `base_dn`.
    async fn search(&self, base_dn: &str, filter: &str) -> Result<Vec<LdapEntry>, CoreError>;
}
