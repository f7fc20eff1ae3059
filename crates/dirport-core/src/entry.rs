use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Attribute name to one or more values. Value order is preserved.
pub type AttributeMap = BTreeMap<String, Vec<String>>;

/// A single directory entry with its DN and attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LdapEntry {
    pub dn: String,
    pub attributes: AttributeMap,
}

impl LdapEntry {
    pub fn new(dn: String, attributes: AttributeMap) -> Self {
        Self { dn, attributes }
    }

    pub fn from_search_entry(entry: ldap3::SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attributes: entry.attrs.into_iter().collect(),
        }
    }

    /// Get the first value of an attribute, if present.
    pub fn first_value(&self, attr: &str) -> Option<&str> {
        self.values(attr)
            .and_then(|vals| vals.first())
            .map(|s| s.as_str())
    }

    /// All values of an attribute, matching the name case-insensitively.
    pub fn values(&self, attr: &str) -> Option<&Vec<String>> {
        self.attributes.get(attr).or_else(|| {
            self.attributes
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(attr))
                .map(|(_, v)| v)
        })
    }

    /// Get all object classes for this entry.
    pub fn object_classes(&self) -> Vec<&str> {
        self.values("objectClass")
            .map(|vals| vals.iter().map(|s| s.as_str()).collect())
            .unwrap_or_default()
    }

    /// Whether the entry carries the given object class (case-insensitive).
    pub fn has_object_class(&self, class: &str) -> bool {
        self.object_classes()
            .iter()
            .any(|oc| oc.eq_ignore_ascii_case(class))
    }
}

/// Look up an attribute in a map case-insensitively, returning the stored key.
pub fn find_key<'a>(attrs: &'a AttributeMap, name: &str) -> Option<&'a String> {
    attrs.keys().find(|k| k.eq_ignore_ascii_case(name))
}

/// First non-empty value of an attribute (case-insensitive name match).
pub fn first_value<'a>(attrs: &'a AttributeMap, name: &str) -> Option<&'a str> {
    find_key(attrs, name)
        .and_then(|k| attrs.get(k))
        .and_then(|vals| vals.iter().find(|v| !v.is_empty()))
        .map(|s| s.as_str())
}

/// Remove an attribute regardless of the case it was stored under.
pub fn remove_ci(attrs: &mut AttributeMap, name: &str) -> Option<Vec<String>> {
    let key = find_key(attrs, name)?.clone();
    attrs.remove(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LdapEntry {
        LdapEntry::new(
            "uid=jdoe,ou=users,dc=example".to_string(),
            BTreeMap::from([
                ("cn".to_string(), vec!["John Doe".to_string()]),
                (
                    "objectClass".to_string(),
                    vec!["top".to_string(), "inetOrgPerson".to_string()],
                ),
                ("multi".to_string(), vec!["a".to_string(), "b".to_string()]),
            ]),
        )
    }

    #[test]
    fn test_first_value() {
        let entry = sample();
        assert_eq!(entry.first_value("cn"), Some("John Doe"));
        assert_eq!(entry.first_value("CN"), Some("John Doe"));
        assert_eq!(entry.first_value("multi"), Some("a"));
        assert_eq!(entry.first_value("missing"), None);
    }

    #[test]
    fn test_object_classes() {
        let entry = sample();
        assert_eq!(entry.object_classes(), vec!["top", "inetOrgPerson"]);
        assert!(entry.has_object_class("inetorgperson"));
        assert!(!entry.has_object_class("posixAccount"));
    }

    #[test]
    fn test_map_helpers() {
        let mut attrs = sample().attributes;
        assert_eq!(find_key(&attrs, "OBJECTCLASS").map(String::as_str), Some("objectClass"));
        assert_eq!(first_value(&attrs, "Cn"), Some("John Doe"));
        assert!(remove_ci(&mut attrs, "objectclass").is_some());
        assert!(!attrs.contains_key("objectClass"));
        assert!(remove_ci(&mut attrs, "objectclass").is_none());
    }

    #[test]
    fn test_serialize_deserialize() {
        let entry = sample();
        let json = serde_json::to_string(&entry).unwrap();
        let deserialized: LdapEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, entry);
    }
}
