//! Object kinds and the attribute sets each one accepts.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::CoreError;

/// Object classes every imported user carries.
pub const USER_OBJECT_CLASSES: [&str; 3] = ["inetOrgPerson", "organizationalPerson", "person"];
/// Object class of imported groups.
pub const GROUP_OBJECT_CLASS: &str = "groupOfNames";

/// Pseudo-attribute selecting the container an entry is created in.
pub const DEPARTMENT: &str = "department";

const USER_REQUIRED: &[&str] = &["uid", "cn", "sn"];
const USER_CORE: &[&str] = &[
    "givenName",
    "displayName",
    "initials",
    "mail",
    "telephoneNumber",
    "mobile",
    "homePhone",
    "pager",
    "facsimileTelephoneNumber",
    "street",
    "postalAddress",
    "postalCode",
    "postOfficeBox",
    "l",
    "st",
    "c",
    "title",
    "description",
    "o",
    "ou",
    "departmentNumber",
    "employeeNumber",
    "employeeType",
    "manager",
    "businessCategory",
    "roomNumber",
    "preferredLanguage",
    "labeledURI",
    "userPassword",
];

const GROUP_REQUIRED: &[&str] = &["cn"];
const GROUP_CORE: &[&str] = &["description", "member", "owner", "businessCategory", "o", "ou", "seeAlso"];

const USER_EXPORT_PRESET: &[&str] = &[
    "uid",
    "cn",
    "sn",
    "givenName",
    "displayName",
    "mail",
    "telephoneNumber",
    "title",
    "ou",
];
const GROUP_EXPORT_PRESET: &[&str] = &["cn", "description", "member"];

/// The kind of entry being imported or exported.
#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum ObjectKind {
    #[strum(serialize = "user")]
    User,
    #[strum(serialize = "group")]
    Group,
    /// Schema-agnostic objects. Object classes and the RDN attribute come from the caller.
    #[strum(serialize = "custom")]
    Custom {
        object_classes: Vec<String>,
        rdn_attr: String,
    },
}

impl ObjectKind {
    /// Resolve a kind from its name. `custom` needs object classes and an RDN attribute.
    pub fn parse(
        name: &str,
        object_classes: Vec<String>,
        rdn_attr: Option<String>,
    ) -> Result<Self, CoreError> {
        match name.to_lowercase().as_str() {
            "user" | "users" => Ok(Self::User),
            "group" | "groups" => Ok(Self::Group),
            "custom" => {
                if object_classes.is_empty() {
                    return Err(CoreError::ConfigError(
                        "custom objects need at least one object class".to_string(),
                    ));
                }
                let rdn_attr = rdn_attr
                    .filter(|a| !a.trim().is_empty())
                    .ok_or_else(|| {
                        CoreError::ConfigError(
                            "custom objects need an RDN attribute".to_string(),
                        )
                    })?;
                Ok(Self::Custom {
                    object_classes,
                    rdn_attr,
                })
            }
            other => Err(CoreError::ConfigError(format!(
                "unknown object type '{}' (expected user, group or custom)",
                other
            ))),
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom { .. })
    }

    /// Attribute naming the entry inside its container.
    pub fn rdn_attr(&self) -> &str {
        match self {
            Self::User => "uid",
            Self::Group => "cn",
            Self::Custom { rdn_attr, .. } => rdn_attr,
        }
    }

    /// Search filter selecting entries of this kind.
    pub fn search_filter(&self) -> String {
        match self {
            Self::User => format!("(objectClass={})", USER_OBJECT_CLASSES[0]),
            Self::Group => format!("(objectClass={})", GROUP_OBJECT_CLASS),
            Self::Custom { object_classes, .. } => {
                let clauses: String = object_classes
                    .iter()
                    .map(|oc| format!("(objectClass={})", oc))
                    .collect();
                if object_classes.len() == 1 {
                    clauses
                } else {
                    format!("(&{})", clauses)
                }
            }
        }
    }

    /// Default export columns, `None` for kinds without a preset.
    pub fn export_preset(&self) -> Option<&'static [&'static str]> {
        match self {
            Self::User => Some(USER_EXPORT_PRESET),
            Self::Group => Some(GROUP_EXPORT_PRESET),
            Self::Custom { .. } => None,
        }
    }
}

/// Fields contributed from outside the core sets (plugins).
#[derive(Debug, Clone, Default)]
pub struct ExtraFields {
    pub required: Vec<String>,
    pub allowed: Vec<String>,
}

/// Required and allowed attributes for one object kind.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    required: Vec<String>,
    /// Lowercased allowed names. `None` accepts every attribute.
    allowed: Option<BTreeSet<String>>,
}

impl FieldSchema {
    pub fn for_kind(kind: &ObjectKind, extra: &ExtraFields) -> Self {
        let (required, core): (&[&str], &[&str]) = match kind {
            ObjectKind::User => (USER_REQUIRED, USER_CORE),
            ObjectKind::Group => (GROUP_REQUIRED, GROUP_CORE),
            ObjectKind::Custom { .. } => {
                return Self {
                    required: Vec::new(),
                    allowed: None,
                }
            }
        };

        let mut required: Vec<String> = required.iter().map(|s| s.to_string()).collect();
        for r in &extra.required {
            if !required.iter().any(|q| q.eq_ignore_ascii_case(r)) {
                required.push(r.clone());
            }
        }

        let allowed = required
            .iter()
            .map(|s| s.to_lowercase())
            .chain(core.iter().map(|s| s.to_lowercase()))
            .chain(extra.allowed.iter().map(|s| s.to_lowercase()))
            .chain(std::iter::once(DEPARTMENT.to_string()))
            .collect();

        Self {
            required,
            allowed: Some(allowed),
        }
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    pub fn accepts_everything(&self) -> bool {
        self.allowed.is_none()
    }

    pub fn is_allowed(&self, attr: &str) -> bool {
        match &self.allowed {
            Some(set) => set.contains(&attr.to_lowercase()),
            None => true,
        }
    }
}
