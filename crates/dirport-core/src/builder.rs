//! Turning a merged attribute map into a DN, object classes and entry body.

use tracing::debug;

use crate::config::DirectoryConfig;
use crate::dn;
use crate::entry::{first_value, remove_ci, AttributeMap};
use crate::error::CoreError;
use crate::fields::{FieldSchema, ObjectKind, DEPARTMENT, GROUP_OBJECT_CLASS, USER_OBJECT_CLASSES};
use crate::merge::strip_empty;

/// An entry ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltEntry {
    pub dn: String,
    pub object_classes: Vec<String>,
    pub attributes: AttributeMap,
    /// Unescaped RDN value, used as the entry's display name.
    pub name: String,
}

/// Build the entry for one row.
///
/// Empty values are dropped. The `department` pseudo-attribute picks the
/// container: a value containing `=` is taken as a DN, anything else becomes
/// `ou=<value>,<base_dn>`. For users and groups, attributes outside the schema
/// and attributes in `plugin_owned` are left out of the body.
pub fn build_entry(
    kind: &ObjectKind,
    mut attrs: AttributeMap,
    schema: &FieldSchema,
    layout: &DirectoryConfig,
    plugin_owned: &[String],
) -> Result<BuiltEntry, CoreError> {
    strip_empty(&mut attrs);

    let department = remove_ci(&mut attrs, DEPARTMENT)
        .and_then(|vals| vals.into_iter().next())
        .map(|v| v.trim().to_string());
    let supplied_classes = remove_ci(&mut attrs, "objectClass").unwrap_or_default();

    if !kind.is_custom() {
        attrs.retain(|attr, _| {
            let keep = schema.is_allowed(attr)
                && !plugin_owned.iter().any(|o| o.eq_ignore_ascii_case(attr));
            if !keep {
                debug!(attr = %attr, "left out of entry body");
            }
            keep
        });
    }

    let container = |default: String| match &department {
        Some(d) if d.contains('=') => d.clone(),
        Some(d) => dn::compose("ou", d, &layout.base_dn),
        None => default,
    };

    let rdn_attr = kind.rdn_attr().to_string();
    let name = first_value(&attrs, &rdn_attr)
        .map(str::to_string)
        .ok_or_else(|| CoreError::InvalidEntry(format!("Missing required field: {}", rdn_attr)))?;

    match kind {
        ObjectKind::User => {
            let dn = dn::compose("uid", &name, &container(layout.users_container()));
            remove_ci(&mut attrs, "uid");
            attrs.insert("uid".to_string(), vec![name.clone()]);
            Ok(BuiltEntry {
                dn,
                object_classes: USER_OBJECT_CLASSES.iter().map(|s| s.to_string()).collect(),
                attributes: attrs,
                name,
            })
        }
        ObjectKind::Group => {
            let dn = dn::compose("cn", &name, &container(layout.groups_container()));
            if first_value(&attrs, "member").is_none() {
                // groupOfNames needs at least one member
                attrs.insert("member".to_string(), vec![dn.clone()]);
            }
            Ok(BuiltEntry {
                dn,
                object_classes: vec![GROUP_OBJECT_CLASS.to_string()],
                attributes: attrs,
                name,
            })
        }
        ObjectKind::Custom {
            object_classes,
            rdn_attr,
        } => {
            let dn = dn::compose(rdn_attr, &name, &container(layout.base_dn.clone()));
            let mut classes = object_classes.clone();
            for oc in supplied_classes {
                if !classes.iter().any(|c| c.eq_ignore_ascii_case(&oc)) {
                    classes.push(oc);
                }
            }
            Ok(BuiltEntry {
                dn,
                object_classes: classes,
                attributes: attrs,
                name,
            })
        }
    }
}
