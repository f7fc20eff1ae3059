//! Attribute resolution for one imported row.
//!
//! Precedence, lowest to highest: CSV value (after column renaming), template
//! default (only fills absent or empty attributes), fixed value (always wins).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entry::{find_key, AttributeMap};
use crate::import::csv::Row;

/// Separator between values of a multi-valued attribute in a single cell.
pub const MULTI_VALUE_SEPARATOR: &str = "; ";

/// Attributes whose cell values are split on [`MULTI_VALUE_SEPARATOR`].
const MULTI_VALUED: &[&str] = &[
    "member",
    "uniqueMember",
    "memberUid",
    "owner",
    "seeAlso",
    "objectClass",
    "sshPublicKey",
    "mailLocalAddress",
    "mailAlternateAddress",
];

/// Rename a CSV column to a target attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub csv_column: String,
    pub attribute: String,
}

/// A constant applied to every row of an import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedValue {
    pub attribute: String,
    pub value: String,
}

/// Everything that shapes a row into attributes, fixed for one import call.
#[derive(Debug, Clone, Default)]
pub struct MergePlan {
    pub mapping: Vec<ColumnMapping>,
    pub defaults: AttributeMap,
    pub fixed: Vec<FixedValue>,
}

impl MergePlan {
    pub fn merge(&self, row: &Row) -> AttributeMap {
        merge_row(row, &self.mapping, &self.defaults, &self.fixed)
    }
}

pub fn is_multi_valued(attr: &str) -> bool {
    MULTI_VALUED.iter().any(|a| a.eq_ignore_ascii_case(attr))
}

/// Split a raw cell into trimmed, non-empty values.
fn split_values(attr: &str, raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    if is_multi_valued(attr) {
        raw.split(MULTI_VALUE_SEPARATOR.trim())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    } else {
        vec![raw.to_string()]
    }
}

/// Insert under an existing key of any case, or under `attr` itself.
fn put(attrs: &mut AttributeMap, attr: &str, values: Vec<String>) {
    let key = find_key(attrs, attr).cloned().unwrap_or_else(|| attr.to_string());
    attrs.insert(key, values);
}

fn is_present(attrs: &AttributeMap, attr: &str) -> bool {
    find_key(attrs, attr)
        .and_then(|k| attrs.get(k))
        .is_some_and(|vals| vals.iter().any(|v| !v.trim().is_empty()))
}

/// Resolve the final attribute map for a row.
///
/// Mapped columns are renamed in place. When several columns land on the same
/// attribute, the last non-empty one in column order wins. A fixed value is
/// applied even when it is empty, which clears the attribute.
pub fn merge_row(
    row: &Row,
    mapping: &[ColumnMapping],
    defaults: &AttributeMap,
    fixed: &[FixedValue],
) -> AttributeMap {
    let mut attrs = AttributeMap::new();

    for (column, raw) in &row.values {
        let attr = mapping
            .iter()
            .find(|m| m.csv_column.trim() == column.trim())
            .map(|m| m.attribute.trim())
            .unwrap_or_else(|| column.trim());
        if attr.is_empty() {
            continue;
        }
        let values = split_values(attr, raw);
        if values.is_empty() {
            continue;
        }
        put(&mut attrs, attr, values);
    }

    for (attr, default_values) in defaults {
        if is_present(&attrs, attr) {
            continue;
        }
        let values: Vec<String> = default_values
            .iter()
            .flat_map(|v| split_values(attr, v))
            .collect();
        if !values.is_empty() {
            debug!(row = row.index, attr = %attr, "filled from template default");
            put(&mut attrs, attr, values);
        }
    }

    for f in fixed {
        let attr = f.attribute.trim();
        if attr.is_empty() {
            continue;
        }
        let mut values = split_values(attr, &f.value);
        if values.is_empty() {
            values.push(String::new());
        }
        put(&mut attrs, attr, values);
    }

    attrs
}

/// Drop empty values, and attributes left with none.
pub fn strip_empty(attrs: &mut AttributeMap) {
    for values in attrs.values_mut() {
        values.retain(|v| !v.trim().is_empty());
    }
    attrs.retain(|_, values| !values.is_empty());
}
