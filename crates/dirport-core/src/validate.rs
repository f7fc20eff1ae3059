use once_cell::sync::Lazy;
use regex::Regex;

use crate::entry::{first_value, AttributeMap};
use crate::fields::{FieldSchema, ObjectKind};
use crate::import::csv::Row;
use crate::merge::MergePlan;
use crate::result::ValidationError;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9._-]{0,63}$").expect("valid identifier regex"));

static MAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid mail regex"));

pub fn is_valid_identifier(value: &str) -> bool {
    IDENTIFIER_RE.is_match(value)
}

pub fn is_valid_mail(value: &str) -> bool {
    MAIL_RE.is_match(value)
}

/// Validate every row after merging. Custom objects are never validated.
///
/// Errors come out in row order, then field order within a row.
pub fn validate_rows(
    rows: &[Row],
    kind: &ObjectKind,
    schema: &FieldSchema,
    plan: &MergePlan,
) -> Vec<ValidationError> {
    if kind.is_custom() {
        return Vec::new();
    }

    rows.iter()
        .flat_map(|row| validate_attributes(row.index, &plan.merge(row), kind, schema))
        .collect()
}

/// Validate one merged attribute map.
pub fn validate_attributes(
    row: usize,
    attrs: &AttributeMap,
    kind: &ObjectKind,
    schema: &FieldSchema,
) -> Vec<ValidationError> {
    let mut errors: Vec<ValidationError> = schema
        .required()
        .iter()
        .filter(|field| first_value(attrs, field).is_none())
        .map(|field| ValidationError::missing(row, field))
        .collect();

    match kind {
        ObjectKind::User => {
            if let Some(uid) = first_value(attrs, "uid") {
                if !is_valid_identifier(uid) {
                    errors.push(ValidationError::new(
                        row,
                        "uid",
                        format!(
                            "Invalid uid '{}': must start with a letter and contain only letters, digits, '.', '_' or '-' (max 64 characters)",
                            uid
                        ),
                    ));
                }
            }
            if let Some(mail) = first_value(attrs, "mail") {
                if !is_valid_mail(mail) {
                    errors.push(ValidationError::new(
                        row,
                        "mail",
                        format!("Invalid email address: {}", mail),
                    ));
                }
            }
        }
        ObjectKind::Group => {
            if let Some(cn) = first_value(attrs, "cn") {
                if !is_valid_identifier(cn) {
                    errors.push(ValidationError::new(
                        row,
                        "cn",
                        format!(
                            "Invalid group name '{}': must start with a letter and contain only letters, digits, '.', '_' or '-' (max 64 characters)",
                            cn
                        ),
                    ));
                }
            }
        }
        ObjectKind::Custom { .. } => {}
    }

    errors
}
