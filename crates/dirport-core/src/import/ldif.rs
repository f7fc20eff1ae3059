use std::path::Path;

use base64::Engine;
use tracing::{debug, warn};

use crate::entry::{AttributeMap, LdapEntry};
use crate::error::CoreError;

/// Entries parsed from an LDIF document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LdifDocument {
    pub entries: Vec<LdapEntry>,
    /// Records that had content but no `dn:` line. They are not in `entries`.
    pub dropped: usize,
}

/// Read and parse an LDIF file.
pub fn import(path: &Path) -> Result<LdifDocument, CoreError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CoreError::ImportError(format!("Failed to read file: {}", e)))?;
    Ok(parse_document(&content))
}

/// Parse LDIF content into entries, discarding records without a DN.
pub fn parse_ldif(content: &str) -> Vec<LdapEntry> {
    parse_document(content).entries
}

/// Parse LDIF content. Never fails: malformed lines are skipped and
/// records without a DN are counted in [`LdifDocument::dropped`].
pub fn parse_document(content: &str) -> LdifDocument {
    let mut doc = LdifDocument::default();
    // Logical lines of the current record, continuations already joined.
    let mut record: Vec<String> = Vec::new();

    for raw in content.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);

        if line.trim().is_empty() {
            finish_record(&mut record, &mut doc);
            continue;
        }

        if let Some(continuation) = line.strip_prefix(' ') {
            // Nothing to continue at the start of a record.
            if let Some(last) = record.last_mut() {
                last.push_str(continuation);
            }
            continue;
        }

        record.push(line.to_string());
    }
    finish_record(&mut record, &mut doc);

    debug!(
        "parse_ldif: {} entries, {} dropped without dn",
        doc.entries.len(),
        doc.dropped
    );
    doc
}

fn finish_record(record: &mut Vec<String>, doc: &mut LdifDocument) {
    if record.is_empty() {
        return;
    }

    let mut dn: Option<String> = None;
    let mut attributes = AttributeMap::new();
    let mut has_content = false;

    for line in record.drain(..) {
        if line.starts_with('#') {
            continue;
        }
        let lower = line.to_ascii_lowercase();
        if lower.starts_with("changetype:") {
            continue;
        }
        if dn.is_none() && lower.starts_with("version:") {
            continue;
        }

        let Some((attr, value)) = parse_ldif_line(&line) else {
            continue;
        };
        has_content = true;

        if attr.eq_ignore_ascii_case("dn") {
            if dn.is_none() {
                dn = Some(value);
            }
        } else {
            attributes.entry(attr).or_default().push(value);
        }
    }

    match dn.filter(|d| !d.trim().is_empty()) {
        Some(dn) => doc.entries.push(LdapEntry::new(dn, attributes)),
        None if has_content => doc.dropped += 1,
        None => {}
    }
}

/// Parse a single logical line into (attribute, value).
fn parse_ldif_line(line: &str) -> Option<(String, String)> {
    let colon = line.find(':')?;
    let attr = line[..colon].trim();
    if attr.is_empty() || attr.contains(' ') {
        return None;
    }
    let rest = &line[colon + 1..];

    // "attr:: base64value"
    if let Some(encoded) = rest.strip_prefix(':') {
        let encoded = encoded.trim();
        let value = base64_decode(encoded).unwrap_or_else(|| encoded.to_string());
        return Some((attr.to_string(), value));
    }

    // "attr:< url" references are not fetched.
    if rest.starts_with('<') {
        warn!("skipping URL reference value for attribute {}", attr);
        return None;
    }

    // "attr: value", or "attr:" with an empty value
    Some((attr.to_string(), rest.trim_start_matches(' ').to_string()))
}

fn base64_decode(s: &str) -> Option<String> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(s).ok()?;
    String::from_utf8(bytes).ok()
}
